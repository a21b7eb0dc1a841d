//! Real spherical harmonics with "component" normalization.
//!
//! For a unit vector `(x, y, z)` the degree-`l` harmonics are ordered `m = -l..=l`
//! and satisfy `sum_m Y_lm^2 = 2l + 1`. Degree one is `sqrt(3) * (y, z, x)`.
//! Positive `m` uses `Re((x + iy)^m)`, negative `m` uses `Im((x + iy)^|m|)`, both
//! scaled by the derivative of the Legendre polynomial `d^m P_l / dz^m`.
use crate::irreps::Irreps;
use candle_core::{Device, Result, Tensor, D};

fn double_factorial(n: i64) -> f64 {
    let mut acc = 1.0;
    let mut k = n;
    while k > 1 {
        acc *= k as f64;
        k -= 2;
    }
    acc
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}

/// Normalization of the `|m| > 0` components relative to `Q_l^m * Re/Im((x + iy)^m)`.
fn norm_factor(l: usize, m: usize) -> f64 {
    let base = ((2 * l + 1) as f64 * factorial(l - m) / factorial(l + m)).sqrt();
    if m == 0 {
        base
    } else {
        std::f64::consts::SQRT_2 * base
    }
}

/// Host-side evaluation of the degree-`l` harmonics of `v` (normalized internally).
pub fn spherical_harmonics_f64(l: usize, v: [f64; 3]) -> Vec<f64> {
    let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    let (x, y, z) = (v[0] / n, v[1] / n, v[2] / n);

    let mut re = vec![1.0];
    let mut im = vec![0.0];
    for m in 1..=l {
        let (a, b) = (re[m - 1], im[m - 1]);
        re.push(x * a - y * b);
        im.push(x * b + y * a);
    }

    let mut out = vec![0.0; 2 * l + 1];
    for m in 0..=l {
        let q = legendre_derivative(l, m, z);
        let c = norm_factor(l, m);
        if m == 0 {
            out[l] = c * q;
        } else {
            out[l + m] = c * q * re[m];
            out[l - m] = c * q * im[m];
        }
    }
    out
}

/// `d^m P_l / dz^m` evaluated at `z`.
fn legendre_derivative(l: usize, m: usize, z: f64) -> f64 {
    let q_mm = double_factorial(2 * m as i64 - 1);
    if l == m {
        return q_mm;
    }
    let mut prev = q_mm;
    let mut curr = (2 * m + 1) as f64 * z * q_mm;
    for ll in (m + 2)..=l {
        let next = ((2 * ll - 1) as f64 * z * curr - (ll + m - 1) as f64 * prev) / (ll - m) as f64;
        prev = curr;
        curr = next;
    }
    curr
}

/// Spherical harmonics of edge vectors, `[num_edges, 3] -> [num_edges, (lmax + 1)^2]`.
#[derive(Debug, Clone)]
pub struct SphericalHarmonics {
    lmax: usize,
    irreps: Irreps,
}

impl SphericalHarmonics {
    pub fn new(lmax: usize) -> Self {
        Self {
            lmax,
            irreps: Irreps::spherical_harmonics(lmax),
        }
    }

    pub fn irreps(&self) -> &Irreps {
        &self.irreps
    }

    pub fn forward(&self, vectors: &Tensor) -> Result<Tensor> {
        let norm = vectors.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?;
        let unit = vectors.broadcast_div(&norm)?;
        let x = unit.narrow(D::Minus1, 0, 1)?;
        let y = unit.narrow(D::Minus1, 1, 1)?;
        let z = unit.narrow(D::Minus1, 2, 1)?;

        // Re / Im of (x + iy)^m
        let mut re = vec![x.ones_like()?];
        let mut im = vec![x.zeros_like()?];
        for m in 1..=self.lmax {
            let a = (x.mul(&re[m - 1])? - y.mul(&im[m - 1])?)?;
            let b = (x.mul(&im[m - 1])? + y.mul(&re[m - 1])?)?;
            re.push(a);
            im.push(b);
        }

        // q[m][l - m] = d^m P_l / dz^m
        let mut q: Vec<Vec<Tensor>> = Vec::with_capacity(self.lmax + 1);
        for m in 0..=self.lmax {
            let q_mm = z.ones_like()?.affine(double_factorial(2 * m as i64 - 1), 0.0)?;
            let mut col = vec![q_mm];
            if m < self.lmax {
                let q_next = z.mul(&col[0])?.affine((2 * m + 1) as f64, 0.0)?;
                col.push(q_next);
            }
            for ll in (m + 2)..=self.lmax {
                let a = z.mul(&col[ll - m - 1])?.affine((2 * ll - 1) as f64, 0.0)?;
                let b = col[ll - m - 2].affine((ll + m - 1) as f64, 0.0)?;
                col.push((a - b)?.affine(1.0 / (ll - m) as f64, 0.0)?);
            }
            q.push(col);
        }

        let mut columns = Vec::with_capacity((self.lmax + 1) * (self.lmax + 1));
        for l in 0..=self.lmax {
            for mm in -(l as i64)..=(l as i64) {
                let m = mm.unsigned_abs() as usize;
                let base = q[m][l - m].affine(norm_factor(l, m), 0.0)?;
                let col = match mm.signum() {
                    0 => base,
                    1 => base.mul(&re[m])?,
                    _ => base.mul(&im[m])?,
                };
                columns.push(col);
            }
        }
        Tensor::cat(&columns, D::Minus1)
    }
}

/// Deterministic, well spread points on the unit sphere.
fn fibonacci_sphere(n: usize) -> Vec<[f64; 3]> {
    let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    (0..n)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - z * z).sqrt();
            let theta = golden * i as f64 + 0.3;
            [r * theta.cos(), r * theta.sin(), z]
        })
        .collect()
}

fn invert(matrix: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut a: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let mut row = matrix[i * n..(i + 1) * n].to_vec();
            row.extend((0..n).map(|j| if i == j { 1.0 } else { 0.0 }));
            row
        })
        .collect();
    for c in 0..n {
        let pivot = (c..n).max_by(|&i, &j| a[i][c].abs().total_cmp(&a[j][c].abs()))?;
        a.swap(c, pivot);
        let p = a[c][c];
        if p.abs() < 1e-12 {
            return None;
        }
        a[c].iter_mut().for_each(|v| *v /= p);
        let pivot_row = a[c].clone();
        for (r, row) in a.iter_mut().enumerate() {
            if r != c {
                let f = row[c];
                row.iter_mut()
                    .zip(pivot_row.iter())
                    .for_each(|(v, pv)| *v -= f * pv);
            }
        }
    }
    Some(a.into_iter().flat_map(|row| row[n..].to_vec()).collect())
}

/// Real Wigner-D matrix of degree `l` for a proper rotation, row-major `[2l+1, 2l+1]`.
///
/// Solved from `Y_l(R x) = D Y_l(x)` in the least squares sense over a fixed
/// set of sample directions.
pub fn wigner_d(l: usize, rotation: &[[f64; 3]; 3]) -> Result<Vec<f64>> {
    let d = 2 * l + 1;
    let points = fibonacci_sphere(4 * d);
    let rotate = |v: &[f64; 3]| -> [f64; 3] {
        [0, 1, 2].map(|i| rotation[i][0] * v[0] + rotation[i][1] * v[1] + rotation[i][2] * v[2])
    };
    let y: Vec<Vec<f64>> = points.iter().map(|p| spherical_harmonics_f64(l, *p)).collect();
    let yr: Vec<Vec<f64>> = points
        .iter()
        .map(|p| spherical_harmonics_f64(l, rotate(p)))
        .collect();

    let mut gram = vec![0.0; d * d];
    let mut cross = vec![0.0; d * d];
    for (a, b) in y.iter().zip(yr.iter()) {
        for i in 0..d {
            for j in 0..d {
                gram[i * d + j] += a[i] * a[j];
                cross[i * d + j] += b[i] * a[j];
            }
        }
    }
    let Some(inv) = invert(&gram, d) else {
        candle_core::bail!("degree {l} harmonics are degenerate on {} sample directions", points.len())
    };
    let mut out = vec![0.0; d * d];
    for i in 0..d {
        for j in 0..d {
            out[i * d + j] = (0..d).map(|k| cross[i * d + k] * inv[k * d + j]).sum();
        }
    }
    Ok(out)
}

/// Block diagonal action of a rotation on features typed by `irreps`, `[dim, dim]`.
pub fn irreps_rotation(irreps: &Irreps, rotation: &[[f64; 3]; 3], device: &Device) -> Result<Tensor> {
    let dim = irreps.dim();
    let mut full = vec![0f32; dim * dim];
    let mut offset = 0;
    for mul_ir in irreps {
        let d = mul_ir.irrep.dim();
        let block = wigner_d(mul_ir.irrep.l, rotation)?;
        for _ in 0..mul_ir.mul {
            for i in 0..d {
                for j in 0..d {
                    full[(offset + i) * dim + offset + j] = block[i * d + j] as f32;
                }
            }
            offset += d;
        }
    }
    Tensor::from_vec(full, (dim, dim), device)
}

/// Rotate `[num_nodes, irreps.dim()]` features.
pub fn rotate_features(
    irreps: &Irreps,
    features: &Tensor,
    rotation: &[[f64; 3]; 3],
) -> Result<Tensor> {
    let d = irreps_rotation(irreps, rotation, features.device())?.to_dtype(features.dtype())?;
    features.matmul(&d.t()?)
}

/// Rotate `[num_points, 3]` positions.
pub fn rotate_positions(positions: &Tensor, rotation: &[[f64; 3]; 3]) -> Result<Tensor> {
    let flat: Vec<f32> = rotation.iter().flatten().map(|&v| v as f32).collect();
    let r = Tensor::from_vec(flat, (3, 3), positions.device())?.to_dtype(positions.dtype())?;
    positions.matmul(&r.t()?)
}

#[cfg(test)]
pub(crate) fn test_rotation() -> [[f64; 3]; 3] {
    // unit quaternion (0.8, 0.2, -0.4, 0.4) rescaled to norm one
    let q = [0.8f64, 0.2, -0.4, 0.4];
    let n = q.iter().map(|v| v * v).sum::<f64>().sqrt();
    let [w, x, y, z] = q.map(|v| v / n);
    [
        [1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - w * z), 2.0 * (x * z + w * y)],
        [2.0 * (x * y + w * z), 1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - w * x)],
        [2.0 * (x * z - w * y), 2.0 * (y * z + w * x), 1.0 - 2.0 * (x * x + y * y)],
    ]
}
