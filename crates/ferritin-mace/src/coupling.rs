//! Angular momentum coupling in the real spherical harmonic basis.
//!
//! Coefficients are built from the standard (Condon-Shortley) Clebsch-Gordan
//! coefficients and the unitary change of basis between complex and real
//! harmonics used by [`crate::harmonics`]. Couplings with `l1 + l2 + l3` even
//! come out real; odd ones come out purely imaginary and the imaginary part is
//! taken. Every table is normalized to a Frobenius norm of `sqrt(2 l3 + 1)`.
use crate::irreps::{Irrep, Irreps};
use candle_core::{Device, Result, Tensor};

fn factorial(n: i64) -> f64 {
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}

/// `<j1 m1 j2 m2 | j3 m3>` via the Racah formula.
pub fn clebsch_gordan(j1: i64, m1: i64, j2: i64, m2: i64, j3: i64, m3: i64) -> f64 {
    if m1 + m2 != m3 || j3 < (j1 - j2).abs() || j3 > j1 + j2 {
        return 0.0;
    }
    if m1.abs() > j1 || m2.abs() > j2 || m3.abs() > j3 {
        return 0.0;
    }
    let pre = ((2 * j3 + 1) as f64 * factorial(j3 + j1 - j2) * factorial(j3 - j1 + j2)
        * factorial(j1 + j2 - j3)
        / factorial(j1 + j2 + j3 + 1))
    .sqrt();
    let pre = pre
        * (factorial(j3 + m3)
            * factorial(j3 - m3)
            * factorial(j1 - m1)
            * factorial(j1 + m1)
            * factorial(j2 - m2)
            * factorial(j2 + m2))
            .sqrt();
    let mut sum = 0.0;
    for k in 0..=(j1 + j2 + j3) {
        let d = [
            k,
            j1 + j2 - j3 - k,
            j1 - m1 - k,
            j2 + m2 - k,
            j3 - j2 + m1 + k,
            j3 - j1 - m2 + k,
        ];
        if d.iter().any(|&x| x < 0) {
            continue;
        }
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        sum += sign / d.iter().map(|&x| factorial(x)).product::<f64>();
    }
    pre * sum
}

type Complex = (f64, f64);

fn cmul(a: Complex, b: Complex) -> Complex {
    (a.0 * b.0 - a.1 * b.1, a.0 * b.1 + a.1 * b.0)
}

fn conj(a: Complex) -> Complex {
    (a.0, -a.1)
}

/// Non-zero entries `(m, coefficient)` of row `r` of the complex-to-real basis change.
fn real_basis_row(l: i64, r: usize) -> Vec<(i64, Complex)> {
    let s = std::f64::consts::FRAC_1_SQRT_2;
    let m = r as i64 - l;
    let phase = if m.abs() % 2 == 0 { 1.0 } else { -1.0 };
    match m.cmp(&0) {
        std::cmp::Ordering::Equal => vec![(0, (1.0, 0.0))],
        std::cmp::Ordering::Greater => vec![(m, (phase * s, 0.0)), (-m, (s, 0.0))],
        std::cmp::Ordering::Less => vec![(m, (0.0, s)), (-m, (0.0, -phase * s))],
    }
}

/// Flat `[2l1+1, 2l2+1, 2l3+1]` coupling table in the real basis.
///
/// Returns all zeros when `l3` violates the triangle rule.
pub fn real_coupling_coefficients(l1: usize, l2: usize, l3: usize) -> Vec<f64> {
    let (d1, d2, d3) = (2 * l1 + 1, 2 * l2 + 1, 2 * l3 + 1);
    let mut out = vec![0.0; d1 * d2 * d3];
    if l3 < l1.abs_diff(l2) || l3 > l1 + l2 {
        return out;
    }
    let (j1, j2, j3) = (l1 as i64, l2 as i64, l3 as i64);
    let take_real = (l1 + l2 + l3) % 2 == 0;
    for a in 0..d1 {
        let row1 = real_basis_row(j1, a);
        for b in 0..d2 {
            let row2 = real_basis_row(j2, b);
            for c in 0..d3 {
                let row3 = real_basis_row(j3, c);
                let mut acc: Complex = (0.0, 0.0);
                for &(m1, u1) in &row1 {
                    for &(m2, u2) in &row2 {
                        for &(m3, u3) in &row3 {
                            let cg = clebsch_gordan(j1, m1, j2, m2, j3, m3);
                            if cg == 0.0 {
                                continue;
                            }
                            let term = cmul(cmul(u3, conj(u1)), conj(u2));
                            acc.0 += cg * term.0;
                            acc.1 += cg * term.1;
                        }
                    }
                }
                out[(a * d2 + b) * d3 + c] = if take_real { acc.0 } else { acc.1 };
            }
        }
    }
    let norm = out.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        let scale = (d3 as f64).sqrt() / norm;
        out.iter_mut().for_each(|x| *x *= scale);
    }
    out
}

/// Coupling table as a `[d1 * d2, d3]` tensor, ready for a matmul against outer products.
pub fn coupling_tensor(l1: usize, l2: usize, l3: usize, device: &Device) -> Result<Tensor> {
    let coeffs: Vec<f32> = real_coupling_coefficients(l1, l2, l3)
        .into_iter()
        .map(|x| x as f32)
        .collect();
    Tensor::from_vec(coeffs, ((2 * l1 + 1) * (2 * l2 + 1), 2 * l3 + 1), device)
}

/// Selection rule: triangle inequality on degrees and `p3 = p1 * p2`.
pub fn coupling_allowed(ir1: &Irrep, ir2: &Irrep, ir3: &Irrep) -> bool {
    ir1.coupled_with(ir2).any(|ir| ir == *ir3)
}

/// One instantiated `(in1 block, in2 block) -> out block` coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouplingPath {
    pub in1: usize,
    pub in2: usize,
    pub out: usize,
    pub l1: usize,
    pub l2: usize,
    pub l3: usize,
}

/// Every path between blocks of `irreps_in1 x irreps_in2` that lands on a declared
/// output block, in `(out, in1, in2)` order.
pub fn fully_connected_paths(
    irreps_in1: &Irreps,
    irreps_in2: &Irreps,
    irreps_out: &Irreps,
) -> Vec<CouplingPath> {
    let mut paths = Vec::new();
    for (out, mo) in irreps_out.iter().enumerate() {
        for (in1, m1) in irreps_in1.iter().enumerate() {
            for (in2, m2) in irreps_in2.iter().enumerate() {
                if m1.mul == 0 || m2.mul == 0 || mo.mul == 0 {
                    continue;
                }
                if coupling_allowed(&m1.irrep, &m2.irrep, &mo.irrep) {
                    paths.push(CouplingPath {
                        in1,
                        in2,
                        out,
                        l1: m1.irrep.l,
                        l2: m2.irrep.l,
                        l3: mo.irrep.l,
                    });
                }
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonics::{spherical_harmonics_f64, test_rotation};

    fn invariant(l1: usize, l2: usize, l3: usize, x: [f64; 3], y: [f64; 3], z: [f64; 3]) -> f64 {
        let c = real_coupling_coefficients(l1, l2, l3);
        let (a, b, d) = (
            spherical_harmonics_f64(l1, x),
            spherical_harmonics_f64(l2, y),
            spherical_harmonics_f64(l3, z),
        );
        let (d2, d3) = (2 * l2 + 1, 2 * l3 + 1);
        let mut acc = 0.0;
        for i in 0..a.len() {
            for j in 0..b.len() {
                for k in 0..d.len() {
                    acc += c[(i * d2 + j) * d3 + k] * a[i] * b[j] * d[k];
                }
            }
        }
        acc
    }

    fn rotate(r: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
        [0, 1, 2].map(|i| r[i][0] * v[0] + r[i][1] * v[1] + r[i][2] * v[2])
    }

    #[test]
    fn test_known_clebsch_gordan_values() {
        let v = clebsch_gordan(1, 1, 1, -1, 0, 0);
        assert!((v - 1.0 / 3f64.sqrt()).abs() < 1e-12);
        let v = clebsch_gordan(1, 1, 1, 0, 2, 1);
        assert!((v - 0.5f64.sqrt()).abs() < 1e-12);
        assert_eq!(clebsch_gordan(1, 1, 1, 1, 1, 1), 0.0);
    }

    #[test]
    fn test_real_couplings_are_rotation_invariant() {
        let r = test_rotation();
        let (x, y, z) = ([0.3, -0.5, 0.8], [-1.1, 0.2, 0.4], [0.7, 0.9, -0.2]);
        for (l1, l2, l3) in [(1, 1, 0), (1, 1, 1), (1, 1, 2), (2, 1, 1), (2, 2, 2), (2, 1, 2), (3, 2, 1)] {
            let before = invariant(l1, l2, l3, x, y, z);
            let after = invariant(l1, l2, l3, rotate(&r, x), rotate(&r, y), rotate(&r, z));
            assert!(
                (before - after).abs() < 1e-9,
                "({l1},{l2},{l3}): {before} vs {after}"
            );
        }
    }

    #[test]
    fn test_frobenius_normalization() {
        let c = real_coupling_coefficients(2, 1, 2);
        let norm: f64 = c.iter().map(|x| x * x).sum();
        assert!((norm - 5.0).abs() < 1e-9);
        assert!(real_coupling_coefficients(2, 0, 1).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_path_selection_follows_parity() {
        let hidden: Irreps = "4x0e+4x1o+4x2e".parse().unwrap();
        let sh = Irreps::spherical_harmonics(2);
        let paths = fully_connected_paths(&hidden, &sh, &hidden);
        assert_eq!(paths.len(), 11);
        assert!(paths.iter().all(|p| (p.l1 + p.l2 + p.l3) % 2 == 0));
        let scalars = Irreps::scalars(4);
        let first = fully_connected_paths(&scalars, &sh, &hidden);
        assert_eq!(first.len(), 3);
    }
}
