//! Radial basis for edge lengths.
use crate::error::{MaceError, Result};
use candle_core::{Tensor, D};

/// `sqrt(2 / r_max) * sin(n pi r / r_max) / r` for `n = 1..=num_basis`.
#[derive(Debug, Clone)]
pub struct BesselBasis {
    r_max: f64,
    num_basis: usize,
}

impl BesselBasis {
    pub fn new(r_max: f64, num_basis: usize) -> Self {
        Self { r_max, num_basis }
    }

    /// `[num_edges, 1] -> [num_edges, num_basis]`
    pub fn forward(&self, lengths: &Tensor) -> candle_core::Result<Tensor> {
        let freqs: Vec<f32> = (1..=self.num_basis)
            .map(|n| (n as f64 * std::f64::consts::PI / self.r_max) as f32)
            .collect();
        let freqs = Tensor::from_vec(freqs, (1, self.num_basis), lengths.device())?
            .to_dtype(lengths.dtype())?;
        let prefactor = (2.0 / self.r_max).sqrt();
        lengths
            .broadcast_mul(&freqs)?
            .sin()?
            .broadcast_div(lengths)?
            .affine(prefactor, 0.0)
    }
}

/// Smooth envelope that vanishes together with its first two derivatives at `r_max`.
#[derive(Debug, Clone)]
pub struct PolynomialCutoff {
    r_max: f64,
    p: f64,
}

impl PolynomialCutoff {
    pub fn new(r_max: f64, p: usize) -> Self {
        Self { r_max, p: p as f64 }
    }

    fn coefficients(&self) -> (f64, f64, f64) {
        let p = self.p;
        ((p + 1.0) * (p + 2.0) / 2.0, p * (p + 2.0), p * (p + 1.0) / 2.0)
    }

    pub fn value(&self, r: f64) -> f64 {
        let x = r / self.r_max;
        if x >= 1.0 {
            return 0.0;
        }
        let (a, b, c) = self.coefficients();
        1.0 - a * x.powf(self.p) + b * x.powf(self.p + 1.0) - c * x.powf(self.p + 2.0)
    }

    /// `[num_edges, 1] -> [num_edges, 1]`
    pub fn forward(&self, lengths: &Tensor) -> candle_core::Result<Tensor> {
        let x = lengths.affine(1.0 / self.r_max, 0.0)?;
        let (a, b, c) = self.coefficients();
        let envelope = (x.powf(self.p)?.affine(-a, 1.0)?
            + x.powf(self.p + 1.0)?.affine(b, 0.0)?
            - x.powf(self.p + 2.0)?.affine(c, 0.0)?)?;
        let inside = x.lt(1.0)?.to_dtype(lengths.dtype())?;
        envelope.mul(&inside)
    }
}

/// Bessel basis multiplied by the polynomial envelope.
#[derive(Debug, Clone)]
pub struct RadialEmbeddingBlock {
    bessel: BesselBasis,
    cutoff: PolynomialCutoff,
    pub out_dim: usize,
}

impl RadialEmbeddingBlock {
    pub fn new(r_max: f64, num_bessel: usize, num_polynomial_cutoff: usize) -> Self {
        Self {
            bessel: BesselBasis::new(r_max, num_bessel),
            cutoff: PolynomialCutoff::new(r_max, num_polynomial_cutoff),
            out_dim: num_bessel,
        }
    }

    pub fn forward(&self, lengths: &Tensor) -> candle_core::Result<Tensor> {
        let radial = self.bessel.forward(lengths)?;
        let envelope = self.cutoff.forward(lengths)?;
        radial.broadcast_mul(&envelope)
    }
}

/// Lengths must be finite and non-negative; zero-length edges have no direction.
pub fn validate_edge_lengths(lengths: &Tensor) -> Result<()> {
    let values = lengths.flatten_all()?.to_dtype(candle_core::DType::F32)?.to_vec1::<f32>()?;
    for (edge, &length) in values.iter().enumerate() {
        if !length.is_finite() || length < 0.0 {
            return Err(MaceError::InvalidEdgeLength { edge, length });
        }
        if length == 0.0 {
            return Err(MaceError::DegenerateEdge(edge));
        }
    }
    Ok(())
}

/// Edge vectors `pos[edge_index[0]] - pos[edge_index[1]]` and their lengths `[E, 1]`.
pub fn edge_vectors_and_lengths(
    positions: &Tensor,
    edge_index: &Tensor,
) -> candle_core::Result<(Tensor, Tensor)> {
    let first = positions.index_select(&edge_index.get(0)?.contiguous()?, 0)?;
    let second = positions.index_select(&edge_index.get(1)?.contiguous()?, 0)?;
    let vectors = (first - second)?;
    let lengths = vectors.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?;
    Ok((vectors, lengths))
}
