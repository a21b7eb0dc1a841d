use crate::error::{MaceError, Result};
use crate::irreps::Irreps;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Reduction of incoming messages onto a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Sum,
    Mean,
}

/// Readout of node features into one vector per graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[default]
    Sum,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaceConfig {
    /// Cutoff of the radial basis.
    pub r_max: f64,
    pub num_bessel: usize,
    pub num_polynomial_cutoff: usize,
    /// Highest degree of the edge spherical harmonics.
    pub max_ell: usize,
    /// Body order minus one.
    pub correlation: usize,
    pub num_layers: usize,
    pub emb_dim: usize,
    /// Derived from `max_ell` and `emb_dim` when absent.
    pub hidden_irreps: Option<Irreps>,
    pub mlp_dim: usize,
    pub in_dim: usize,
    pub out_dim: usize,
    pub aggr: Aggregation,
    pub pool: Pooling,
    pub batch_norm: bool,
    pub residual: bool,
    pub equivariant_pred: bool,
    pub as_encoder: bool,
    pub encoder_dim: usize,
}

impl Default for MaceConfig {
    fn default() -> Self {
        Self {
            r_max: 10.0,
            num_bessel: 8,
            num_polynomial_cutoff: 5,
            max_ell: 2,
            correlation: 3,
            num_layers: 5,
            emb_dim: 64,
            hidden_irreps: None,
            mlp_dim: 256,
            in_dim: 1,
            out_dim: 1,
            aggr: Aggregation::Sum,
            pool: Pooling::Sum,
            batch_norm: true,
            residual: true,
            equivariant_pred: true,
            as_encoder: true,
            encoder_dim: 256,
        }
    }
}

impl MaceConfig {
    pub fn sh_irreps(&self) -> Irreps {
        Irreps::spherical_harmonics(self.max_ell)
    }

    /// `hidden_irreps`, or `emb_dim` copies of every harmonic degree.
    pub fn hidden_irreps(&self) -> Irreps {
        match &self.hidden_irreps {
            Some(irreps) => irreps.clone(),
            None => self.sh_irreps().repeat(self.emb_dim).sort().simplify(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(MaceError::Config(msg));
        if !(self.r_max.is_finite() && self.r_max > 0.0) {
            return fail(format!("r_max must be positive, got {}", self.r_max));
        }
        for (name, value) in [
            ("num_bessel", self.num_bessel),
            ("correlation", self.correlation),
            ("num_layers", self.num_layers),
            ("emb_dim", self.emb_dim),
            ("mlp_dim", self.mlp_dim),
            ("in_dim", self.in_dim),
            ("out_dim", self.out_dim),
            ("encoder_dim", self.encoder_dim),
        ] {
            if value == 0 {
                return fail(format!("{name} must be at least 1"));
            }
        }
        let hidden = self.hidden_irreps();
        hidden.uniform_mul()?;
        if hidden.leading_scalars() == 0 {
            return fail(format!("hidden irreps {hidden} carry no leading scalars"));
        }
        // the skip connection and the invariant readout both read the first emb_dim channels
        let reads_scalars = self.residual || (!self.as_encoder && !self.equivariant_pred);
        if reads_scalars && hidden.leading_scalars() < self.emb_dim {
            return fail(format!(
                "{} scalar channels expected at the head of {hidden}, found {}",
                self.emb_dim,
                hidden.leading_scalars()
            ));
        }
        Ok(())
    }

    /// Parses JSON; unknown pooling or aggregation names are rejected.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MaceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
