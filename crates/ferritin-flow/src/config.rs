use crate::error::{FlowError, Result};
use ferritin_mace::{GraphParams, MaceConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Single and pair widths of one stage of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDims {
    pub single_dim: usize,
    pub pair_dim: usize,
}

/// Residue graph built from self-conditioning CA positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Edge budget as a fraction of the squared node count of the whole batch.
    pub max_squared_res_ratio: f64,
    pub min_residue_distance: i64,
    pub radius: f32,
    pub k: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_squared_res_ratio: 0.25,
            min_residue_distance: 5,
            radius: 5.0,
            k: 10,
        }
    }
}

impl GraphConfig {
    /// Graph rule for a batch holding `num_nodes` residues in total.
    pub fn params(&self, num_nodes: usize) -> GraphParams {
        let max_edges = (self.max_squared_res_ratio * (num_nodes * num_nodes) as f64).floor();
        GraphParams {
            max_edges: max_edges as usize,
            min_residue_distance: self.min_residue_distance,
            radius: self.radius,
            k: self.k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowModelConfig {
    /// Name of the sequence language model the checkpoint was trained with.
    pub esm2_model_key: String,
    /// Probability of masking a whole sequence during training.
    pub p_mask_sequence: f64,
    pub debug: bool,
    pub graph: GraphConfig,
    /// Raw output of the sequence language model.
    pub sequence_encoder: BlockDims,
    /// Output of the structure encoder, also the width of its initial embeddings.
    pub structure: BlockDims,
    pub trunk: BlockDims,
    pub decoder: BlockDims,
    /// Width of the MACE features after their adapter.
    pub mace_single_dim: usize,
    /// Relative positions are clipped to `[-relpos_k, relpos_k]`.
    pub relpos_k: usize,
    pub mace: Option<MaceConfig>,
}

impl Default for FlowModelConfig {
    fn default() -> Self {
        Self {
            esm2_model_key: "esm2_650M".to_string(),
            p_mask_sequence: 0.5,
            debug: false,
            graph: GraphConfig::default(),
            sequence_encoder: BlockDims {
                single_dim: 1280,
                pair_dim: 660,
            },
            structure: BlockDims {
                single_dim: 256,
                pair_dim: 128,
            },
            trunk: BlockDims {
                single_dim: 256,
                pair_dim: 128,
            },
            decoder: BlockDims {
                single_dim: 256,
                pair_dim: 128,
            },
            mace_single_dim: 256,
            relpos_k: 32,
            mace: Some(MaceConfig::default()),
        }
    }
}

impl FlowModelConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.p_mask_sequence) {
            return Err(FlowError::Config(format!(
                "p_mask_sequence must lie in [0, 1], got {}",
                self.p_mask_sequence
            )));
        }
        if self.decoder != self.structure {
            // the decoder input is averaged with the structure encoder's initial embeddings
            return Err(FlowError::Config(format!(
                "decoder dims {:?} must match structure dims {:?}",
                self.decoder, self.structure
            )));
        }
        if let Some(mace) = &self.mace {
            if !mace.as_encoder {
                return Err(FlowError::Config(
                    "the MACE branch needs per-residue output, set `as_encoder`".to_string(),
                ));
            }
            mace.validate()?;
        }
        Ok(())
    }
}
