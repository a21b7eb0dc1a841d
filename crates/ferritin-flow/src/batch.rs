use crate::error::{FlowError, Result};
use candle_core::Tensor;
use std::collections::HashMap;

/// Inputs of one flow step, `B` structures of `N` residues.
#[derive(Debug, Clone)]
pub struct FlowBatch {
    /// `[B, N, 7]` noisy frames
    pub rigids_t: Tensor,
    /// `[B]`
    pub t: Tensor,
    /// `[B, N]`
    pub res_mask: Tensor,
    pub aatype: Tensor,
    pub chain_idx: Tensor,
    pub seq_idx: Tensor,
    /// `[B, N]`, 1 where the structure is held fixed
    pub fixed_mask: Tensor,
    /// `[B, N, 3]` self-conditioning CA positions, all zero on the first pass
    pub sc_ca_t: Tensor,
    pub residue_index: Option<Tensor>,
    /// `[B, N]`, 1 where the sequence is held fixed
    pub fixed_mask_seq: Option<Tensor>,
    /// `[B, N, 7, 2]`
    pub torsion_angles_sin_cos: Option<Tensor>,
}

impl FlowBatch {
    pub const REQUIRED_KEYS: [&'static str; 8] = [
        "rigids_t",
        "t",
        "res_mask",
        "aatype",
        "chain_idx",
        "seq_idx",
        "fixed_mask",
        "sc_ca_t",
    ];

    /// Builds a batch from named tensors; unknown keys are ignored.
    pub fn from_map(mut map: HashMap<String, Tensor>) -> Result<Self> {
        let mut take = |key: &'static str| map.remove(key).ok_or(FlowError::MissingBatchKey(key));
        let rigids_t = take("rigids_t")?;
        let t = take("t")?;
        let res_mask = take("res_mask")?;
        let aatype = take("aatype")?;
        let chain_idx = take("chain_idx")?;
        let seq_idx = take("seq_idx")?;
        let fixed_mask = take("fixed_mask")?;
        let sc_ca_t = take("sc_ca_t")?;
        Ok(Self {
            rigids_t,
            t,
            res_mask,
            aatype,
            chain_idx,
            seq_idx,
            fixed_mask,
            sc_ca_t,
            residue_index: map.remove("residue_index"),
            fixed_mask_seq: map.remove("fixed_mask_seq"),
            torsion_angles_sin_cos: map.remove("torsion_angles_sin_cos"),
        })
    }

    /// Residue numbering used for the MACE graph.
    pub fn graph_residue_index(&self) -> &Tensor {
        self.residue_index.as_ref().unwrap_or(&self.seq_idx)
    }
}
