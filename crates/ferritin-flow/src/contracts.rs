//! Narrow interfaces of the collaborators used by [`crate::FF2Model`].
//!
//! Shapes use `B` for the batch, `N` for residues.
use crate::rigid::Rigid;
use candle_core::{Result, Tensor};
use std::collections::HashMap;

pub struct StructureEncoderInput<'a> {
    /// `[B, N]`
    pub res_mask: &'a Tensor,
    /// `[B, N]`
    pub fixed_mask: &'a Tensor,
    pub seq_idx: &'a Tensor,
    pub chain_idx: &'a Tensor,
    /// `[B]`
    pub t: &'a Tensor,
    pub rigids_t: &'a Rigid,
    /// `[B, N, 3]`
    pub self_conditioning_ca: Option<&'a Tensor>,
}

#[derive(Debug, Clone)]
pub struct StructureEncoding {
    pub single_emb: Tensor,
    pub pair_emb: Tensor,
    pub rigids: Rigid,
    pub init_single_embed: Tensor,
    pub init_pair_embed: Tensor,
}

pub trait StructureEncoder {
    fn encode(&self, input: &StructureEncoderInput) -> Result<StructureEncoding>;
}

pub struct StructureDecoderInput<'a> {
    pub res_mask: &'a Tensor,
    pub fixed_mask: &'a Tensor,
    pub t: &'a Tensor,
    pub single_embed: &'a Tensor,
    pub pair_embed: &'a Tensor,
    pub rigids_t: &'a Rigid,
}

#[derive(Debug, Clone)]
pub struct StructureDecoding {
    pub rigids: Rigid,
    /// `[B, N, 2]` sine and cosine
    pub psi: Tensor,
}

pub trait StructureDecoder {
    fn decode(&self, input: &StructureDecoderInput) -> Result<StructureDecoding>;
}

/// Frozen protein language model.
pub trait SequenceEncoder {
    /// `(single [B, N, C_s], pair [B, N, N, C_z])`
    fn encode(
        &self,
        aatype: &Tensor,
        chain_idx: &Tensor,
        attn_mask: &Tensor,
        seq_mask: &Tensor,
    ) -> Result<(Tensor, Tensor)>;

    /// Version string recorded in checkpoints.
    fn model_key(&self) -> &str;

    /// Parameters of the language model, named as the model names them.
    fn esm_state_dict(&self) -> HashMap<String, Tensor> {
        HashMap::new()
    }
}

pub trait TrunkNetwork {
    fn forward(&self, single: &Tensor, pair: &Tensor, mask: &Tensor) -> Result<(Tensor, Tensor)>;
}

pub trait FlowMatcher {
    /// Rotation vector field `[B, N, 3, 3]` between predicted and initial rotations.
    fn calc_rot_vectorfield(&self, pred_rot: &Tensor, init_rot: &Tensor, t: &Tensor) -> Result<Tensor>;

    /// Translation vector field `[B, N, 3]`; `t` arrives as `[B, 1, 1]`.
    fn calc_trans_vectorfield(
        &self,
        pred_trans: &Tensor,
        init_trans: &Tensor,
        t: &Tensor,
        scale: bool,
    ) -> Result<Tensor>;
}

#[derive(Debug, Clone)]
pub struct BackboneAtoms {
    /// `[B, N, 37, 3]`
    pub atom37: Tensor,
    /// `[B, N, 14, 3]`
    pub atom14: Tensor,
}

pub trait BackboneBuilder {
    fn compute_backbone(&self, rigids: &Rigid, psi: &Tensor) -> Result<BackboneAtoms>;
}
