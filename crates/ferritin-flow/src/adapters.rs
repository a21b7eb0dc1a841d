//! Trainable glue between the encoders, the trunk and the decoder.
use crate::config::BlockDims;
use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::{embedding, layer_norm, linear, Embedding, LayerNorm, Linear, VarBuilder};
use std::collections::BTreeMap;
use strum::{Display, EnumIter};

/// Where a representation came from. Fusion concatenates sources in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum RepresentationSource {
    Structure,
    Sequence,
    MaceGeometric,
}

pub type RepresentationBundle = BTreeMap<RepresentationSource, Tensor>;

/// `[B, N]` residue mask as `[B, N, 1]` and `[B, N, N, 1]` float masks.
pub fn node_and_pair_masks(res_mask: &Tensor, dtype: DType) -> Result<(Tensor, Tensor)> {
    let m = res_mask.to_dtype(dtype)?;
    let node = m.unsqueeze(D::Minus1)?;
    let pair = node.broadcast_mul(&m.unsqueeze(D::Minus2)?)?.unsqueeze(D::Minus1)?;
    Ok((node, pair))
}

/// LayerNorm and projection of the language model embeddings, plus a clipped
/// relative position embedding on the pair track.
#[derive(Debug, Clone)]
pub struct SequenceToTrunkNetwork {
    layer_norm_s: LayerNorm,
    linear_s: Linear,
    layer_norm_z: LayerNorm,
    linear_z: Linear,
    relpos: Embedding,
    relpos_k: usize,
}

impl SequenceToTrunkNetwork {
    pub fn load(vb: VarBuilder, input: BlockDims, output: BlockDims, relpos_k: usize) -> Result<Self> {
        Ok(Self {
            layer_norm_s: layer_norm(input.single_dim, 1e-5, vb.pp("layer_norm_s"))?,
            linear_s: linear(input.single_dim, output.single_dim, vb.pp("linear_s"))?,
            layer_norm_z: layer_norm(input.pair_dim, 1e-5, vb.pp("layer_norm_z"))?,
            linear_z: linear(input.pair_dim, output.pair_dim, vb.pp("linear_z"))?,
            relpos: embedding(2 * relpos_k + 1, output.pair_dim, vb.pp("relpos"))?,
            relpos_k,
        })
    }

    fn relative_positions(&self, seq_idx: &Tensor) -> Result<Tensor> {
        let idx = seq_idx.to_dtype(DType::F32)?;
        let k = self.relpos_k as f64;
        let d = idx
            .unsqueeze(D::Minus1)?
            .broadcast_sub(&idx.unsqueeze(D::Minus2)?)?
            .clamp(-k, k)?
            .affine(1.0, k)?
            .to_dtype(DType::U32)?;
        self.relpos.forward(&d)
    }

    pub fn forward(
        &self,
        single: &Tensor,
        pair: &Tensor,
        seq_idx: &Tensor,
        res_mask: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let (node_mask, pair_mask) = node_and_pair_masks(res_mask, single.dtype())?;
        let s = self
            .linear_s
            .forward(&self.layer_norm_s.forward(single)?)?
            .broadcast_mul(&node_mask)?;
        let z = self.linear_z.forward(&self.layer_norm_z.forward(pair)?)?;
        let relpos = self.relative_positions(seq_idx)?.to_dtype(pair.dtype())?;
        let z = (z + relpos)?.broadcast_mul(&pair_mask)?;
        Ok((s, z))
    }
}

/// Maps MACE node scalars into the trunk's single track.
#[derive(Debug, Clone)]
pub struct MaceEncoderToTrunkNetwork {
    layer_norm: LayerNorm,
    linear: Linear,
}

impl MaceEncoderToTrunkNetwork {
    pub fn load(vb: VarBuilder, encoder_dim: usize, single_dim: usize) -> Result<Self> {
        Ok(Self {
            layer_norm: layer_norm(encoder_dim, 1e-5, vb.pp("layer_norm"))?,
            linear: linear(encoder_dim, single_dim, vb.pp("linear"))?,
        })
    }
}

impl Module for MaceEncoderToTrunkNetwork {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.linear.forward(&self.layer_norm.forward(xs)?)
    }
}

/// Concatenates every source and projects the result with one linear per track.
#[derive(Debug, Clone)]
pub struct ProjectConcatRepresentation {
    linear_s: Linear,
    linear_z: Linear,
}

impl ProjectConcatRepresentation {
    pub fn load(vb: VarBuilder, single_in: usize, pair_in: usize, output: BlockDims) -> Result<Self> {
        Ok(Self {
            linear_s: linear(single_in, output.single_dim, vb.pp("linear_s"))?,
            linear_z: linear(pair_in, output.pair_dim, vb.pp("linear_z"))?,
        })
    }

    pub fn forward(
        &self,
        single: &RepresentationBundle,
        pair: &RepresentationBundle,
    ) -> Result<(Tensor, Tensor)> {
        let s = Tensor::cat(&single.values().collect::<Vec<_>>(), D::Minus1)?;
        let z = Tensor::cat(&pair.values().collect::<Vec<_>>(), D::Minus1)?;
        Ok((self.linear_s.forward(&s)?, self.linear_z.forward(&z)?))
    }
}

/// Linear then LayerNorm on both tracks, into the decoder's widths.
#[derive(Debug, Clone)]
pub struct TrunkToDecoderNetwork {
    linear_s: Linear,
    layer_norm_s: LayerNorm,
    linear_z: Linear,
    layer_norm_z: LayerNorm,
}

impl TrunkToDecoderNetwork {
    pub fn load(vb: VarBuilder, input: BlockDims, output: BlockDims) -> Result<Self> {
        Ok(Self {
            linear_s: linear(input.single_dim, output.single_dim, vb.pp("linear_s"))?,
            layer_norm_s: layer_norm(output.single_dim, 1e-5, vb.pp("layer_norm_s"))?,
            linear_z: linear(input.pair_dim, output.pair_dim, vb.pp("linear_z"))?,
            layer_norm_z: layer_norm(output.pair_dim, 1e-5, vb.pp("layer_norm_z"))?,
        })
    }

    pub fn forward(&self, single: &Tensor, pair: &Tensor) -> Result<(Tensor, Tensor)> {
        let s = self.layer_norm_s.forward(&self.linear_s.forward(single)?)?;
        let z = self.layer_norm_z.forward(&self.linear_z.forward(pair)?)?;
        Ok((s, z))
    }
}
