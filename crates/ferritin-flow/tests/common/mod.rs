//! Deterministic stand-ins for the flow step's collaborators.
#![allow(dead_code)]
use candle_core::{DType, Device, Result, Tensor, D};
use ferritin_flow::contracts::{
    BackboneAtoms, BackboneBuilder, FlowMatcher, SequenceEncoder, StructureDecoder,
    StructureDecoderInput, StructureDecoding, StructureEncoder, StructureEncoderInput,
    StructureEncoding, TrunkNetwork,
};
use ferritin_flow::{BlockDims, FF2Dependencies, FlowBatch, FlowModelConfig, GraphConfig, Rigid};
use ferritin_mace::MaceConfig;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub const NUM_RESIDUES: usize = 12;

pub fn small_config(with_mace: bool) -> FlowModelConfig {
    let structure = BlockDims {
        single_dim: 6,
        pair_dim: 4,
    };
    FlowModelConfig {
        graph: GraphConfig {
            max_squared_res_ratio: 1.0,
            ..Default::default()
        },
        sequence_encoder: BlockDims {
            single_dim: 8,
            pair_dim: 3,
        },
        structure,
        trunk: BlockDims {
            single_dim: 5,
            pair_dim: 4,
        },
        decoder: structure,
        mace_single_dim: 5,
        relpos_k: 4,
        mace: with_mace.then(|| MaceConfig {
            num_bessel: 4,
            max_ell: 1,
            correlation: 2,
            num_layers: 2,
            emb_dim: 4,
            mlp_dim: 8,
            encoder_dim: 6,
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub struct StubStructureEncoder(pub BlockDims);

impl StructureEncoder for StubStructureEncoder {
    fn encode(&self, input: &StructureEncoderInput) -> Result<StructureEncoding> {
        let (b, n) = input.res_mask.dims2()?;
        let device = input.res_mask.device();
        let BlockDims {
            single_dim,
            pair_dim,
        } = self.0;
        let single_emb = input
            .rigids_t
            .trans()
            .sum_keepdim(D::Minus1)?
            .broadcast_as((b, n, single_dim))?
            .contiguous()?;
        Ok(StructureEncoding {
            single_emb,
            pair_emb: Tensor::ones((b, n, n, pair_dim), DType::F32, device)?,
            rigids: input.rigids_t.clone(),
            init_single_embed: Tensor::ones((b, n, single_dim), DType::F32, device)?,
            init_pair_embed: Tensor::zeros((b, n, n, pair_dim), DType::F32, device)?,
        })
    }
}

/// Shifts the frames by the first three single channels; psi from the first two.
pub struct StubStructureDecoder;

impl StructureDecoder for StubStructureDecoder {
    fn decode(&self, input: &StructureDecoderInput) -> Result<StructureDecoding> {
        let shift = input.single_embed.narrow(D::Minus1, 0, 3)?.tanh()?;
        let trans = (input.rigids_t.trans() + shift)?;
        Ok(StructureDecoding {
            rigids: Rigid::new(input.rigids_t.quats().clone(), trans)?,
            psi: input.single_embed.narrow(D::Minus1, 0, 2)?.tanh()?,
        })
    }
}

/// [`StubStructureDecoder`] that keeps the last psi it produced.
#[derive(Default, Clone)]
pub struct RecordingDecoder {
    pub last_psi: Rc<RefCell<Option<Tensor>>>,
}

impl StructureDecoder for RecordingDecoder {
    fn decode(&self, input: &StructureDecoderInput) -> Result<StructureDecoding> {
        let decoded = StubStructureDecoder.decode(input)?;
        *self.last_psi.borrow_mut() = Some(decoded.psi.clone());
        Ok(decoded)
    }
}

pub struct StubSequenceEncoder(pub BlockDims);

impl SequenceEncoder for StubSequenceEncoder {
    fn encode(
        &self,
        aatype: &Tensor,
        _chain_idx: &Tensor,
        attn_mask: &Tensor,
        seq_mask: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let (b, n) = aatype.dims2()?;
        let visible = seq_mask.to_dtype(DType::F32)?.affine(-1.0, 1.0)?;
        let a = aatype
            .to_dtype(DType::F32)?
            .mul(&visible)?
            .mul(&attn_mask.to_dtype(DType::F32)?)?
            .affine(0.1, 0.5)?
            .unsqueeze(D::Minus1)?;
        let single = a.broadcast_as((b, n, self.0.single_dim))?.contiguous()?;
        let pair = a
            .unsqueeze(2)?
            .broadcast_mul(&a.unsqueeze(1)?)?
            .broadcast_as((b, n, n, self.0.pair_dim))?
            .contiguous()?;
        Ok((single, pair))
    }

    fn model_key(&self) -> &str {
        "esm2_650M"
    }

    fn esm_state_dict(&self) -> HashMap<String, Tensor> {
        let w = Tensor::ones((2, 2), DType::F32, &Device::Cpu).unwrap();
        HashMap::from([("esm.embed.weight".to_string(), w)])
    }
}

pub struct StubFlowMatcher;

impl FlowMatcher for StubFlowMatcher {
    fn calc_rot_vectorfield(&self, pred_rot: &Tensor, init_rot: &Tensor, _t: &Tensor) -> Result<Tensor> {
        pred_rot - init_rot
    }

    fn calc_trans_vectorfield(
        &self,
        pred_trans: &Tensor,
        init_trans: &Tensor,
        t: &Tensor,
        _scale: bool,
    ) -> Result<Tensor> {
        (pred_trans - init_trans)?.broadcast_div(&t.affine(-1.0, 1.01)?)
    }
}

pub struct StubBackbone;

impl BackboneBuilder for StubBackbone {
    fn compute_backbone(&self, rigids: &Rigid, _psi: &Tensor) -> Result<BackboneAtoms> {
        let ca = rigids.trans().unsqueeze(2)?;
        let (b, n, _, _) = ca.dims4()?;
        Ok(BackboneAtoms {
            atom37: ca.broadcast_as((b, n, 37, 3))?.contiguous()?,
            atom14: ca.broadcast_as((b, n, 14, 3))?.contiguous()?,
        })
    }
}

pub struct IdentityTrunk;

impl TrunkNetwork for IdentityTrunk {
    fn forward(&self, single: &Tensor, pair: &Tensor, _mask: &Tensor) -> Result<(Tensor, Tensor)> {
        Ok((single.clone(), pair.clone()))
    }
}

pub fn dependencies(config: &FlowModelConfig, trunk: bool) -> FF2Dependencies {
    FF2Dependencies {
        flow_matcher: Box::new(StubFlowMatcher),
        bb_encoder: Box::new(StubStructureEncoder(config.structure)),
        bb_decoder: Box::new(StubStructureDecoder),
        seq_encoder: Box::new(StubSequenceEncoder(config.sequence_encoder)),
        trunk_network: if trunk {
            Some(Box::new(IdentityTrunk))
        } else {
            None
        },
        backbone: Box::new(StubBackbone),
    }
}

/// CA trace of an ideal helix.
pub fn helix(n: usize) -> Vec<[f32; 3]> {
    (0..n)
        .map(|i| {
            let angle = (100.0f32 * i as f32).to_radians();
            [2.3 * angle.cos(), 2.3 * angle.sin(), 1.5 * i as f32]
        })
        .collect()
}

/// Two structures of [`NUM_RESIDUES`] residues, the last one padding.
pub fn batch(self_conditioning: bool, device: &Device) -> Result<FlowBatch> {
    let (b, n) = (2, NUM_RESIDUES);
    let mut rigids = Vec::with_capacity(b * n * 7);
    let mut sc_ca = Vec::with_capacity(b * n * 3);
    for g in 0..b {
        for (i, p) in helix(n).into_iter().enumerate() {
            rigids.extend([1.0, 0.0, 0.0, 0.0, p[0], p[1] + g as f32, p[2] - 0.1 * i as f32]);
            if self_conditioning {
                sc_ca.extend([p[0] + g as f32, p[1], p[2]]);
            } else {
                sc_ca.extend([0.0; 3]);
            }
        }
    }
    let res_mask: Vec<f32> = (0..b * n).map(|i| if i % n == n - 1 { 0.0 } else { 1.0 }).collect();
    let aatype: Vec<u32> = (0..b * n).map(|i| (i % 20) as u32).collect();
    let seq_idx: Vec<u32> = (0..b * n).map(|i| (i % n) as u32).collect();
    let fixed: Vec<f32> = (0..b * n).map(|i| (i % 2) as f32).collect();

    let map = HashMap::from([
        ("rigids_t".to_string(), Tensor::from_vec(rigids, (b, n, 7), device)?),
        ("t".to_string(), Tensor::new(&[0.3f32, 0.7], device)?),
        ("res_mask".to_string(), Tensor::from_vec(res_mask, (b, n), device)?),
        ("aatype".to_string(), Tensor::from_vec(aatype, (b, n), device)?),
        ("chain_idx".to_string(), Tensor::zeros((b, n), DType::U32, device)?),
        ("seq_idx".to_string(), Tensor::from_vec(seq_idx, (b, n), device)?),
        ("fixed_mask".to_string(), Tensor::from_vec(fixed.clone(), (b, n), device)?),
        ("fixed_mask_seq".to_string(), Tensor::from_vec(fixed, (b, n), device)?),
        ("sc_ca_t".to_string(), Tensor::from_vec(sc_ca, (b, n, 3), device)?),
    ]);
    FlowBatch::from_map(map).map_err(|e| candle_core::Error::Msg(e.to_string()))
}

pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    (a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()
}
