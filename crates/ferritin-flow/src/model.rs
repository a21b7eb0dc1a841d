//! One flow-matching step over sequence, structure and geometric representations.
//!
//! The sequence embeddings, the structure encoder output and (when self-conditioning
//! coordinates exist) a MACE embedding of the residue graph are fused, refined by an
//! optional trunk, decoded into updated frames and turned into rotation and translation
//! vector fields.
use crate::adapters::{
    node_and_pair_masks, MaceEncoderToTrunkNetwork, ProjectConcatRepresentation,
    RepresentationBundle, RepresentationSource, SequenceToTrunkNetwork, TrunkToDecoderNetwork,
};
use crate::batch::FlowBatch;
use crate::checkpoint::Checkpoint;
use crate::config::FlowModelConfig;
use crate::contracts::{
    BackboneBuilder, FlowMatcher, SequenceEncoder, StructureDecoder, StructureDecoderInput,
    StructureEncoder, StructureEncoderInput, TrunkNetwork,
};
use crate::error::{FlowError, Result};
use crate::masking::sequence_mask_pattern;
use crate::mode::ModeState;
use crate::rigid::Rigid;
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::VarBuilder;
use ferritin_mace::{build_graphs, AtomicGraph, GraphBatch, MaceModel};
use rand::Rng;
use std::collections::HashMap;

/// Collaborators with their own weights and internals.
pub struct FF2Dependencies {
    pub flow_matcher: Box<dyn FlowMatcher>,
    pub bb_encoder: Box<dyn StructureEncoder>,
    pub bb_decoder: Box<dyn StructureDecoder>,
    pub seq_encoder: Box<dyn SequenceEncoder>,
    pub trunk_network: Option<Box<dyn TrunkNetwork>>,
    pub backbone: Box<dyn BackboneBuilder>,
}

struct MaceBranch {
    encoder: MaceModel,
    to_trunk: MaceEncoderToTrunkNetwork,
}

#[derive(Debug, Clone)]
pub struct FlowOutput {
    /// `[B, N, 3, 3]`
    pub rot_vectorfield: Tensor,
    /// `[B, N, 3]`
    pub trans_vectorfield: Tensor,
    /// `[B, N, 2]`
    pub psi: Tensor,
    /// `[B, N, 7]`
    pub rigids: Tensor,
    pub atom37: Tensor,
    pub atom14: Tensor,
}

impl FlowOutput {
    pub fn into_map(self) -> HashMap<String, Tensor> {
        HashMap::from([
            ("rot_vectorfield".to_string(), self.rot_vectorfield),
            ("trans_vectorfield".to_string(), self.trans_vectorfield),
            ("psi".to_string(), self.psi),
            ("rigids".to_string(), self.rigids),
            ("atom37".to_string(), self.atom37),
            ("atom14".to_string(), self.atom14),
        ])
    }
}

pub struct FF2Model {
    config: FlowModelConfig,
    deps: FF2Dependencies,
    bb_mace: Option<MaceBranch>,
    sequence_to_trunk_network: SequenceToTrunkNetwork,
    combiner_network: ProjectConcatRepresentation,
    trunk_to_decoder_network: TrunkToDecoderNetwork,
    state: ModeState,
}

fn norm(t: &Tensor) -> Result<f32> {
    Ok(t.to_dtype(DType::F32)?.sqr()?.sum_all()?.sqrt()?.to_scalar::<f32>()?)
}

impl FF2Model {
    pub fn load(vb: VarBuilder, config: FlowModelConfig, deps: FF2Dependencies) -> Result<Self> {
        config.validate()?;
        let encoder_key = deps.seq_encoder.model_key();
        if encoder_key != config.esm2_model_key {
            return Err(FlowError::Config(format!(
                "sequence encoder is {encoder_key}, but the model is configured for {}",
                config.esm2_model_key
            )));
        }
        let bb_mace = match &config.mace {
            Some(mace) => Some(MaceBranch {
                encoder: MaceModel::load(vb.pp("bb_mace_encoder"), mace)?,
                to_trunk: MaceEncoderToTrunkNetwork::load(
                    vb.pp("bb_mace_encoder_to_trunk_network"),
                    mace.encoder_dim,
                    config.mace_single_dim,
                )?,
            }),
            None => None,
        };
        let sequence_to_trunk_network = SequenceToTrunkNetwork::load(
            vb.pp("sequence_to_trunk_network"),
            config.sequence_encoder,
            config.trunk,
            config.relpos_k,
        )?;
        let combiner_network = ProjectConcatRepresentation::load(
            vb.pp("combiner_network"),
            config.structure.single_dim + config.trunk.single_dim + config.mace_single_dim,
            config.structure.pair_dim + config.trunk.pair_dim,
            config.trunk,
        )?;
        let trunk_to_decoder_network =
            TrunkToDecoderNetwork::load(vb.pp("trunk_to_decoder_network"), config.trunk, config.decoder)?;
        Ok(Self {
            config,
            deps,
            bb_mace,
            sequence_to_trunk_network,
            combiner_network,
            trunk_to_decoder_network,
            state: ModeState::default(),
        })
    }

    /// Builds the model from trained weights; see [`Checkpoint::remap`].
    pub fn from_checkpoint(
        checkpoint: Checkpoint,
        config: FlowModelConfig,
        deps: FF2Dependencies,
        device: &Device,
    ) -> Result<Self> {
        if config.mace.is_some() {
            log::info!("MACE encoder is ON in the model");
        } else {
            log::info!("MACE encoder is OFF in the model");
        }
        let state = checkpoint.remap(&config.esm2_model_key, deps.seq_encoder.esm_state_dict())?;
        let vb = VarBuilder::from_tensors(state, DType::F32, device);
        Self::load(vb, config, deps)
    }

    pub fn config(&self) -> &FlowModelConfig {
        &self.config
    }

    pub fn has_mace_encoder(&self) -> bool {
        self.bb_mace.is_some()
    }

    pub fn mode_state(&self) -> ModeState {
        self.state
    }

    pub fn training(&self) -> bool {
        self.state.training()
    }

    pub fn train(&mut self, training: bool) {
        self.state.train(training)
    }

    pub fn eval(&mut self) {
        self.state.eval()
    }

    pub fn conditional_generation(&mut self) {
        self.state.conditional_generation()
    }

    pub fn is_conditional_generation(&self) -> bool {
        self.state.is_conditional_generation()
    }

    pub fn scaffolding_generation(&mut self) {
        self.state.scaffolding_generation()
    }

    pub fn is_scaffolding_generation(&self) -> bool {
        self.state.is_scaffolding_generation()
    }

    pub fn forward(&self, batch: &FlowBatch) -> Result<FlowOutput> {
        self.forward_with_rng(batch, &mut rand::thread_rng())
    }

    /// [`FF2Model::forward`] with the sequence masking draws taken from `rng`.
    pub fn forward_with_rng<R: Rng + ?Sized>(&self, batch: &FlowBatch, rng: &mut R) -> Result<FlowOutput> {
        let device = batch.rigids_t.device();
        let init_rigids = Rigid::from_tensor_7(&batch.rigids_t)?;
        let t = &batch.t;
        let bb_mask = batch.res_mask.to_dtype(DType::F32)?;

        // sequence
        let seq_mask_pattern = sequence_mask_pattern(
            &self.state,
            &batch.aatype,
            batch.fixed_mask_seq.as_ref(),
            self.config.p_mask_sequence,
            rng,
        )?;
        let (seq_emb_s, seq_emb_z) = self.deps.seq_encoder.encode(
            &batch.aatype,
            &batch.chain_idx,
            &batch.res_mask,
            &seq_mask_pattern,
        )?;
        let (seq_emb_s, seq_emb_z) = self.sequence_to_trunk_network.forward(
            &seq_emb_s.to_device(device)?,
            &seq_emb_z.to_device(device)?,
            &batch.seq_idx,
            &batch.res_mask,
        )?;

        // structure
        let bb = self.deps.bb_encoder.encode(&StructureEncoderInput {
            res_mask: &batch.res_mask,
            fixed_mask: &batch.fixed_mask,
            seq_idx: &batch.seq_idx,
            chain_idx: &batch.chain_idx,
            t,
            rigids_t: &init_rigids,
            self_conditioning_ca: Some(&batch.sc_ca_t),
        })?;

        // geometry
        let has_self_conditioning = batch
            .sc_ca_t
            .ne(0.0)?
            .to_dtype(DType::U32)?
            .sum_all()?
            .to_scalar::<u32>()?
            > 0;
        let bb_mace_emb_s = match &self.bb_mace {
            Some(branch) if has_self_conditioning => {
                self.mace_embedding(branch, batch)?.to_dtype(bb.single_emb.dtype())?
            }
            _ => {
                let mut shape = batch.sc_ca_t.dims().to_vec();
                shape.pop();
                shape.push(self.config.mace_single_dim);
                Tensor::zeros(shape, bb.single_emb.dtype(), bb.single_emb.device())?
            }
        };

        if self.config.debug {
            log::info!("norm of seq_emb_s: {}", norm(&seq_emb_s)?);
            log::info!("norm of seq_emb_z: {}", norm(&seq_emb_z)?);
            log::info!("norm of bb_emb_s: {}", norm(&bb.single_emb)?);
            log::info!("norm of bb_emb_z: {}", norm(&bb.pair_emb)?);
            if has_self_conditioning && self.bb_mace.is_some() {
                log::info!("norm of bb_mace_emb_s: {}", norm(&bb_mace_emb_s)?);
            }
        }

        // fusion and trunk
        let single = RepresentationBundle::from([
            (RepresentationSource::Structure, bb.single_emb),
            (RepresentationSource::Sequence, seq_emb_s),
            (RepresentationSource::MaceGeometric, bb_mace_emb_s),
        ]);
        let pair = RepresentationBundle::from([
            (RepresentationSource::Structure, bb.pair_emb),
            (RepresentationSource::Sequence, seq_emb_z),
        ]);
        let (mut single_embed, mut pair_embed) = self.combiner_network.forward(&single, &pair)?;
        if let Some(trunk) = &self.deps.trunk_network {
            (single_embed, pair_embed) = trunk.forward(&single_embed, &pair_embed, &bb_mask)?;
        }

        let (single_embed, pair_embed) = self
            .trunk_to_decoder_network
            .forward(&single_embed, &pair_embed)?;
        let (node_mask, pair_mask) = node_and_pair_masks(&bb_mask, single_embed.dtype())?;
        let single_embed = (single_embed + &bb.init_single_embed)?
            .affine(0.5, 0.0)?
            .broadcast_mul(&node_mask)?;
        let pair_embed = (pair_embed + &bb.init_pair_embed)?
            .affine(0.5, 0.0)?
            .broadcast_mul(&pair_mask)?;

        // decode
        let decoded = self.deps.bb_decoder.decode(&StructureDecoderInput {
            res_mask: &batch.res_mask,
            fixed_mask: &batch.fixed_mask,
            t,
            single_embed: &single_embed,
            pair_embed: &pair_embed,
            rigids_t: &bb.rigids,
        })?;
        let mut psi = decoded.psi;
        if self.state.is_scaffolding_generation() {
            let torsions = batch
                .torsion_angles_sin_cos
                .as_ref()
                .ok_or(FlowError::MissingScaffoldInput("torsion_angles_sin_cos"))?;
            let gt_psi = torsions.narrow(D::Minus2, 2, 1)?.squeeze(D::Minus2)?;
            let mask = batch.fixed_mask.to_dtype(psi.dtype())?.unsqueeze(D::Minus1)?;
            psi = (psi.broadcast_mul(&mask.affine(-1.0, 1.0)?)?
                + gt_psi.to_dtype(psi.dtype())?.broadcast_mul(&mask)?)?;
        }

        // vector fields
        let rot_vectorfield = self
            .deps
            .flow_matcher
            .calc_rot_vectorfield(&decoded.rigids.rot_mats()?, &init_rigids.rot_mats()?, t)?
            .broadcast_mul(&bb_mask.unsqueeze(D::Minus1)?.unsqueeze(D::Minus1)?)?;
        let t_trans = t.reshape((t.elem_count(), 1, 1))?;
        let trans_vectorfield = self
            .deps
            .flow_matcher
            .calc_trans_vectorfield(decoded.rigids.trans(), init_rigids.trans(), &t_trans, true)?
            .broadcast_mul(&bb_mask.unsqueeze(D::Minus1)?)?;

        let atoms = self.deps.backbone.compute_backbone(&decoded.rigids, &psi)?;
        Ok(FlowOutput {
            rot_vectorfield,
            trans_vectorfield,
            psi,
            rigids: decoded.rigids.to_tensor_7()?,
            atom37: atoms.atom37.to_device(device)?,
            atom14: atoms.atom14.to_device(device)?,
        })
    }

    /// MACE node embeddings of the self-conditioning CA graph, `[B, N, mace_single_dim]`.
    fn mace_embedding(&self, branch: &MaceBranch, batch: &FlowBatch) -> Result<Tensor> {
        let ca = batch.sc_ca_t.to_dtype(DType::F32)?.to_vec3::<f32>()?;
        let res_idx = batch.graph_residue_index().to_dtype(DType::I64)?.to_vec2::<i64>()?;
        let positions: Vec<Vec<[f32; 3]>> = ca
            .iter()
            .map(|coords| coords.iter().map(|p| [p[0], p[1], p[2]]).collect())
            .collect();
        // one edge budget for the whole batch
        let total_nodes = positions.iter().map(Vec::len).sum();
        let params = self.config.graph.params(total_nodes);
        let structures: Vec<(&[[f32; 3]], &[i64])> = positions
            .iter()
            .zip(&res_idx)
            .map(|(p, r)| (p.as_slice(), r.as_slice()))
            .collect();
        let edges = build_graphs(&structures, &params);
        let mut graphs = Vec::with_capacity(positions.len());
        for (positions, edges) in positions.iter().zip(edges) {
            graphs.push(AtomicGraph::new(vec![0; positions.len()], positions.clone(), edges)?);
        }
        let graph = GraphBatch::from_graphs(&graphs, batch.sc_ca_t.device())?;
        let emb = branch.encoder.forward_t(&graph, self.state.training())?;
        if self.config.debug {
            log::info!("number of edges in the graph: {}", graph.edge_index.dim(1)?);
        }
        Ok(branch.to_trunk.forward(&emb)?)
    }
}
