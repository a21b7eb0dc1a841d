//! MACE: higher order equivariant message passing.
//!
//! Atom types are embedded as scalars, then every layer runs a tensor product
//! convolution followed by a many-body product block. The stack ends either in an
//! encoder head (per-node scalars) or in a pooled per-graph prediction.
use crate::config::{MaceConfig, Pooling};
use crate::error::{MaceError, Result};
use crate::graph::GraphBatch;
use crate::harmonics::SphericalHarmonics;
use crate::irreps::Irreps;
use crate::layers::{
    EquivariantBatchNorm, EquivariantLinear, EquivariantProductBasisBlock, IrrepsReshape,
    TensorProductConvLayer,
};
use crate::radial::{edge_vectors_and_lengths, validate_edge_lengths, RadialEmbeddingBlock};
use candle_core::{DType, Module, Tensor, D};
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder};

#[derive(Debug, Clone)]
enum PredictionHead {
    /// Linear map of the full pooled features.
    Equivariant(Linear),
    /// `Linear -> ReLU -> Linear` on the pooled leading scalars.
    Invariant { pred0: Linear, pred2: Linear },
}

impl Module for PredictionHead {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Equivariant(pred) => pred.forward(xs),
            Self::Invariant { pred0, pred2 } => pred2.forward(&pred0.forward(xs)?.relu()?),
        }
    }
}

#[derive(Debug, Clone)]
enum Readout {
    Encoder {
        linear: EquivariantLinear,
        norm: Option<EquivariantBatchNorm>,
        dim: usize,
    },
    Prediction {
        pool: Pooling,
        head: PredictionHead,
    },
}

#[derive(Debug, Clone)]
pub struct MaceModel {
    config: MaceConfig,
    hidden_irreps: Irreps,
    radial_embedding: RadialEmbeddingBlock,
    spherical_harmonics: SphericalHarmonics,
    emb_in: Embedding,
    convs: Vec<TensorProductConvLayer>,
    reshapes: Vec<IrrepsReshape>,
    prods: Vec<EquivariantProductBasisBlock>,
    readout: Readout,
}

impl MaceModel {
    pub fn load(vb: VarBuilder, config: &MaceConfig) -> Result<Self> {
        config.validate()?;
        let radial_embedding =
            RadialEmbeddingBlock::new(config.r_max, config.num_bessel, config.num_polynomial_cutoff);
        let spherical_harmonics = SphericalHarmonics::new(config.max_ell);
        let sh_irreps = spherical_harmonics.irreps().clone();
        let hidden_irreps = config.hidden_irreps();
        let emb_in = embedding(config.in_dim, config.emb_dim, vb.pp("emb_in"))?;

        let mut convs = Vec::with_capacity(config.num_layers);
        let mut reshapes = Vec::with_capacity(config.num_layers);
        let mut prods = Vec::with_capacity(config.num_layers);
        let mut in_irreps = Irreps::scalars(config.emb_dim);
        for i in 0..config.num_layers {
            convs.push(TensorProductConvLayer::load(
                vb.pp(format!("convs.{i}")),
                &in_irreps,
                &hidden_irreps,
                &sh_irreps,
                radial_embedding.out_dim,
                config.mlp_dim,
                config.aggr,
                config.batch_norm,
            )?);
            reshapes.push(IrrepsReshape::new(&hidden_irreps)?);
            prods.push(EquivariantProductBasisBlock::load(
                vb.pp(format!("prods.{i}")),
                &hidden_irreps,
                &hidden_irreps,
                config.correlation,
                config.residual,
            )?);
            in_irreps = hidden_irreps.clone();
        }

        let readout = if config.as_encoder {
            let final_irreps = Irreps::scalars(config.encoder_dim);
            let linear =
                EquivariantLinear::load(vb.pp("encoder_head.0"), &hidden_irreps, &final_irreps)?;
            let norm = if config.batch_norm {
                Some(EquivariantBatchNorm::load(vb.pp("encoder_head.1"), &final_irreps)?)
            } else {
                None
            };
            Readout::Encoder {
                linear,
                norm,
                dim: config.encoder_dim,
            }
        } else if config.equivariant_pred {
            Readout::Prediction {
                pool: config.pool,
                head: PredictionHead::Equivariant(linear(
                    hidden_irreps.dim(),
                    config.out_dim,
                    vb.pp("pred"),
                )?),
            }
        } else {
            Readout::Prediction {
                pool: config.pool,
                head: PredictionHead::Invariant {
                    pred0: linear(config.emb_dim, config.emb_dim, vb.pp("pred.0"))?,
                    pred2: linear(config.emb_dim, config.out_dim, vb.pp("pred.2"))?,
                },
            }
        };

        log::info!(
            "MACE: {} layers, hidden {hidden_irreps}, sh {sh_irreps}, correlation {}",
            config.num_layers,
            config.correlation
        );
        Ok(Self {
            config: config.clone(),
            hidden_irreps,
            radial_embedding,
            spherical_harmonics,
            emb_in,
            convs,
            reshapes,
            prods,
            readout,
        })
    }

    pub fn config(&self) -> &MaceConfig {
        &self.config
    }

    pub fn hidden_irreps(&self) -> &Irreps {
        &self.hidden_irreps
    }

    pub fn convs(&self) -> &[TensorProductConvLayer] {
        &self.convs
    }

    /// Width of the last axis of [`MaceModel::forward_t`].
    pub fn output_dim(&self) -> usize {
        match &self.readout {
            Readout::Encoder { dim, .. } => *dim,
            Readout::Prediction { .. } => self.config.out_dim,
        }
    }

    /// Node features after the message passing stack, `[num_nodes, hidden.dim()]`.
    pub fn node_features(&self, graph: &GraphBatch, train: bool) -> Result<Tensor> {
        let mut h = self.emb_in.forward(&graph.node_types)?;

        let (vectors, lengths) = edge_vectors_and_lengths(&graph.positions, &graph.edge_index)?;
        validate_edge_lengths(&lengths)?;
        let edge_sh = self.spherical_harmonics.forward(&vectors)?;
        let edge_feats = self.radial_embedding.forward(&lengths)?;

        for ((conv, reshape), prod) in self.convs.iter().zip(&self.reshapes).zip(&self.prods) {
            let h_update = conv.forward_t(&h, &graph.edge_index, &edge_sh, &edge_feats, train)?;
            let sc = if self.config.residual {
                // validation keeps the hidden width at least emb_dim
                let pad = h_update.dim(1)?.saturating_sub(h.dim(1)?);
                Some(h.pad_with_zeros(D::Minus1, 0, pad)?)
            } else {
                None
            };
            h = prod.forward(&reshape.forward(&h_update)?, sc.as_ref())?;
        }
        Ok(h)
    }

    /// Encoder mode: `[num_graphs, nodes_per_graph, encoder_dim]`.
    /// Prediction mode: `[num_graphs, out_dim]`.
    pub fn forward_t(&self, graph: &GraphBatch, train: bool) -> Result<Tensor> {
        let h = self.node_features(graph, train)?;
        match &self.readout {
            Readout::Encoder { linear, norm, dim } => {
                let mut h = linear.forward(&h)?;
                if let Some(norm) = norm {
                    h = norm.forward_t(&h, train)?;
                }
                let nodes = graph.nodes_per_graph.first().copied().unwrap_or(0);
                if graph.nodes_per_graph.iter().any(|&n| n != nodes) {
                    return Err(MaceError::Config(format!(
                        "encoder output needs equally sized graphs, got {:?}",
                        graph.nodes_per_graph
                    )));
                }
                Ok(h.reshape((graph.num_graphs, nodes, *dim))?)
            }
            Readout::Prediction { pool, head } => {
                let dim = h.dim(1)?;
                let zeros = Tensor::zeros((graph.num_graphs, dim), h.dtype(), h.device())?;
                let mut pooled = zeros.index_add(&graph.batch, &h, 0)?;
                if *pool == Pooling::Mean {
                    let ones = Tensor::ones(h.dim(0)?, DType::F32, h.device())?;
                    let counts = Tensor::zeros(graph.num_graphs, DType::F32, h.device())?
                        .index_add(&graph.batch, &ones, 0)?
                        .clamp(1f32, f32::MAX)?
                        .to_dtype(h.dtype())?
                        .unsqueeze(1)?;
                    pooled = pooled.broadcast_div(&counts)?;
                }
                if let PredictionHead::Invariant { .. } = head {
                    pooled = pooled.narrow(D::Minus1, 0, self.config.emb_dim)?;
                }
                Ok(head.forward(&pooled)?)
            }
        }
    }
}
