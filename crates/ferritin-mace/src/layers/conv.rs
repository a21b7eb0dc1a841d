use super::norm::EquivariantBatchNorm;
use super::reshape::{merge_blocks, split_blocks};
use crate::config::Aggregation;
use crate::coupling::{coupling_tensor, fully_connected_paths, CouplingPath};
use crate::error::IrrepsError;
use crate::irreps::Irreps;
use candle_core::{DType, Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

#[derive(Debug, Clone)]
struct ConvPath {
    path: CouplingPath,
    mul1: usize,
    mul2: usize,
    mul_out: usize,
    weight_offset: usize,
    // [d1 * d2, d3]
    coupling: Tensor,
}

/// One message passing step.
///
/// Each edge couples the features of its source node with the spherical harmonics of
/// the edge through a fully connected tensor product whose path weights come from an
/// MLP over the radial features. Messages are reduced onto the target node.
#[derive(Debug, Clone)]
pub struct TensorProductConvLayer {
    in_irreps: Irreps,
    sh_irreps: Irreps,
    out_irreps: Irreps,
    paths: Vec<ConvPath>,
    path_norm: Vec<f64>,
    weight_numel: usize,
    // radial MLP: fc.0 -> ReLU -> fc.2
    fc0: Linear,
    fc2: Linear,
    aggr: Aggregation,
    batch_norm: Option<EquivariantBatchNorm>,
}

impl TensorProductConvLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        vb: VarBuilder,
        in_irreps: &Irreps,
        out_irreps: &Irreps,
        sh_irreps: &Irreps,
        edge_feats_dim: usize,
        mlp_dim: usize,
        aggr: Aggregation,
        batch_norm: bool,
    ) -> crate::Result<Self> {
        let coupling_paths = fully_connected_paths(in_irreps, sh_irreps, out_irreps);
        if coupling_paths.is_empty() {
            return Err(IrrepsError::NoPaths(out_irreps.to_string()).into());
        }
        let mut paths = Vec::with_capacity(coupling_paths.len());
        let mut fan_in = vec![0usize; out_irreps.len()];
        let mut weight_numel = 0;
        for path in coupling_paths {
            let (mul1, mul2, mul_out) = (
                in_irreps.get(path.in1).map_or(0, |m| m.mul),
                sh_irreps.get(path.in2).map_or(0, |m| m.mul),
                out_irreps.get(path.out).map_or(0, |m| m.mul),
            );
            fan_in[path.out] += mul1 * mul2;
            paths.push(ConvPath {
                path,
                mul1,
                mul2,
                mul_out,
                weight_offset: weight_numel,
                coupling: coupling_tensor(path.l1, path.l2, path.l3, vb.device())?,
            });
            weight_numel += mul1 * mul2 * mul_out;
        }
        let path_norm = fan_in
            .iter()
            .map(|&f| if f > 0 { 1.0 / (f as f64).sqrt() } else { 0.0 })
            .collect();

        let fc0 = linear(edge_feats_dim, mlp_dim, vb.pp("fc.0"))?;
        let fc2 = linear(mlp_dim, weight_numel, vb.pp("fc.2"))?;
        let batch_norm = if batch_norm {
            Some(EquivariantBatchNorm::load(vb.pp("batch_norm"), out_irreps)?)
        } else {
            None
        };
        log::debug!(
            "conv {in_irreps} x {sh_irreps} -> {out_irreps}: {} paths, {weight_numel} weights",
            paths.len()
        );
        Ok(Self {
            in_irreps: in_irreps.clone(),
            sh_irreps: sh_irreps.clone(),
            out_irreps: out_irreps.clone(),
            paths,
            path_norm,
            weight_numel,
            fc0,
            fc2,
            aggr,
            batch_norm,
        })
    }

    pub fn weight_numel(&self) -> usize {
        self.weight_numel
    }

    pub fn num_paths(&self) -> usize {
        self.paths.len()
    }

    pub fn out_irreps(&self) -> &Irreps {
        &self.out_irreps
    }

    /// Per-edge tensor product `x1 (x) x2 -> out`, weights `[E, weight_numel]`.
    fn tensor_product(&self, x1: &Tensor, x2: &Tensor, weights: &Tensor) -> candle_core::Result<Tensor> {
        let e = x1.dim(0)?;
        let blocks1 = split_blocks(x1, &self.in_irreps)?;
        let blocks2 = split_blocks(x2, &self.sh_irreps)?;
        let mut out: Vec<Option<Tensor>> = vec![None; self.out_irreps.len()];
        for p in &self.paths {
            let (d1, d2, d3) = (2 * p.path.l1 + 1, 2 * p.path.l2 + 1, 2 * p.path.l3 + 1);
            let a = blocks1[p.path.in1].reshape((e, p.mul1, 1, d1, 1))?;
            let b = blocks2[p.path.in2].reshape((e, 1, p.mul2, 1, d2))?;
            // [E, mul1 * mul2, d3]
            let coupled = a
                .broadcast_mul(&b)?
                .reshape((e, p.mul1 * p.mul2, d1 * d2))?
                .broadcast_matmul(&p.coupling)?;
            let w = weights
                .narrow(1, p.weight_offset, p.mul1 * p.mul2 * p.mul_out)?
                .reshape((e, p.mul1 * p.mul2, p.mul_out))?
                .transpose(1, 2)?
                .contiguous()?;
            let y = w.matmul(&coupled)?;
            debug_assert_eq!(y.dims(), &[e, p.mul_out, d3]);
            out[p.path.out] = Some(match out[p.path.out].take() {
                Some(acc) => (acc + y)?,
                None => y,
            });
        }
        let blocks = out
            .into_iter()
            .zip(self.out_irreps.iter().zip(self.path_norm.iter()))
            .map(|(block, (mo, &norm))| match block {
                Some(b) => b.affine(norm, 0.0),
                None => Tensor::zeros((e, mo.mul, mo.irrep.dim()), x1.dtype(), x1.device()),
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        merge_blocks(&blocks)
    }

    /// `node_feats [N, in_dim]`, `edge_index [2, E]`, `edge_sh [E, sh_dim]`,
    /// `edge_feats [E, edge_feats_dim]` -> `[N, out_dim]`.
    pub fn forward_t(
        &self,
        node_feats: &Tensor,
        edge_index: &Tensor,
        edge_sh: &Tensor,
        edge_feats: &Tensor,
        train: bool,
    ) -> crate::Result<Tensor> {
        self.in_irreps.check_dim(node_feats.dim(1)?)?;
        self.sh_irreps.check_dim(edge_sh.dim(1)?)?;
        let num_nodes = node_feats.dim(0)?;
        let source = edge_index.get(0)?.contiguous()?;
        let target = edge_index.get(1)?.contiguous()?;

        let weights = self.fc2.forward(&self.fc0.forward(edge_feats)?.relu()?)?;
        let messages = self.tensor_product(&node_feats.index_select(&source, 0)?, edge_sh, &weights)?;

        let out_dim = self.out_irreps.dim();
        let zeros = Tensor::zeros((num_nodes, out_dim), messages.dtype(), messages.device())?;
        let mut out = zeros.index_add(&target, &messages, 0)?;
        if self.aggr == Aggregation::Mean {
            let ones = Tensor::ones(target.dim(0)?, DType::F32, messages.device())?;
            let counts = Tensor::zeros(num_nodes, DType::F32, messages.device())?
                .index_add(&target, &ones, 0)?
                .clamp(1f32, f32::MAX)?
                .to_dtype(messages.dtype())?
                .unsqueeze(1)?;
            out = out.broadcast_div(&counts)?;
        }
        if let Some(bn) = &self.batch_norm {
            out = bn.forward_t(&out, train)?;
        }
        Ok(out)
    }
}
