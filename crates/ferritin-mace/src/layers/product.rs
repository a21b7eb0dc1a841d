use super::linear::EquivariantLinear;
use super::reshape::IrrepsReshape;
use crate::coupling::{coupling_allowed, coupling_tensor};
use crate::irreps::Irreps;
use candle_core::{Tensor, D};
use candle_nn::{Init, VarBuilder};

/// Channel-wise coupling `(a, b) -> c` used to raise the correlation order by one.
#[derive(Debug, Clone)]
struct ContractionPath {
    a: usize,
    b: usize,
    c: usize,
    // [K]
    weight: Tensor,
    // [da * db, dc]
    coupling: Tensor,
}

#[derive(Debug, Clone)]
struct Contraction {
    paths: Vec<ContractionPath>,
    norm: Vec<f64>,
}

/// Higher-order equivariant polynomial of the aggregated message.
///
/// With `A^1 = x` restricted to the target irreps, each further order is
/// `A^{v+1}_c = sum_{a, b} w_{abc} * C(A^v_a, x_b)` computed channel by channel. The
/// orders are summed, mixed by an equivariant linear map, and the skip connection is
/// added when enabled.
#[derive(Debug, Clone)]
pub struct EquivariantProductBasisBlock {
    node_feats_irreps: Irreps,
    target_irreps: Irreps,
    mul: usize,
    // per target block, index of the matching input block and its [K] weight
    first_order: Vec<Option<(usize, Tensor)>>,
    contractions: Vec<Contraction>,
    linear: EquivariantLinear,
    use_sc: bool,
}

impl EquivariantProductBasisBlock {
    pub fn load(
        vb: VarBuilder,
        node_feats_irreps: &Irreps,
        target_irreps: &Irreps,
        correlation: usize,
        use_sc: bool,
    ) -> crate::Result<Self> {
        let mul = node_feats_irreps.uniform_mul()?;
        if target_irreps.uniform_mul()? != mul {
            return Err(crate::MaceError::Config(format!(
                "product block needs one multiplicity, got {node_feats_irreps} and {target_irreps}"
            )));
        }
        if correlation == 0 {
            return Err(crate::MaceError::Config(
                "correlation must be at least 1".to_string(),
            ));
        }
        let randn = Init::Randn {
            mean: 0.,
            stdev: 1.,
        };
        let vb_c = vb.pp("contraction");

        let mut first_order = Vec::with_capacity(target_irreps.len());
        for (c, mc) in target_irreps.iter().enumerate() {
            let matching = node_feats_irreps.iter().position(|mi| mi.irrep == mc.irrep);
            first_order.push(match matching {
                Some(i) => Some((i, vb_c.get_with_hints(mul, &format!("w1_{c}"), randn)?)),
                None => None,
            });
        }

        let mut contractions = Vec::with_capacity(correlation.saturating_sub(1));
        for nu in 2..=correlation {
            let mut paths = Vec::new();
            let mut count = vec![0usize; target_irreps.len()];
            for (c, mc) in target_irreps.iter().enumerate() {
                for (a, ma) in target_irreps.iter().enumerate() {
                    for (b, mb) in node_feats_irreps.iter().enumerate() {
                        if !coupling_allowed(&ma.irrep, &mb.irrep, &mc.irrep) {
                            continue;
                        }
                        let weight = vb_c.get_with_hints(mul, &format!("w{nu}_{a}_{b}_{c}"), randn)?;
                        let coupling =
                            coupling_tensor(ma.irrep.l, mb.irrep.l, mc.irrep.l, vb.device())?;
                        count[c] += 1;
                        paths.push(ContractionPath {
                            a,
                            b,
                            c,
                            weight,
                            coupling,
                        });
                    }
                }
            }
            let norm = count
                .iter()
                .map(|&n| if n > 0 { 1.0 / (n as f64).sqrt() } else { 0.0 })
                .collect();
            contractions.push(Contraction { paths, norm });
        }

        let linear = EquivariantLinear::load(vb.pp("linear"), target_irreps, target_irreps)?;
        Ok(Self {
            node_feats_irreps: node_feats_irreps.clone(),
            target_irreps: target_irreps.clone(),
            mul,
            first_order,
            contractions,
            linear,
            use_sc,
        })
    }

    /// Split `[N, K, sum(2l+1)]` into `[N, K, 2l+1]` blocks.
    fn degree_blocks(&self, x: &Tensor, irreps: &Irreps) -> candle_core::Result<Vec<Tensor>> {
        let mut offset = 0;
        irreps
            .iter()
            .map(|m| {
                let d = m.irrep.dim();
                let block = x.narrow(D::Minus1, offset, d);
                offset += d;
                block
            })
            .collect()
    }

    /// `node_feats` in block layout `[N, K, sum(2l+1)]`, `sc` flat `[N, target.dim()]`.
    pub fn forward(&self, node_feats: &Tensor, sc: Option<&Tensor>) -> crate::Result<Tensor> {
        let (n, k, _) = node_feats.dims3()?;
        if k != self.mul {
            return Err(crate::MaceError::Config(format!(
                "expected {} channels per irrep, got {k}",
                self.mul
            )));
        }
        let x = self.degree_blocks(node_feats, &self.node_feats_irreps)?;
        let zeros = |c: usize| {
            let d = self.target_irreps.get(c).map_or(1, |m| m.irrep.dim());
            Tensor::zeros((n, k, d), node_feats.dtype(), node_feats.device())
        };

        // first order
        let mut current = Vec::with_capacity(self.target_irreps.len());
        for (c, entry) in self.first_order.iter().enumerate() {
            current.push(match entry {
                Some((i, w)) => x[*i].broadcast_mul(&w.reshape((1, k, 1))?)?,
                None => zeros(c)?,
            });
        }
        let mut total = current.clone();

        for contraction in &self.contractions {
            let mut next: Vec<Option<Tensor>> = vec![None; self.target_irreps.len()];
            for p in &contraction.paths {
                let da = current[p.a].dim(2)?;
                let db = x[p.b].dim(2)?;
                let outer = current[p.a]
                    .unsqueeze(3)?
                    .broadcast_mul(&x[p.b].unsqueeze(2)?)?
                    .reshape((n, k, da * db))?;
                let y = outer
                    .broadcast_matmul(&p.coupling)?
                    .broadcast_mul(&p.weight.reshape((1, k, 1))?)?;
                next[p.c] = Some(match next[p.c].take() {
                    Some(acc) => (acc + y)?,
                    None => y,
                });
            }
            current = next
                .into_iter()
                .enumerate()
                .map(|(c, t)| match t {
                    Some(t) => t.affine(contraction.norm[c], 0.0),
                    None => zeros(c),
                })
                .collect::<candle_core::Result<Vec<_>>>()?;
            total = total
                .iter()
                .zip(current.iter())
                .map(|(acc, t)| acc + t)
                .collect::<candle_core::Result<Vec<_>>>()?;
        }

        let reshape = IrrepsReshape::new(&self.target_irreps)?;
        let flat = reshape.inverse(&Tensor::cat(&total, D::Minus1)?)?;
        let mut out = self.linear.forward(&flat)?;
        if let (true, Some(sc)) = (self.use_sc, sc) {
            self.target_irreps.check_dim(sc.dim(1)?)?;
            out = (out + sc)?;
        }
        Ok(out)
    }
}
