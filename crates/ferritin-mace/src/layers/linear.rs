use super::reshape::{merge_blocks, split_blocks};
use crate::irreps::Irreps;
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Linear map between irreps-typed features.
///
/// Only blocks carrying the same irrep are mixed, one `[mul_in, mul_out]` weight per
/// pair, so the map commutes with rotations. No bias.
#[derive(Debug, Clone)]
pub struct EquivariantLinear {
    irreps_in: Irreps,
    irreps_out: Irreps,
    // (in block, out block, weight [mul_in, mul_out])
    weights: Vec<(usize, usize, Tensor)>,
    fan_in: Vec<usize>,
}

impl EquivariantLinear {
    pub fn load(vb: VarBuilder, irreps_in: &Irreps, irreps_out: &Irreps) -> Result<Self> {
        let mut weights = Vec::new();
        let mut fan_in = vec![0; irreps_out.len()];
        for (o, mo) in irreps_out.iter().enumerate() {
            for (i, mi) in irreps_in.iter().enumerate() {
                if mi.irrep != mo.irrep || mi.mul == 0 || mo.mul == 0 {
                    continue;
                }
                let w = vb.get_with_hints(
                    (mi.mul, mo.mul),
                    &format!("weight_{i}_{o}"),
                    Init::Randn {
                        mean: 0.,
                        stdev: 1.,
                    },
                )?;
                fan_in[o] += mi.mul;
                weights.push((i, o, w));
            }
        }
        Ok(Self {
            irreps_in: irreps_in.clone(),
            irreps_out: irreps_out.clone(),
            weights,
            fan_in,
        })
    }

    pub fn irreps_out(&self) -> &Irreps {
        &self.irreps_out
    }

    /// `[N, irreps_in.dim()] -> [N, irreps_out.dim()]`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let n = x.dim(0)?;
        let blocks = split_blocks(x, &self.irreps_in)?;
        let mut out: Vec<Option<Tensor>> = vec![None; self.irreps_out.len()];
        for (i, o, w) in &self.weights {
            // [N, d, mul_in] x [mul_in, mul_out] -> [N, mul_out, d]
            let y = blocks[*i]
                .transpose(1, 2)?
                .contiguous()?
                .broadcast_matmul(w)?
                .transpose(1, 2)?;
            out[*o] = Some(match out[*o].take() {
                Some(acc) => (acc + y)?,
                None => y,
            });
        }
        let out = out
            .into_iter()
            .zip(self.irreps_out.iter().zip(self.fan_in.iter()))
            .map(|(block, (mo, &fan_in))| match block {
                Some(b) => b.affine(1.0 / (fan_in as f64).sqrt(), 0.0),
                None => Tensor::zeros((n, mo.mul, mo.irrep.dim()), x.dtype(), x.device()),
            })
            .collect::<Result<Vec<_>>>()?;
        merge_blocks(&out)
    }
}
