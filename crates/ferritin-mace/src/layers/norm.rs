use super::reshape::{merge_blocks, split_blocks};
use crate::irreps::Irreps;
use candle_core::{Result, Tensor, Var, D};
use candle_nn::{Init, VarBuilder};

const EPS: f64 = 1e-5;
const MOMENTUM: f64 = 0.1;

/// Batch normalization for irreps-typed features.
///
/// Scalar (`0e`) channels are centred; every irrep is divided by the root of its mean
/// squared component. One affine weight per irrep, one bias per scalar. Running
/// statistics are tracked in training and used in evaluation.
#[derive(Debug, Clone)]
pub struct EquivariantBatchNorm {
    irreps: Irreps,
    weight: Tensor,
    bias: Option<Tensor>,
    running_mean: Option<Var>,
    running_var: Var,
}

impl EquivariantBatchNorm {
    pub fn load(vb: VarBuilder, irreps: &Irreps) -> Result<Self> {
        let num_features = irreps.num_irreps();
        let num_scalars: usize = irreps
            .iter()
            .filter(|m| m.irrep.is_scalar())
            .map(|m| m.mul)
            .sum();
        let weight = vb.get_with_hints(num_features, "weight", Init::Const(1.))?;
        let running_var = vb.get_with_hints(num_features, "running_var", Init::Const(1.))?;
        let (bias, running_mean) = if num_scalars > 0 {
            let bias = vb.get_with_hints(num_scalars, "bias", Init::Const(0.))?;
            let mean = vb.get_with_hints(num_scalars, "running_mean", Init::Const(0.))?;
            (Some(bias), Some(Var::from_tensor(&mean)?))
        } else {
            (None, None)
        };
        Ok(Self {
            irreps: irreps.clone(),
            weight,
            bias,
            running_mean,
            running_var: Var::from_tensor(&running_var)?,
        })
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let blocks = split_blocks(x, &self.irreps)?;
        let (mut ix, mut isc) = (0, 0);
        let mut out = Vec::with_capacity(blocks.len());
        let (mut batch_means, mut batch_norms) = (Vec::new(), Vec::new());

        for (block, mul_ir) in blocks.iter().zip(self.irreps.iter()) {
            let mul = mul_ir.mul;
            let mut field = block.clone();
            if mul_ir.irrep.is_scalar() {
                let mean = match (&self.running_mean, train) {
                    (Some(running), false) => running.narrow(0, isc, mul)?,
                    _ => {
                        let m = field.mean(0)?.squeeze(D::Minus1)?;
                        batch_means.push(m.clone());
                        m
                    }
                };
                field = field.broadcast_sub(&mean.reshape((1, mul, 1))?)?;
            }

            let norm = if train {
                let n = field.sqr()?.mean(D::Minus1)?.mean(0)?;
                batch_norms.push(n.clone());
                n
            } else {
                self.running_var.narrow(0, ix, mul)?
            };
            let scale = (norm + EPS)?
                .powf(-0.5)?
                .mul(&self.weight.narrow(0, ix, mul)?)?;
            field = field.broadcast_mul(&scale.reshape((1, mul, 1))?)?;

            if mul_ir.irrep.is_scalar() {
                if let Some(bias) = &self.bias {
                    field = field.broadcast_add(&bias.narrow(0, isc, mul)?.reshape((1, mul, 1))?)?;
                }
                isc += mul;
            }
            ix += mul;
            out.push(field);
        }

        if train {
            if let (Some(running), false) = (&self.running_mean, batch_means.is_empty()) {
                let m = Tensor::cat(&batch_means, 0)?;
                running.set(&((running.as_tensor() * (1.0 - MOMENTUM))? + (m * MOMENTUM)?)?)?;
            }
            if !batch_norms.is_empty() {
                let v = Tensor::cat(&batch_norms, 0)?;
                let running = &self.running_var;
                running.set(&((running.as_tensor() * (1.0 - MOMENTUM))? + (v * MOMENTUM)?)?)?;
            }
        }
        merge_blocks(&out)
    }
}
