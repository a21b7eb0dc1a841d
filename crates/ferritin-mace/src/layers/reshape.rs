use crate::irreps::Irreps;
use candle_core::{Result, Tensor, D};

/// Split flat `[N, irreps.dim()]` features into per-block `[N, mul, 2l+1]` views.
pub fn split_blocks(x: &Tensor, irreps: &Irreps) -> Result<Vec<Tensor>> {
    let n = x.dim(0)?;
    irreps
        .iter()
        .zip(irreps.slices())
        .map(|(mul_ir, (offset, len))| {
            x.narrow(D::Minus1, offset, len)?
                .reshape((n, mul_ir.mul, mul_ir.irrep.dim()))
        })
        .collect()
}

/// Inverse of [`split_blocks`].
pub fn merge_blocks(blocks: &[Tensor]) -> Result<Tensor> {
    let flat = blocks
        .iter()
        .map(|b| {
            let (n, mul, d) = b.dims3()?;
            b.reshape((n, mul * d))
        })
        .collect::<Result<Vec<_>>>()?;
    Tensor::cat(&flat, D::Minus1)
}

/// Relayout between flat `[N, dim]` and per-degree `[N, mul, sum(2l+1)]` features.
///
/// Every block must share the same multiplicity.
#[derive(Debug, Clone)]
pub struct IrrepsReshape {
    irreps: Irreps,
    mul: usize,
}

impl IrrepsReshape {
    pub fn new(irreps: &Irreps) -> crate::Result<Self> {
        let mul = irreps.uniform_mul()?;
        Ok(Self {
            irreps: irreps.clone(),
            mul,
        })
    }

    pub fn mul(&self) -> usize {
        self.mul
    }

    /// `[N, dim] -> [N, mul, sum(2l+1)]`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let blocks = split_blocks(x, &self.irreps)?;
        Tensor::cat(&blocks, D::Minus1)
    }

    /// `[N, mul, sum(2l+1)] -> [N, dim]`
    pub fn inverse(&self, x: &Tensor) -> Result<Tensor> {
        let mut offset = 0;
        let mut blocks = Vec::with_capacity(self.irreps.len());
        for mul_ir in &self.irreps {
            let d = mul_ir.irrep.dim();
            blocks.push(x.narrow(D::Minus1, offset, d)?);
            offset += d;
        }
        merge_blocks(&blocks)
    }
}
