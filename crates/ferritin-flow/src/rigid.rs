//! Per-residue rigid transforms stored as quaternion plus translation.
//!
//! The flat form is `[.., 7]`: quaternion `(w, x, y, z)` followed by the translation.
//! Every operation returns a new value; inputs are never modified in place.
use candle_core::{Result, Tensor, D};

#[derive(Debug, Clone)]
pub struct Rigid {
    // [.., 4]
    quats: Tensor,
    // [.., 3]
    trans: Tensor,
}

impl Rigid {
    pub fn new(quats: Tensor, trans: Tensor) -> Result<Self> {
        let (q, t) = (quats.dims(), trans.dims());
        if q.last() != Some(&4) || t.last() != Some(&3) || q[..q.len() - 1] != t[..t.len() - 1] {
            candle_core::bail!("rigid needs [.., 4] quaternions and [.., 3] translations, got {q:?} and {t:?}")
        }
        Ok(Self { quats, trans })
    }

    pub fn from_tensor_7(t: &Tensor) -> Result<Self> {
        let quats = t.narrow(D::Minus1, 0, 4)?.contiguous()?;
        let trans = t.narrow(D::Minus1, 4, 3)?.contiguous()?;
        Self::new(quats, trans)
    }

    pub fn to_tensor_7(&self) -> Result<Tensor> {
        Tensor::cat(&[&self.quats, &self.trans], D::Minus1)
    }

    pub fn quats(&self) -> &Tensor {
        &self.quats
    }

    pub fn trans(&self) -> &Tensor {
        &self.trans
    }

    /// Rotation matrices `[.., 3, 3]`, in homogeneous quaternion form.
    pub fn rot_mats(&self) -> Result<Tensor> {
        let c = |i: usize| self.quats.narrow(D::Minus1, i, 1);
        let (w, x, y, z) = (c(0)?, c(1)?, c(2)?, c(3)?);
        let sq = |a: &Tensor| a.sqr();
        let two = |a: &Tensor, b: &Tensor| -> Result<Tensor> { a.mul(b)?.affine(2.0, 0.0) };
        let (ww, xx, yy, zz) = (sq(&w)?, sq(&x)?, sq(&y)?, sq(&z)?);
        let entries = [
            ((&ww + &xx)? - (&yy + &zz)?)?,
            (two(&x, &y)? - two(&w, &z)?)?,
            (two(&x, &z)? + two(&w, &y)?)?,
            (two(&x, &y)? + two(&w, &z)?)?,
            ((&ww - &xx)? + (&yy - &zz)?)?,
            (two(&y, &z)? - two(&w, &x)?)?,
            (two(&x, &z)? - two(&w, &y)?)?,
            (two(&y, &z)? + two(&w, &x)?)?,
            ((&ww - &xx)? - (&yy - &zz)?)?,
        ];
        let flat = Tensor::cat(&entries, D::Minus1)?;
        let mut shape = flat.dims()[..flat.rank() - 1].to_vec();
        shape.extend([3, 3]);
        flat.reshape(shape)
    }

}
