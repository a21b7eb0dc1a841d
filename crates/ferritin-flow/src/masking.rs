use crate::error::{FlowError, Result};
use crate::mode::{GenerationMode, ModeState};
use candle_core::{DType, Tensor};
use rand::Rng;

/// Which sequence positions the language model sees masked, `[B, N]` f32 with 1 = masked.
///
/// Scaffolding masks the free positions, conditional generation masks nothing,
/// evaluation masks everything, and training masks whole rows with probability
/// `p_mask_sequence`.
pub fn sequence_mask_pattern<R: Rng + ?Sized>(
    state: &ModeState,
    aatype: &Tensor,
    fixed_mask_seq: Option<&Tensor>,
    p_mask_sequence: f64,
    rng: &mut R,
) -> Result<Tensor> {
    let shape = aatype.dims();
    let device = aatype.device();
    match state.mode() {
        GenerationMode::Scaffolding => {
            let fixed = fixed_mask_seq.ok_or(FlowError::MissingScaffoldInput("fixed_mask_seq"))?;
            Ok(fixed.to_dtype(DType::F32)?.affine(-1.0, 1.0)?)
        }
        GenerationMode::Conditional => Ok(Tensor::zeros(shape, DType::F32, device)?),
        GenerationMode::Normal if !state.training() => Ok(Tensor::ones(shape, DType::F32, device)?),
        GenerationMode::Normal => {
            let (b, n) = aatype.dims2()?;
            let rows: Vec<f32> = (0..b)
                .map(|_| if rng.gen::<f64>() < p_mask_sequence { 1.0 } else { 0.0 })
                .collect();
            let rows = Tensor::from_vec(rows, (b, 1), device)?;
            Ok(rows.broadcast_as((b, n))?.contiguous()?)
        }
    }
}
