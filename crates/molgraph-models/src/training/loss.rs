use candle_core::{DType, Result, Tensor};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Elementwise training losses. Every variant ignores entries whose mask is 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LossCriterion {
    BceWithLogits,
    L1,
    Mse,
}

impl LossCriterion {
    fn elementwise(&self, logits: &Tensor, target: &Tensor) -> Result<Tensor> {
        match self {
            // max(x, 0) - x * y + log(1 + exp(-|x|))
            LossCriterion::BceWithLogits => {
                let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
                logits.relu()?.sub(&logits.mul(target)?)?.add(&softplus)
            }
            LossCriterion::L1 => logits.sub(target)?.abs(),
            LossCriterion::Mse => logits.sub(target)?.sqr(),
        }
    }
}

/// Mean loss over labelled entries. `mask` is 1 where a label exists.
pub fn masked_loss(
    criterion: LossCriterion,
    logits: &Tensor,
    target: &Tensor,
    mask: &Tensor,
) -> Result<Tensor> {
    let logits = logits.to_dtype(DType::F32)?;
    let losses = criterion.elementwise(&logits, target)?.mul(mask)?;
    let count = mask.sum_all()?.to_scalar::<f32>()?.max(1.0);
    losses.sum_all()? / count as f64
}
