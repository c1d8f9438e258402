//! Multi-class margin (hinge) loss.
//!
//! Weston & Watkins style multi-class SVM objective: every non-target class
//! whose score comes within `margin` of the target score is penalized.

use super::config::MultiMarginLossConfig;
use crate::error::{Error, Result};
use crate::ops::autograd_loss::var_multi_margin_loss;
use crate::ops::traits::{MarginNorm, MultiMarginLossOps, Reduction};
use numr::autograd::Var;
use numr::dtype::DType;
use numr::ops::TypeConversionOps;
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Multi-margin loss: `sum_{i != t} w[t] * max(0, margin - x[t] + x[i])^p / D`
///
/// - `input`: `[N, C]`, `[C]` or a scalar of scores
/// - `target`: `[N]` integer class indices in `[0, C)`
/// - `p`: 1 (hinge) or 2 (squared hinge)
/// - `weight`: optional `[C]` per-class weight, cast to the input dtype
///
/// Returns `[N]` for `Reduction::None`, a scalar otherwise.
pub fn multi_margin_loss<R, C>(
    client: &C,
    input: &Var<R>,
    target: &Tensor<R>,
    p: i64,
    margin: f64,
    weight: Option<&Tensor<R>>,
    reduction: Reduction,
) -> Result<Var<R>>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + TypeConversionOps<R>,
    R::Client: MultiMarginLossOps<R>,
{
    let weight = match weight {
        Some(w) if w.shape().len() != 1 => {
            return Err(Error::InvalidShape {
                arg: "weight",
                reason: format!("expected a 1-D tensor, got {:?}", w.shape()),
            });
        }
        Some(w) if w.dtype() != input.tensor().dtype() => {
            Some(client.cast(w, input.tensor().dtype()).map_err(Error::Numr)?)
        }
        Some(w) => Some(w.clone()),
        None => None,
    };

    var_multi_margin_loss(input, target, p, margin, weight.as_ref(), reduction)
}

/// Multi-margin loss as a reusable criterion.
pub struct MultiMarginLoss<R: Runtime> {
    norm: MarginNorm,
    margin: f64,
    weight: Option<Tensor<R>>,
    reduction: Reduction,
}

impl<R: Runtime<DType = DType>> MultiMarginLoss<R> {
    /// `p = 1`, `margin = 1.0`, no weight, mean reduction.
    pub fn new() -> Self {
        Self {
            norm: MarginNorm::L1,
            margin: 1.0,
            weight: None,
            reduction: Reduction::Mean,
        }
    }

    /// Build from a validated config. Class weights are stored as F32 and
    /// cast to the input dtype on each forward.
    pub fn from_config(config: &MultiMarginLossConfig, device: &R::Device) -> Result<Self> {
        config.validate()?;
        let weight = config.weight.as_ref().map(|w| {
            let w: Vec<f32> = w.iter().map(|&v| v as f32).collect();
            Tensor::<R>::from_slice(&w, &[w.len()], device)
        });
        Ok(Self {
            norm: MarginNorm::try_from(config.p)?,
            margin: config.margin,
            weight,
            reduction: config.reduction,
        })
    }

    pub fn with_norm(mut self, norm: MarginNorm) -> Self {
        self.norm = norm;
        self
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_weight(mut self, weight: Tensor<R>) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn norm(&self) -> MarginNorm {
        self.norm
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn weight(&self) -> Option<&Tensor<R>> {
        self.weight.as_ref()
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    pub fn forward<C>(&self, client: &C, input: &Var<R>, target: &Tensor<R>) -> Result<Var<R>>
    where
        C: RuntimeClient<R> + TypeConversionOps<R>,
        R::Client: MultiMarginLossOps<R>,
    {
        multi_margin_loss(
            client,
            input,
            target,
            self.norm.p(),
            self.margin,
            self.weight.as_ref(),
            self.reduction,
        )
    }
}

impl<R: Runtime<DType = DType>> Default for MultiMarginLoss<R> {
    fn default() -> Self {
        Self::new()
    }
}
