//! Multi-class margin loss operations

use crate::error::{Error, Result};
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How per-sample losses are combined into the op's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// One loss per sample, shape `[N]`
    None,
    /// Sum over the batch, divided by `N * D`
    #[default]
    Mean,
    /// Sum over the batch
    Sum,
}

impl Reduction {
    /// Map the legacy `(size_average, reduce)` flag pair onto a reduction.
    ///
    /// `None` flags default to `true`. `reduce == false` wins over
    /// `size_average`.
    pub fn from_legacy(size_average: Option<bool>, reduce: Option<bool>) -> Self {
        let size_average = size_average.unwrap_or(true);
        let reduce = reduce.unwrap_or(true);
        if !reduce {
            Reduction::None
        } else if size_average {
            Reduction::Mean
        } else {
            Reduction::Sum
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Reduction::None => "none",
            Reduction::Mean => "mean",
            Reduction::Sum => "sum",
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reduction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Reduction::None),
            "mean" => Ok(Reduction::Mean),
            "sum" => Ok(Reduction::Sum),
            other => Err(Error::InvalidParameter {
                arg: "reduction",
                reason: format!("expected one of none/mean/sum, got '{other}'"),
            }),
        }
    }
}

/// Exponent applied to each active margin term: `max(z, 0)^p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarginNorm {
    /// p = 1, hinge
    L1,
    /// p = 2, squared hinge
    L2,
}

impl MarginNorm {
    pub fn p(self) -> i64 {
        match self {
            MarginNorm::L1 => 1,
            MarginNorm::L2 => 2,
        }
    }
}

impl TryFrom<i64> for MarginNorm {
    type Error = Error;

    fn try_from(p: i64) -> Result<Self> {
        match p {
            1 => Ok(MarginNorm::L1),
            2 => Ok(MarginNorm::L2),
            other => Err(Error::InvalidParameter {
                arg: "p",
                reason: format!("expected 1 or 2, got {other}"),
            }),
        }
    }
}

/// Multi-class margin (hinge) loss.
///
/// For sample `k` with target class `t = target[k]`:
///
/// ```text
/// z_i    = margin - input[k, t] + input[k, i]
/// loss_k = sum_{i != t} w[t] * max(z_i, 0)^p / denom
/// ```
///
/// `denom` is `D` for `Reduction::None` / `Reduction::Sum` and `N * D` for
/// `Reduction::Mean`. `w` is the optional per-class weight (1 when absent).
///
/// # Layout contract
///
/// - `input`: `[N, D]`, `[D]` or a scalar; F16, BF16, F32 or F64
/// - `target`: `[N]` (or a scalar when N = 1), I64 or I32, values in `[0, D)`
/// - `weight`: `[D]`, same dtype as `input`
/// - Output: `[N]` for `Reduction::None` with a rank-1 target, otherwise `[]`
///
/// Every call validates `p`, shapes, dtypes and target range before any
/// kernel is queued, and before an `_into` output is touched. An empty batch
/// (`N = 0`) launches nothing and yields a zero loss.
#[allow(clippy::too_many_arguments)]
pub trait MultiMarginLossOps<R: Runtime> {
    /// Forward pass, allocating the output.
    fn multi_margin_loss_fwd(
        &self,
        input: &Tensor<R>,
        target: &Tensor<R>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<R>>,
        reduction: Reduction,
    ) -> Result<Tensor<R>>;

    /// Forward pass into `out`.
    ///
    /// `out` is written in place when it already has the output shape, the
    /// input dtype and a contiguous layout; otherwise it is replaced by a
    /// freshly allocated tensor. On error `out` is left untouched.
    fn multi_margin_loss_fwd_into(
        &self,
        input: &Tensor<R>,
        target: &Tensor<R>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<R>>,
        reduction: Reduction,
        out: &mut Tensor<R>,
    ) -> Result<()>;

    /// Backward pass: gradient of the loss w.r.t. `input`.
    ///
    /// - `grad_output`: `[N]` for `Reduction::None`, a single element otherwise
    /// - Output: same shape as `input`
    fn multi_margin_loss_bwd(
        &self,
        grad_output: &Tensor<R>,
        input: &Tensor<R>,
        target: &Tensor<R>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<R>>,
        reduction: Reduction,
    ) -> Result<Tensor<R>>;

    /// Backward pass into `grad_input`, with the same reuse rule as
    /// [`multi_margin_loss_fwd_into`](Self::multi_margin_loss_fwd_into).
    fn multi_margin_loss_bwd_into(
        &self,
        grad_output: &Tensor<R>,
        input: &Tensor<R>,
        target: &Tensor<R>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<R>>,
        reduction: Reduction,
        grad_input: &mut Tensor<R>,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction_from_legacy() {
        assert_eq!(Reduction::from_legacy(None, None), Reduction::Mean);
        assert_eq!(Reduction::from_legacy(Some(false), None), Reduction::Sum);
        assert_eq!(Reduction::from_legacy(Some(true), Some(false)), Reduction::None);
        assert_eq!(Reduction::from_legacy(Some(false), Some(false)), Reduction::None);
    }

    #[test]
    fn test_reduction_parse() {
        assert_eq!("none".parse::<Reduction>().unwrap(), Reduction::None);
        assert_eq!("sum".parse::<Reduction>().unwrap(), Reduction::Sum);
        assert_eq!(Reduction::Mean.to_string(), "mean");
        assert!(matches!(
            "avg".parse::<Reduction>(),
            Err(Error::InvalidParameter { arg: "reduction", .. })
        ));
    }

    #[test]
    fn test_margin_norm_from_p() {
        assert_eq!(MarginNorm::try_from(1).unwrap(), MarginNorm::L1);
        assert_eq!(MarginNorm::try_from(2).unwrap().p(), 2);
        for p in [0, 3, -1] {
            assert!(matches!(
                MarginNorm::try_from(p),
                Err(Error::InvalidParameter { arg: "p", .. })
            ));
        }
    }
}
