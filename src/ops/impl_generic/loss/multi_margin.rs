//! Shape validation and launch orchestration for multi-margin loss.
//!
//! Backends only provide the per-sample kernels through [`MultiMarginKernel`].
//! Parameter checks, output allocation, the zero-element short-circuit, the
//! target range check and the final batch sum live here, so every backend
//! rejects the same inputs with the same errors before anything is queued.

use crate::error::{Error, Result};
use crate::ops::traits::{MarginNorm, Reduction};
use numr::dtype::DType;
use numr::ops::ReduceOps;
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Workers per reduction group. One group is launched per sample.
///
/// Must match `MULTIMARGIN_THREADS` in `multi_margin.cu` and `GROUP_SIZE` in
/// `multi_margin.wgsl`.
pub const GROUP_SIZE: usize = 128;

/// Batch geometry derived from the input/target pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiMarginShape {
    /// Number of samples (N)
    pub nframe: usize,
    /// Number of classes (D)
    pub dim: usize,
    /// Shape of the forward output
    pub output_shape: Vec<usize>,
}

/// Everything a backend kernel needs for one launch.
///
/// `input` and `weight` are contiguous; `targets` has been range-checked.
pub struct MultiMarginLaunch<'a, R: Runtime> {
    pub input: &'a Tensor<R>,
    pub targets: &'a [i64],
    pub weight: Option<&'a Tensor<R>>,
    pub norm: MarginNorm,
    pub margin: f64,
    pub nframe: usize,
    pub dim: usize,
    /// Fold N into the denominator (mean reduction)
    pub size_average: bool,
}

impl<R: Runtime> MultiMarginLaunch<'_, R> {
    /// Normalization divisor applied to each sample's summed margin terms.
    pub fn denom(&self) -> usize {
        if self.size_average {
            self.nframe * self.dim
        } else {
            self.dim
        }
    }
}

/// Per-backend kernels for multi-margin loss.
///
/// Kernels write every element of their output tensor; they never read it.
pub trait MultiMarginKernel<R: Runtime> {
    /// One reduction group per sample; writes `output[k] = loss_k`.
    fn launch_multi_margin_fwd(
        &self,
        launch: &MultiMarginLaunch<'_, R>,
        output: &Tensor<R>,
    ) -> Result<()>;

    /// One reduction group per sample; writes the full `[N, D]` gradient,
    /// scaled by `grad_output[0]` when `reduce` and by `grad_output[k]`
    /// otherwise.
    fn launch_multi_margin_bwd(
        &self,
        launch: &MultiMarginLaunch<'_, R>,
        grad_output: &Tensor<R>,
        reduce: bool,
        grad_input: &Tensor<R>,
    ) -> Result<()>;

    /// Copy `src` into the (contiguous, same-sized) storage of `dst`.
    fn copy_tensor(&self, src: &Tensor<R>, dst: &Tensor<R>) -> Result<()>;
}

/// Validate input/target/weight ranks and sizes.
///
/// Accepts `[N, D]` with `D > 0`, `[D]` with `D > 0`, or a scalar (D = 1).
/// `N = 0` is allowed for rank-2 input.
pub fn multi_margin_shape_check<R: Runtime>(
    input: &Tensor<R>,
    target: &Tensor<R>,
    weight: Option<&Tensor<R>>,
    reduction: Reduction,
) -> Result<MultiMarginShape> {
    let in_shape = input.shape();
    let (nframe, dim) = match in_shape.len() {
        0 => (1, 1),
        1 if in_shape[0] != 0 => (1, in_shape[0]),
        2 if in_shape[1] != 0 => (in_shape[0], in_shape[1]),
        _ => {
            return Err(Error::InvalidShape {
                arg: "input",
                reason: format!(
                    "expected non-empty vector or matrix with optional 0-dim batch size, got {:?}",
                    in_shape
                ),
            });
        }
    };

    let target_ndim = target.shape().len();
    if target_ndim > 1 || target.numel() != nframe {
        return Err(Error::InvalidShape {
            arg: "target",
            reason: format!(
                "inconsistent target size, expected {} but got {:?}",
                nframe,
                target.shape()
            ),
        });
    }

    if let Some(w) = weight {
        if w.shape().len() > 1 || w.numel() != dim {
            return Err(Error::InvalidShape {
                arg: "weight",
                reason: format!(
                    "inconsistent weight size, expected {} but got {:?}",
                    dim,
                    w.shape()
                ),
            });
        }
    }

    let output_shape = if reduction == Reduction::None && target_ndim > 0 {
        vec![nframe]
    } else {
        vec![]
    };

    Ok(MultiMarginShape {
        nframe,
        dim,
        output_shape,
    })
}

fn check_floating(dtype: DType, op: &'static str) -> Result<()> {
    match dtype {
        DType::F16 | DType::BF16 | DType::F32 | DType::F64 => Ok(()),
        dtype => Err(Error::UnsupportedDType { op, dtype }),
    }
}

fn check_same_dtype(expected: DType, got: DType) -> Result<()> {
    if expected != got {
        return Err(Error::DTypeMismatch { expected, got });
    }
    Ok(())
}

/// Read targets to the host and check every class index is in `[0, dim)`.
pub fn read_targets<R: Runtime<DType = DType>>(target: &Tensor<R>, dim: usize) -> Result<Vec<i64>> {
    let target = target.contiguous();
    let values: Vec<i64> = match target.dtype() {
        DType::I64 => target.to_vec::<i64>(),
        DType::I32 => target.to_vec::<i32>().into_iter().map(i64::from).collect(),
        dtype => {
            return Err(Error::UnsupportedDType {
                op: "multi_margin_loss target",
                dtype,
            });
        }
    };

    if let Some((index, &value)) = values
        .iter()
        .enumerate()
        .find(|&(_, &v)| v < 0 || v as usize >= dim)
    {
        return Err(Error::InvalidTarget {
            index,
            value,
            num_classes: dim,
        });
    }
    Ok(values)
}

/// Round `margin` to the nearest value representable in `dtype`.
///
/// Device kernels receive the margin as an f64 and narrow it in-kernel; the
/// host rounds first so every backend sees the same element-typed margin.
pub fn margin_in_dtype(margin: f64, dtype: DType) -> f64 {
    match dtype {
        DType::F16 => half::f16::from_f64(margin).to_f64(),
        DType::BF16 => half::bf16::from_f64(margin).to_f64(),
        DType::F32 => margin as f32 as f64,
        _ => margin,
    }
}

/// Make `out` a contiguous tensor of `shape`/`dtype`, keeping the caller's
/// storage when it already fits.
fn resize_output<R: Runtime<DType = DType>>(
    out: &mut Tensor<R>,
    shape: &[usize],
    dtype: DType,
    device: &R::Device,
) {
    if out.shape() == shape && out.dtype() == dtype && out.is_contiguous() {
        return;
    }
    log::trace!(
        "multi_margin_loss: reallocating output {:?}/{:?} -> {:?}/{:?}",
        out.shape(),
        out.dtype(),
        shape,
        dtype
    );
    *out = Tensor::<R>::zeros(shape, dtype, device);
}

/// Forward pass, allocating the output.
#[allow(clippy::too_many_arguments)]
pub fn multi_margin_loss_fwd_impl<R, C>(
    client: &C,
    input: &Tensor<R>,
    target: &Tensor<R>,
    p: i64,
    margin: f64,
    weight: Option<&Tensor<R>>,
    reduction: Reduction,
) -> Result<Tensor<R>>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + ReduceOps<R> + MultiMarginKernel<R>,
{
    MarginNorm::try_from(p)?;
    let shape = multi_margin_shape_check(input, target, weight, reduction)?;
    let mut out = Tensor::<R>::zeros(&shape.output_shape, input.dtype(), input.device());
    multi_margin_loss_fwd_into_impl(client, input, target, p, margin, weight, reduction, &mut out)?;
    Ok(out)
}

/// Forward pass into `out`.
#[allow(clippy::too_many_arguments)]
pub fn multi_margin_loss_fwd_into_impl<R, C>(
    client: &C,
    input: &Tensor<R>,
    target: &Tensor<R>,
    p: i64,
    margin: f64,
    weight: Option<&Tensor<R>>,
    reduction: Reduction,
    out: &mut Tensor<R>,
) -> Result<()>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + ReduceOps<R> + MultiMarginKernel<R>,
{
    let norm = MarginNorm::try_from(p)?;
    let shape = multi_margin_shape_check(input, target, weight, reduction)?;
    let dtype = input.dtype();
    check_floating(dtype, "multi_margin_loss")?;
    if let Some(w) = weight {
        check_same_dtype(dtype, w.dtype())?;
    }

    let targets = read_targets(target, shape.dim)?;

    resize_output(out, &shape.output_shape, dtype, input.device());
    if input.numel() == 0 {
        log::debug!(
            "multi_margin_loss fwd: empty input {:?}, no launch",
            input.shape()
        );
        // a reused scalar output still holds the previous call's loss
        if out.numel() > 0 {
            let zeros = Tensor::<R>::zeros(out.shape(), dtype, input.device());
            client.copy_tensor(&zeros, out)?;
        }
        return Ok(());
    }

    let input = input.contiguous();
    let weight = weight.map(|w| w.contiguous());
    let launch = MultiMarginLaunch {
        input: &input,
        targets: &targets,
        weight: weight.as_ref(),
        norm,
        margin,
        nframe: shape.nframe,
        dim: shape.dim,
        size_average: reduction == Reduction::Mean,
    };

    log::debug!(
        "multi_margin_loss fwd: dtype={:?} p={} N={} D={} reduction={} weighted={}",
        dtype,
        norm.p(),
        shape.nframe,
        shape.dim,
        reduction,
        launch.weight.is_some()
    );

    if input.shape().len() <= 1 || reduction == Reduction::None {
        return client.launch_multi_margin_fwd(&launch, out);
    }

    // Per-sample losses already carry the 1/(N*D) factor for mean; summing
    // over the batch finishes both reductions.
    let per_sample = Tensor::<R>::empty(&[shape.nframe], dtype, input.device());
    client.launch_multi_margin_fwd(&launch, &per_sample)?;
    let total = client.sum(&per_sample, &[0], false)?;
    client.copy_tensor(&total, out)
}

/// Backward pass, allocating the gradient.
#[allow(clippy::too_many_arguments)]
pub fn multi_margin_loss_bwd_impl<R, C>(
    client: &C,
    grad_output: &Tensor<R>,
    input: &Tensor<R>,
    target: &Tensor<R>,
    p: i64,
    margin: f64,
    weight: Option<&Tensor<R>>,
    reduction: Reduction,
) -> Result<Tensor<R>>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + MultiMarginKernel<R>,
{
    let mut grad_input = Tensor::<R>::zeros(input.shape(), input.dtype(), input.device());
    multi_margin_loss_bwd_into_impl(
        client,
        grad_output,
        input,
        target,
        p,
        margin,
        weight,
        reduction,
        &mut grad_input,
    )?;
    Ok(grad_input)
}

/// Backward pass into `grad_input`.
#[allow(clippy::too_many_arguments)]
pub fn multi_margin_loss_bwd_into_impl<R, C>(
    client: &C,
    grad_output: &Tensor<R>,
    input: &Tensor<R>,
    target: &Tensor<R>,
    p: i64,
    margin: f64,
    weight: Option<&Tensor<R>>,
    reduction: Reduction,
    grad_input: &mut Tensor<R>,
) -> Result<()>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + MultiMarginKernel<R>,
{
    let norm = MarginNorm::try_from(p)?;
    let shape = multi_margin_shape_check(input, target, weight, reduction)?;
    let dtype = input.dtype();
    check_floating(dtype, "multi_margin_loss_backward")?;
    if let Some(w) = weight {
        check_same_dtype(dtype, w.dtype())?;
    }
    check_same_dtype(dtype, grad_output.dtype())?;

    let reduce = reduction != Reduction::None;
    let expected = if reduce { 1 } else { shape.nframe };
    if grad_output.numel() != expected {
        return Err(Error::InvalidShape {
            arg: "grad_output",
            reason: format!(
                "expected {} element(s) for reduction '{}', got {:?}",
                expected,
                reduction,
                grad_output.shape()
            ),
        });
    }

    let targets = read_targets(target, shape.dim)?;

    resize_output(grad_input, input.shape(), dtype, input.device());
    if input.numel() == 0 {
        log::debug!(
            "multi_margin_loss bwd: empty input {:?}, no launch",
            input.shape()
        );
        return Ok(());
    }

    let input = input.contiguous();
    let weight = weight.map(|w| w.contiguous());
    let grad_output = grad_output.contiguous();
    let launch = MultiMarginLaunch {
        input: &input,
        targets: &targets,
        weight: weight.as_ref(),
        norm,
        margin,
        nframe: shape.nframe,
        dim: shape.dim,
        size_average: reduction == Reduction::Mean,
    };

    log::debug!(
        "multi_margin_loss bwd: dtype={:?} p={} N={} D={} reduction={} weighted={}",
        dtype,
        norm.p(),
        shape.nframe,
        shape.dim,
        reduction,
        launch.weight.is_some()
    );

    client.launch_multi_margin_bwd(&launch, &grad_output, reduce, grad_input)
}
