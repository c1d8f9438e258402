//! CPU implementation of MultiMarginLossOps, delegating to impl_generic

use crate::error::{Error, Result};
use crate::ops::cpu::kernels::{MarginElement, multi_margin_bwd, multi_margin_fwd};
use crate::ops::impl_generic::loss::{
    MultiMarginKernel, MultiMarginLaunch, multi_margin_loss_bwd_impl,
    multi_margin_loss_bwd_into_impl, multi_margin_loss_fwd_impl, multi_margin_loss_fwd_into_impl,
};
use crate::ops::traits::{MarginNorm, MultiMarginLossOps, Reduction};
use numr::dtype::DType;
use numr::runtime::cpu::{CpuClient, CpuRuntime};
use numr::tensor::Tensor;

/// View a contiguous host tensor as a slice of `T`, starting at the view's
/// offset into its storage.
///
/// # Safety
/// `t` must be contiguous with element type `T`.
unsafe fn host_slice<T: MarginElement>(t: &Tensor<CpuRuntime>) -> &[T] {
    let data = unsafe { t.storage().as_host_slice::<T>() };
    let offset = (t.ptr() - t.storage().ptr()) as usize / std::mem::size_of::<T>();
    &data[offset..offset + t.numel()]
}

/// Mutable view of an output tensor.
///
/// # Safety
/// As [`host_slice`], and nothing else may alias `t`'s storage meanwhile.
#[allow(clippy::mut_from_ref)]
unsafe fn host_slice_mut<T>(t: &Tensor<CpuRuntime>) -> &mut [T] {
    unsafe { std::slice::from_raw_parts_mut(t.ptr() as *mut T, t.numel()) }
}

fn fwd_typed<T: MarginElement>(launch: &MultiMarginLaunch<'_, CpuRuntime>, output: &Tensor<CpuRuntime>) {
    let margin = T::from_f64(launch.margin);
    let denom = launch.denom();
    let targets = launch.targets;
    let dim = launch.dim;
    unsafe {
        let input = host_slice::<T>(launch.input);
        let weight = launch.weight.map(|w| host_slice::<T>(w));
        let out = host_slice_mut::<T>(output);
        match launch.norm {
            MarginNorm::L1 => multi_margin_fwd::<T, 1>(out, input, targets, weight, dim, margin, denom),
            MarginNorm::L2 => multi_margin_fwd::<T, 2>(out, input, targets, weight, dim, margin, denom),
        }
    }
}

fn bwd_typed<T: MarginElement>(
    launch: &MultiMarginLaunch<'_, CpuRuntime>,
    grad_output: &Tensor<CpuRuntime>,
    reduce: bool,
    grad_input: &Tensor<CpuRuntime>,
) {
    let margin = T::from_f64(launch.margin);
    let denom = launch.denom();
    let targets = launch.targets;
    let dim = launch.dim;
    unsafe {
        let input = host_slice::<T>(launch.input);
        let weight = launch.weight.map(|w| host_slice::<T>(w));
        let go = host_slice::<T>(grad_output);
        let gi = host_slice_mut::<T>(grad_input);
        match launch.norm {
            MarginNorm::L1 => {
                multi_margin_bwd::<T, 1>(gi, go, input, targets, weight, dim, margin, denom, reduce)
            }
            MarginNorm::L2 => {
                multi_margin_bwd::<T, 2>(gi, go, input, targets, weight, dim, margin, denom, reduce)
            }
        }
    }
}

impl MultiMarginKernel<CpuRuntime> for CpuClient {
    fn launch_multi_margin_fwd(
        &self,
        launch: &MultiMarginLaunch<'_, CpuRuntime>,
        output: &Tensor<CpuRuntime>,
    ) -> Result<()> {
        match launch.input.dtype() {
            DType::F32 => fwd_typed::<f32>(launch, output),
            DType::F64 => fwd_typed::<f64>(launch, output),
            DType::F16 => fwd_typed::<half::f16>(launch, output),
            DType::BF16 => fwd_typed::<half::bf16>(launch, output),
            dtype => {
                return Err(Error::UnsupportedDType {
                    op: "multi_margin_loss",
                    dtype,
                });
            }
        }
        Ok(())
    }

    fn launch_multi_margin_bwd(
        &self,
        launch: &MultiMarginLaunch<'_, CpuRuntime>,
        grad_output: &Tensor<CpuRuntime>,
        reduce: bool,
        grad_input: &Tensor<CpuRuntime>,
    ) -> Result<()> {
        match launch.input.dtype() {
            DType::F32 => bwd_typed::<f32>(launch, grad_output, reduce, grad_input),
            DType::F64 => bwd_typed::<f64>(launch, grad_output, reduce, grad_input),
            DType::F16 => bwd_typed::<half::f16>(launch, grad_output, reduce, grad_input),
            DType::BF16 => bwd_typed::<half::bf16>(launch, grad_output, reduce, grad_input),
            dtype => {
                return Err(Error::UnsupportedDType {
                    op: "multi_margin_loss_backward",
                    dtype,
                });
            }
        }
        Ok(())
    }

    fn copy_tensor(&self, src: &Tensor<CpuRuntime>, dst: &Tensor<CpuRuntime>) -> Result<()> {
        if src.numel() != dst.numel() || src.dtype() != dst.dtype() {
            return Err(Error::KernelError {
                reason: format!(
                    "copy_tensor: {:?}/{:?} into {:?}/{:?}",
                    src.shape(),
                    src.dtype(),
                    dst.shape(),
                    dst.dtype()
                ),
            });
        }
        let src = src.contiguous();
        let bytes = src.numel() * src.dtype().size_in_bytes();
        unsafe {
            std::ptr::copy_nonoverlapping(src.ptr() as *const u8, dst.ptr() as *mut u8, bytes);
        }
        Ok(())
    }
}

impl MultiMarginLossOps<CpuRuntime> for CpuClient {
    fn multi_margin_loss_fwd(
        &self,
        input: &Tensor<CpuRuntime>,
        target: &Tensor<CpuRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<CpuRuntime>>,
        reduction: Reduction,
    ) -> Result<Tensor<CpuRuntime>> {
        multi_margin_loss_fwd_impl(self, input, target, p, margin, weight, reduction)
    }

    fn multi_margin_loss_fwd_into(
        &self,
        input: &Tensor<CpuRuntime>,
        target: &Tensor<CpuRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<CpuRuntime>>,
        reduction: Reduction,
        out: &mut Tensor<CpuRuntime>,
    ) -> Result<()> {
        multi_margin_loss_fwd_into_impl(self, input, target, p, margin, weight, reduction, out)
    }

    fn multi_margin_loss_bwd(
        &self,
        grad_output: &Tensor<CpuRuntime>,
        input: &Tensor<CpuRuntime>,
        target: &Tensor<CpuRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<CpuRuntime>>,
        reduction: Reduction,
    ) -> Result<Tensor<CpuRuntime>> {
        multi_margin_loss_bwd_impl(self, grad_output, input, target, p, margin, weight, reduction)
    }

    fn multi_margin_loss_bwd_into(
        &self,
        grad_output: &Tensor<CpuRuntime>,
        input: &Tensor<CpuRuntime>,
        target: &Tensor<CpuRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<CpuRuntime>>,
        reduction: Reduction,
        grad_input: &mut Tensor<CpuRuntime>,
    ) -> Result<()> {
        multi_margin_loss_bwd_into_impl(
            self,
            grad_output,
            input,
            target,
            p,
            margin,
            weight,
            reduction,
            grad_input,
        )
    }
}
