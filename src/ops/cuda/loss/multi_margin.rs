//! CUDA implementation of MultiMarginLossOps: one block per sample

use crate::error::{Error, Result};
use crate::ops::cuda::kernels::{self, MULTI_MARGIN_MODULE};
use crate::ops::impl_generic::loss::{
    GROUP_SIZE, MultiMarginKernel, MultiMarginLaunch, margin_in_dtype, multi_margin_loss_bwd_impl,
    multi_margin_loss_bwd_into_impl, multi_margin_loss_fwd_impl, multi_margin_loss_fwd_into_impl,
};
use crate::ops::traits::{MultiMarginLossOps, Reduction};
use cudarc::driver::PushKernelArg;
use cudarc::driver::safe::LaunchConfig;
use cudarc::driver::sys;
use numr::dtype::DType;
use numr::runtime::Device;
use numr::runtime::cuda::{CudaClient, CudaRuntime};
use numr::tensor::Tensor;

fn kernel_name(direction: &str, p: i64, dtype: DType) -> Result<String> {
    let suffix = match dtype {
        DType::F32 => "f32",
        DType::F64 => "f64",
        DType::F16 => "f16",
        DType::BF16 => "bf16",
        dtype => {
            return Err(Error::UnsupportedDType {
                op: "multi_margin_loss",
                dtype,
            });
        }
    };
    Ok(format!("multi_margin_{direction}_p{p}_{suffix}"))
}

fn as_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::InvalidShape {
        arg: "input",
        reason: format!("{what} = {value} exceeds the CUDA kernel's i32 indexing"),
    })
}

fn group_config(nframe: usize) -> Result<LaunchConfig> {
    let grid = u32::try_from(nframe).map_err(|_| Error::InvalidShape {
        arg: "input",
        reason: format!("batch of {nframe} samples exceeds the CUDA grid limit"),
    })?;
    Ok(LaunchConfig {
        grid_dim: (grid, 1, 1),
        block_dim: (GROUP_SIZE as u32, 1, 1),
        shared_mem_bytes: 0,
    })
}

/// Upload the range-checked targets as an I64 device tensor.
fn upload_targets(launch: &MultiMarginLaunch<'_, CudaRuntime>) -> Tensor<CudaRuntime> {
    Tensor::<CudaRuntime>::from_slice(
        launch.targets,
        &[launch.targets.len()],
        launch.input.device(),
    )
}

impl MultiMarginKernel<CudaRuntime> for CudaClient {
    fn launch_multi_margin_fwd(
        &self,
        launch: &MultiMarginLaunch<'_, CudaRuntime>,
        output: &Tensor<CudaRuntime>,
    ) -> Result<()> {
        let dtype = launch.input.dtype();
        let name = kernel_name("fwd", launch.norm.p(), dtype)?;
        let device = launch.input.device();
        let module = kernels::get_or_load_module(self.context(), device.id(), MULTI_MARGIN_MODULE)?;
        let func = kernels::get_kernel_function(&module, &name)?;

        let targets = upload_targets(launch);
        let cfg = group_config(launch.nframe)?;

        let out_ptr = output.ptr();
        let input_ptr = launch.input.ptr();
        let target_ptr = targets.ptr();
        let weight_ptr = launch.weight.map_or(0u64, |w| w.ptr());
        let has_weight = i32::from(launch.weight.is_some());
        let dim = as_i32(launch.dim, "D")?;
        let margin = margin_in_dtype(launch.margin, dtype);
        let denom = as_i32(launch.denom(), "N * D")?;

        unsafe {
            let mut builder = self.stream().launch_builder(&func);
            builder.arg(&out_ptr);
            builder.arg(&input_ptr);
            builder.arg(&target_ptr);
            builder.arg(&weight_ptr);
            builder.arg(&has_weight);
            builder.arg(&dim);
            builder.arg(&margin);
            builder.arg(&denom);
            builder.launch(cfg).map_err(|e| Error::LaunchFailure {
                kernel: name.clone(),
                reason: format!("{:?}", e),
            })?;
        }

        Ok(())
    }

    fn launch_multi_margin_bwd(
        &self,
        launch: &MultiMarginLaunch<'_, CudaRuntime>,
        grad_output: &Tensor<CudaRuntime>,
        reduce: bool,
        grad_input: &Tensor<CudaRuntime>,
    ) -> Result<()> {
        let dtype = launch.input.dtype();
        let name = kernel_name("bwd", launch.norm.p(), dtype)?;
        let device = launch.input.device();
        let module = kernels::get_or_load_module(self.context(), device.id(), MULTI_MARGIN_MODULE)?;
        let func = kernels::get_kernel_function(&module, &name)?;

        let targets = upload_targets(launch);
        let cfg = group_config(launch.nframe)?;

        let grad_in_ptr = grad_input.ptr();
        let grad_out_ptr = grad_output.ptr();
        let input_ptr = launch.input.ptr();
        let target_ptr = targets.ptr();
        let weight_ptr = launch.weight.map_or(0u64, |w| w.ptr());
        let has_weight = i32::from(launch.weight.is_some());
        let dim = as_i32(launch.dim, "D")?;
        let margin = margin_in_dtype(launch.margin, dtype);
        let denom = as_i32(launch.denom(), "N * D")?;
        let reduce = i32::from(reduce);

        unsafe {
            let mut builder = self.stream().launch_builder(&func);
            builder.arg(&grad_in_ptr);
            builder.arg(&grad_out_ptr);
            builder.arg(&input_ptr);
            builder.arg(&target_ptr);
            builder.arg(&weight_ptr);
            builder.arg(&has_weight);
            builder.arg(&dim);
            builder.arg(&margin);
            builder.arg(&denom);
            builder.arg(&reduce);
            builder.launch(cfg).map_err(|e| Error::LaunchFailure {
                kernel: name.clone(),
                reason: format!("{:?}", e),
            })?;
        }

        Ok(())
    }

    /// Stream-ordered device-to-device copy.
    fn copy_tensor(&self, src: &Tensor<CudaRuntime>, dst: &Tensor<CudaRuntime>) -> Result<()> {
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
        let stream = self.stream().cu_stream();
        unsafe {
            let result = sys::cuMemcpyDtoDAsync_v2(dst.ptr(), src.ptr(), bytes, stream);
            if result != sys::CUresult::CUDA_SUCCESS {
                return Err(Error::LaunchFailure {
                    kernel: "cuMemcpyDtoDAsync_v2".to_string(),
                    reason: format!("{:?}", result),
                });
            }
        }
        Ok(())
    }
}

impl MultiMarginLossOps<CudaRuntime> for CudaClient {
    fn multi_margin_loss_fwd(
        &self,
        input: &Tensor<CudaRuntime>,
        target: &Tensor<CudaRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<CudaRuntime>>,
        reduction: Reduction,
    ) -> Result<Tensor<CudaRuntime>> {
        multi_margin_loss_fwd_impl(self, input, target, p, margin, weight, reduction)
    }

    fn multi_margin_loss_fwd_into(
        &self,
        input: &Tensor<CudaRuntime>,
        target: &Tensor<CudaRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<CudaRuntime>>,
        reduction: Reduction,
        out: &mut Tensor<CudaRuntime>,
    ) -> Result<()> {
        multi_margin_loss_fwd_into_impl(self, input, target, p, margin, weight, reduction, out)
    }

    fn multi_margin_loss_bwd(
        &self,
        grad_output: &Tensor<CudaRuntime>,
        input: &Tensor<CudaRuntime>,
        target: &Tensor<CudaRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<CudaRuntime>>,
        reduction: Reduction,
    ) -> Result<Tensor<CudaRuntime>> {
        multi_margin_loss_bwd_impl(self, grad_output, input, target, p, margin, weight, reduction)
    }

    fn multi_margin_loss_bwd_into(
        &self,
        grad_output: &Tensor<CudaRuntime>,
        input: &Tensor<CudaRuntime>,
        target: &Tensor<CudaRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<CudaRuntime>>,
        reduction: Reduction,
        grad_input: &mut Tensor<CudaRuntime>,
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
