//! WebGPU implementation of MultiMarginLossOps
//!
//! F32 only (WebGPU limitation).

use crate::error::{Error, Result};
use crate::ops::impl_generic::loss::{
    MultiMarginKernel, MultiMarginLaunch, multi_margin_loss_bwd_impl,
    multi_margin_loss_bwd_into_impl, multi_margin_loss_fwd_impl, multi_margin_loss_fwd_into_impl,
};
use crate::ops::traits::{MultiMarginLossOps, Reduction};
use numr::dtype::DType;
use numr::runtime::wgpu::{WgpuClient, WgpuRuntime, get_buffer};
use numr::tensor::Tensor;
use std::ops::Deref;
use std::task::{Context, Poll, Waker};
use wgpu::BufferUsages;

const FWD_SHADER_SOURCE: &str = include_str!("../shaders/loss/multi_margin_fwd.wgsl");
const BWD_SHADER_SOURCE: &str = include_str!("../shaders/loss/multi_margin_bwd.wgsl");

/// WebGPU caps each dispatch dimension at 65535 workgroups.
const MAX_WORKGROUPS: usize = 65535;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct MarginParams {
    nframe: u32,
    dim: u32,
    p: u32,
    has_weight: u32,
    margin: f32,
    denom: f32,
    reduce: u32,
    _pad: u32,
}

fn validate_f32(t: &Tensor<WgpuRuntime>, op: &'static str) -> Result<()> {
    if t.dtype() != DType::F32 {
        return Err(Error::UnsupportedDType {
            op,
            dtype: t.dtype(),
        });
    }
    Ok(())
}

fn buffer_of(t: &Tensor<WgpuRuntime>, what: &str) -> Result<impl Deref<Target = wgpu::Buffer>> {
    get_buffer(t.storage().ptr()).ok_or_else(|| Error::KernelError {
        reason: format!("{what} buffer not found"),
    })
}

fn as_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidShape {
        arg: "input",
        reason: format!("{what} = {value} exceeds WebGPU u32 indexing"),
    })
}

fn params_for(launch: &MultiMarginLaunch<'_, WgpuRuntime>, reduce: bool) -> Result<MarginParams> {
    as_u32(launch.nframe * launch.dim, "N * D")?;
    Ok(MarginParams {
        nframe: as_u32(launch.nframe, "N")?,
        dim: as_u32(launch.dim, "D")?,
        p: launch.norm.p() as u32,
        has_weight: u32::from(launch.weight.is_some()),
        margin: launch.margin as f32,
        denom: launch.denom() as f32,
        reduce: u32::from(reduce),
        _pad: 0,
    })
}

/// Upload params, bind `buffers` (read-only storage first, then the one
/// read-write output) and dispatch one workgroup per sample.
fn dispatch_multi_margin(
    client: &WgpuClient,
    entry_point: &'static str,
    shader_source: &'static str,
    buffers: &[&wgpu::Buffer],
    params: &MarginParams,
) -> Result<()> {
    let params_buf = client.wgpu_device().create_buffer(&wgpu::BufferDescriptor {
        label: Some("multi_margin_params"),
        size: std::mem::size_of::<MarginParams>() as u64,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    client
        .wgpu_queue()
        .write_buffer(&params_buf, 0, bytemuck::bytes_of(params));

    let device = client.wgpu_device();
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let cache = client.pipeline_cache();
    let module = cache.get_or_create_module(entry_point, shader_source);
    let layout = cache.get_or_create_layout(numr::runtime::wgpu::shaders::LayoutKey {
        num_storage_buffers: buffers.len() as u32,
        num_uniform_buffers: 1,
        num_readonly_storage: buffers.len() as u32 - 1,
    });
    let pipeline = cache.get_or_create_pipeline(entry_point, entry_point, &module, &layout);

    let mut entries: Vec<&wgpu::Buffer> = buffers.to_vec();
    entries.push(&params_buf);
    let bind_group = cache.create_bind_group(&layout, &entries);

    let workgroups = (params.nframe as usize).min(MAX_WORKGROUPS) as u32;

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(entry_point),
        });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(entry_point),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, Some(&bind_group), &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }
    client.wgpu_queue().submit(std::iter::once(encoder.finish()));

    check_error_scope(entry_point, device.pop_error_scope())
}

/// Map a popped validation scope onto `LaunchFailure`.
///
/// Native backends report validation errors synchronously, so the future is
/// ready on first poll. A pending scope (browser backends) is treated as clean.
fn check_error_scope(
    entry_point: &str,
    scope: impl Future<Output = Option<wgpu::Error>>,
) -> Result<()> {
    let mut scope = std::pin::pin!(scope);
    let mut cx = Context::from_waker(Waker::noop());
    match scope.as_mut().poll(&mut cx) {
        Poll::Ready(Some(err)) => Err(Error::LaunchFailure {
            kernel: entry_point.to_string(),
            reason: err.to_string(),
        }),
        Poll::Ready(None) => Ok(()),
        Poll::Pending => {
            log::trace!("{entry_point}: wgpu error scope still pending, not checked");
            Ok(())
        }
    }
}

/// Upload the range-checked targets as an I32 storage tensor.
fn upload_targets(launch: &MultiMarginLaunch<'_, WgpuRuntime>) -> Tensor<WgpuRuntime> {
    let targets: Vec<i32> = launch.targets.iter().map(|&t| t as i32).collect();
    Tensor::<WgpuRuntime>::from_slice(&targets, &[targets.len()], launch.input.device())
}

impl MultiMarginKernel<WgpuRuntime> for WgpuClient {
    fn launch_multi_margin_fwd(
        &self,
        launch: &MultiMarginLaunch<'_, WgpuRuntime>,
        output: &Tensor<WgpuRuntime>,
    ) -> Result<()> {
        validate_f32(launch.input, "multi_margin_loss")?;
        let params = params_for(launch, false)?;

        let targets = upload_targets(launch);
        let input_buf = buffer_of(launch.input, "input")?;
        let target_buf = buffer_of(&targets, "target")?;
        // Unweighted launches bind the input again; the shader never reads it.
        let weight_buf = buffer_of(launch.weight.unwrap_or(launch.input), "weight")?;
        let out_buf = buffer_of(output, "output")?;

        dispatch_multi_margin(
            self,
            "multi_margin_fwd_f32",
            FWD_SHADER_SOURCE,
            &[&input_buf, &target_buf, &weight_buf, &out_buf],
            &params,
        )
    }

    fn launch_multi_margin_bwd(
        &self,
        launch: &MultiMarginLaunch<'_, WgpuRuntime>,
        grad_output: &Tensor<WgpuRuntime>,
        reduce: bool,
        grad_input: &Tensor<WgpuRuntime>,
    ) -> Result<()> {
        validate_f32(launch.input, "multi_margin_loss_backward")?;
        let params = params_for(launch, reduce)?;

        let targets = upload_targets(launch);
        let input_buf = buffer_of(launch.input, "input")?;
        let target_buf = buffer_of(&targets, "target")?;
        let weight_buf = buffer_of(launch.weight.unwrap_or(launch.input), "weight")?;
        let grad_out_buf = buffer_of(grad_output, "grad_output")?;
        let grad_in_buf = buffer_of(grad_input, "grad_input")?;

        dispatch_multi_margin(
            self,
            "multi_margin_bwd_f32",
            BWD_SHADER_SOURCE,
            &[
                &input_buf,
                &target_buf,
                &weight_buf,
                &grad_out_buf,
                &grad_in_buf,
            ],
            &params,
        )
    }

    fn copy_tensor(&self, src: &Tensor<WgpuRuntime>, dst: &Tensor<WgpuRuntime>) -> Result<()> {
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
        let bytes = (src.numel() * src.dtype().size_in_bytes()) as u64;
        let src_buf = buffer_of(&src, "copy source")?;
        let dst_buf = buffer_of(dst, "copy destination")?;

        let mut encoder =
            self.wgpu_device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("multi_margin_copy"),
                });
        encoder.copy_buffer_to_buffer(&src_buf, 0, &dst_buf, 0, bytes);
        self.wgpu_queue().submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

impl MultiMarginLossOps<WgpuRuntime> for WgpuClient {
    fn multi_margin_loss_fwd(
        &self,
        input: &Tensor<WgpuRuntime>,
        target: &Tensor<WgpuRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<WgpuRuntime>>,
        reduction: Reduction,
    ) -> Result<Tensor<WgpuRuntime>> {
        multi_margin_loss_fwd_impl(self, input, target, p, margin, weight, reduction)
    }

    fn multi_margin_loss_fwd_into(
        &self,
        input: &Tensor<WgpuRuntime>,
        target: &Tensor<WgpuRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<WgpuRuntime>>,
        reduction: Reduction,
        out: &mut Tensor<WgpuRuntime>,
    ) -> Result<()> {
        multi_margin_loss_fwd_into_impl(self, input, target, p, margin, weight, reduction, out)
    }

    fn multi_margin_loss_bwd(
        &self,
        grad_output: &Tensor<WgpuRuntime>,
        input: &Tensor<WgpuRuntime>,
        target: &Tensor<WgpuRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<WgpuRuntime>>,
        reduction: Reduction,
    ) -> Result<Tensor<WgpuRuntime>> {
        multi_margin_loss_bwd_impl(self, grad_output, input, target, p, margin, weight, reduction)
    }

    fn multi_margin_loss_bwd_into(
        &self,
        grad_output: &Tensor<WgpuRuntime>,
        input: &Tensor<WgpuRuntime>,
        target: &Tensor<WgpuRuntime>,
        p: i64,
        margin: f64,
        weight: Option<&Tensor<WgpuRuntime>>,
        reduction: Reduction,
        grad_input: &mut Tensor<WgpuRuntime>,
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
