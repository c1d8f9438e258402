//! # marginr
//!
//! **Multi-class margin loss for numr: forward, backward and autograd on CPU, CUDA and WebGPU.**
//!
//! marginr adds the multi-class hinge loss (`max(0, margin - x[t] + x[i])^p`)
//! to numr's tensors. It uses numr's runtime, tensors and ops directly and
//! ships its own per-sample reduction kernels for each backend.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ nn::MultiMarginLoss / nn::multi_margin_loss   (Var-level) │
//! ├──────────────────────────────────────────────────────────┤
//! │ ops::var_multi_margin_loss                     (autograd) │
//! ├──────────────────────────────────────────────────────────┤
//! │ ops::MultiMarginLossOps              (Tensor-level trait) │
//! │   impl_generic: validation, allocation, batch reduction   │
//! │   cpu / cuda / wgpu: one reduction group per sample       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use marginr::{MultiMarginLossOps, Reduction, Tensor};
//! use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};
//!
//! let device = CpuDevice::new();
//! let client = CpuClient::new(device.clone());
//! let input = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0], &[1, 3], &device);
//! let target = Tensor::<CpuRuntime>::from_slice(&[0i64], &[1], &device);
//! let loss = client.multi_margin_loss_fwd(&input, &target, 1, 1.0, None, Reduction::Mean)?;
//! assert!((loss.to_vec::<f32>()[0] - 5.0 / 3.0).abs() < 1e-6);
//! # Ok::<(), marginr::error::Error>(())
//! ```

pub mod error;
pub mod nn;
pub mod ops;

pub use nn::{MultiMarginLoss, MultiMarginLossConfig};
pub use ops::{MarginNorm, MultiMarginLossOps, Reduction, var_multi_margin_loss};

// Re-export numr types that users will commonly need
pub use numr::dtype::DType;
pub use numr::error::{Error as NumrError, Result as NumrResult};
pub use numr::runtime::{Runtime, RuntimeClient};
pub use numr::tensor::Tensor;
