pub mod autograd_loss;
pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod impl_generic;
pub mod traits;
#[cfg(feature = "wgpu")]
pub mod wgpu;

pub use autograd_loss::var_multi_margin_loss;
pub use traits::{MarginNorm, MultiMarginLossOps, Reduction};
