//! Host kernels

pub mod multi_margin;

pub use multi_margin::{Accumulator, MarginElement, multi_margin_bwd, multi_margin_fwd};
