pub mod multi_margin;

pub use multi_margin::{MarginNorm, MultiMarginLossOps, Reduction};
