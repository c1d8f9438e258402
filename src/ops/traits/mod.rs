pub mod loss;

pub use loss::{MarginNorm, MultiMarginLossOps, Reduction};
