pub mod loss;

pub use loss::{MultiMarginLoss, MultiMarginLossConfig, multi_margin_loss};
