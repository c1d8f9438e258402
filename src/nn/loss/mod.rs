//! Loss functions for neural network training.
//!
//! | Item | Use case |
//! |---|---|
//! | [`multi_margin_loss`] | Multi-class hinge loss on raw scores (SVM-style classifiers) |
//! | [`MultiMarginLoss`] | The same loss as a configured, reusable criterion |

pub mod config;
pub mod multi_margin;

pub use config::MultiMarginLossConfig;
pub use multi_margin::{MultiMarginLoss, multi_margin_loss};
