pub mod loss;

pub use loss::{
    multi_margin_loss_bwd_impl, multi_margin_loss_bwd_into_impl, multi_margin_loss_fwd_impl,
    multi_margin_loss_fwd_into_impl, multi_margin_shape_check,
};
