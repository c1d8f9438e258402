pub mod multi_margin;

pub use multi_margin::{
    GROUP_SIZE, MultiMarginKernel, MultiMarginLaunch, MultiMarginShape, margin_in_dtype,
    multi_margin_loss_bwd_impl, multi_margin_loss_bwd_into_impl, multi_margin_loss_fwd_impl,
    multi_margin_loss_fwd_into_impl, multi_margin_shape_check, read_targets,
};
