pub mod kernels;
pub mod loss;
