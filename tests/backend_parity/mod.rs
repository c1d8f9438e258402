pub mod helpers;

pub mod multi_margin;
