pub mod multi_margin;
