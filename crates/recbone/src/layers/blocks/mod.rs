//! Miscellaneous blocks.
pub mod cna;
pub mod dense;
pub mod depthwise_separable;
