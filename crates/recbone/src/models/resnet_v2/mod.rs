//! # `ResNetV2`
//!
//! Pre-activation residual backbone.

pub mod preact_block;
pub mod resnet_v2_model;

pub use preact_block::*;
pub use resnet_v2_model::*;
