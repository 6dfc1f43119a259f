//! Complete backbone families.
pub mod backbone;
pub mod densenet;
pub mod lite;
pub mod resnet_v2;
pub mod vgg;
