#![warn(missing_docs)]
//!# recbone - Text-Recognition Backbones for Burn
//!
//! Convolutional feature extractors for the visual front end of a
//! sequence-recognition (scene-text) pipeline.
//!
//! ## Notable Components
//!
//! * [`compat`] - shape arithmetic for ``burn`` conv and pool configs.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks::cna`] - ``Conv2d + [BatchNorm2d] + ReLU`` block.
//!   * [`layers::blocks::depthwise_separable`] - depthwise-separable conv unit.
//!   * [`layers::blocks::dense`] - dense blocks and transitions.
//!   * [`layers::pool`] - square and text-line max pools.
//! * [`models`] - complete backbones.
//!   * [`models::backbone`] - selection by name; [`models::backbone::Backbone`].
//!   * [`models::lite`] - `DepthwiseLiteNet`.
//!   * [`models::vgg`] - `VggNet`.
//!   * [`models::resnet_v2`] - `ResNetV2`.
//!   * [`models::densenet`] - `DenseNet`.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;

#[cfg(test)]
pub(crate) mod testing;

pub mod layers;
pub mod models;
