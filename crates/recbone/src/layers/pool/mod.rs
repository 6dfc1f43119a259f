//! # Pooling Layers
//!
//! Max-pool recipes shared by the VGG-style backbones.
//!
//! Text lines are wide and short; after the first few stages the backbones
//! switch from square pooling to [`text_line_max_pool_config`],
//! which halves the height while keeping (growing by one) the width.

use crate::compat::conv_shape::maybe_pool2d_output_resolution;
use burn::nn::PaddingConfig2d;
use burn::nn::pool::MaxPool2dConfig;

/// ``2x2`` max pool, stride 2.
pub fn square_max_pool_config() -> MaxPool2dConfig {
    MaxPool2dConfig::new([2, 2]).with_strides([2, 2])
}

/// ``2x2`` max pool, stride ``(2, 1)``, padding ``(0, 1)``.
pub fn text_line_max_pool_config() -> MaxPool2dConfig {
    MaxPool2dConfig::new([2, 2])
        .with_strides([2, 1])
        .with_padding(PaddingConfig2d::Explicit(0, 1))
}

/// Get the output resolution of a max pool for a given input resolution.
///
/// # Returns
///
/// ``Some([out_height, out_width])``; or `None` if the input does not survive the pool.
pub fn max_pool_output_resolution(
    config: &MaxPool2dConfig,
    input_resolution: [usize; 2],
) -> Option<[usize; 2]> {
    maybe_pool2d_output_resolution(
        input_resolution,
        config.kernel_size,
        config.strides,
        &config.padding,
    )
}
