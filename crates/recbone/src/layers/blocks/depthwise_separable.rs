//! # Depthwise-Separable Convolution Unit
//!
//! A [`DepthwiseSeparable2d`] factors a convolution into:
//! * a depthwise pass; one filter group per input channel,
//! * a 1x1 pointwise pass; mixing channels.
//!
//! Each pass is a [`CNA2d`] block, optionally normalized.

use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CNA2dMeta};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Tensor};

/// [`DepthwiseSeparable2d`] Meta.
pub trait DepthwiseSeparable2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// The pointwise pass is 1x1/stride 1; only the depthwise pass changes resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]>;
}

/// [`DepthwiseSeparable2d`] Config.
#[derive(Config, Debug)]
pub struct DepthwiseSeparable2dConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Number of output channels.
    pub out_channels: usize,

    /// Square depthwise kernel size.
    pub kernel_size: usize,

    /// Depthwise stride.
    #[config(default = 1)]
    pub stride: usize,

    /// Depthwise padding.
    #[config(default = 0)]
    pub padding: usize,

    /// Apply batch norm after each pass.
    #[config(default = "false")]
    pub use_norm: bool,
}

impl DepthwiseSeparable2dConfig {
    fn cna(
        &self,
        conv: Conv2dConfig,
    ) -> CNA2dConfig {
        if self.use_norm {
            CNA2dConfig::conv_bn_relu(conv)
        } else {
            CNA2dConfig::conv_relu(conv)
        }
    }

    /// The depthwise pass config.
    pub fn depthwise_config(&self) -> CNA2dConfig {
        self.cna(
            Conv2dConfig::new(
                [self.in_channels, self.in_channels],
                [self.kernel_size, self.kernel_size],
            )
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
            .with_groups(self.in_channels),
        )
    }

    /// The pointwise pass config.
    pub fn pointwise_config(&self) -> CNA2dConfig {
        self.cna(Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [1, 1],
        ))
    }

    /// Initialize a [`DepthwiseSeparable2d`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DepthwiseSeparable2d<B> {
        DepthwiseSeparable2d {
            depthwise: self.depthwise_config().init(device),
            pointwise: self.pointwise_config().init(device),
        }
    }
}

impl DepthwiseSeparable2dMeta for DepthwiseSeparable2dConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        self.depthwise_config().output_resolution(input_resolution)
    }
}

/// Depthwise-separable convolution unit.
#[derive(Module, Debug)]
pub struct DepthwiseSeparable2d<B: Backend> {
    /// Depthwise conv/norm/act; ``groups = in_channels``.
    pub depthwise: CNA2d<B>,

    /// 1x1 conv/norm/act.
    pub pointwise: CNA2d<B>,
}

impl<B: Backend> DepthwiseSeparable2dMeta for DepthwiseSeparable2d<B> {
    fn in_channels(&self) -> usize {
        self.depthwise.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.pointwise.out_channels()
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        self.depthwise.output_resolution(input_resolution)
    }
}

impl<B: Backend> DepthwiseSeparable2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.depthwise.forward(input);
        self.pointwise.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBackend;
    use bimm_contracts::assert_shape_contract;
    use burn::tensor::Distribution;

    #[test]
    fn test_depthwise_separable_config() {
        let config = DepthwiseSeparable2dConfig::new(24, 128, 3).with_padding(1);

        let dw = config.depthwise_config();
        assert_eq!(dw.groups(), 24);
        assert_eq!(dw.in_channels(), 24);
        assert_eq!(dw.out_channels(), 24);
        assert!(!dw.has_norm());

        let pw = config.pointwise_config();
        assert_eq!(pw.kernel_size(), [1, 1]);
        assert_eq!(pw.out_channels(), 128);

        assert_eq!(config.output_resolution([16, 160]), Some([16, 160]));
        assert_eq!(
            DepthwiseSeparable2dConfig::new(24, 128, 2)
                .with_padding(0)
                .output_resolution([2, 82]),
            Some([1, 81])
        );
    }

    #[test]
    fn test_depthwise_separable_forward() {
        let device = Default::default();

        let config = DepthwiseSeparable2dConfig::new(4, 8, 3)
            .with_stride(2)
            .with_padding(1)
            .with_use_norm(true);
        let unit: DepthwiseSeparable2d<TestBackend> = config.init(&device);

        assert_eq!(unit.in_channels(), 4);
        assert_eq!(unit.out_channels(), 8);
        assert!(unit.depthwise.has_norm());
        assert!(unit.pointwise.has_norm());
        assert_eq!(unit.depthwise.groups(), 4);

        let input = Tensor::random([2, 4, 9, 12], Distribution::Default, &device);
        let output = unit.forward(input.clone());

        let [out_height, out_width] = config.output_resolution([9, 12]).unwrap();
        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_channels", 8),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        let expected = unit.pointwise.forward(unit.depthwise.forward(input));
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
