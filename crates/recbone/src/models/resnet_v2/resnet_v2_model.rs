//! # `ResNetV2` Backbone
//!
//! A pre-activation residual backbone for text lines.
//!
//! ```text
//! stem:  cbr(3x3, 64) -> conv(2x2, stride 2)
//! body:  preact(64->64) -> preact(64->128) -> dropout
//!        preact(128->128, stride 2) -> preact(128->256) -> dropout
//!        conv(2x2, stride (2, 1), padding (0, 1))
//!        preact(256->512) -> bn -> relu
//! head:  cbr(3x3, 1024) -> cbr(2x2, padding (0, 1), 2048)
//! ```

use crate::compat::conv_shape::{maybe_conv_output_shape, padding_to_pair};
use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CNA2dMeta};
use crate::models::backbone::{BackboneMeta, FeatureShape};
use crate::models::resnet_v2::preact_block::{PreActBlock, PreActBlockConfig, PreActBlockMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Selection name of [`ResNetV2`].
pub const RESNET_V2_NAME: &str = "resnet";

/// [`ResNetV2`] output channels.
pub const RESNET_V2_OUT_CHANNELS: usize = 2048;

/// [`ResNetV2`] configuration.
#[derive(Config, Debug)]
pub struct ResNetV2Config {
    /// The size of the in channels dimension.
    pub in_channels: usize,

    /// Dropout probability between residual stages.
    #[config(default = "0.2")]
    pub drop_rate: f64,
}

impl BackboneMeta for ResNetV2Config {
    fn name(&self) -> &'static str {
        RESNET_V2_NAME
    }

    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        RESNET_V2_OUT_CHANNELS
    }

    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape> {
        let conv = |cfg: &Conv2dConfig, res: [usize; 2]| {
            let padding = padding_to_pair(&cfg.padding, cfg.kernel_size);
            maybe_conv_output_shape(res, cfg.kernel_size, cfg.stride, padding, cfg.dilation)
        };

        let blocks = Self::block_configs();
        let [head1, head2] = Self::head_cna_configs();

        let res = self.stem_cna_config().output_resolution(input_resolution)?;
        let res = conv(&Self::stem_conv_config(), res)?;
        let res = blocks[..4]
            .iter()
            .try_fold(res, |res, block| block.output_resolution(res))?;
        let res = conv(&Self::compress_conv_config(), res)?;
        let res = blocks[4].output_resolution(res)?;
        let res = head1.output_resolution(res)?;
        let [height, width] = head2.output_resolution(res)?;

        Some(FeatureShape::new(RESNET_V2_OUT_CHANNELS, height, width))
    }
}

impl ResNetV2Config {
    fn stem_cna_config(&self) -> CNA2dConfig {
        CNA2dConfig::conv_bn_relu(
            Conv2dConfig::new([self.in_channels, 64], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false),
        )
    }

    fn stem_conv_config() -> Conv2dConfig {
        Conv2dConfig::new([64, 64], [2, 2])
            .with_stride([2, 2])
            .with_bias(false)
    }

    fn block_configs() -> [PreActBlockConfig; 5] {
        [
            PreActBlockConfig::new(64, 64).with_downsample(true),
            PreActBlockConfig::new(64, 128).with_downsample(true),
            PreActBlockConfig::new(128, 128)
                .with_stride(2)
                .with_downsample(true),
            PreActBlockConfig::new(128, 256).with_downsample(true),
            PreActBlockConfig::new(256, 512).with_downsample(true),
        ]
    }

    fn compress_conv_config() -> Conv2dConfig {
        Conv2dConfig::new([256, 256], [2, 2])
            .with_stride([2, 1])
            .with_padding(PaddingConfig2d::Explicit(0, 1))
            .with_bias(false)
    }

    fn head_cna_configs() -> [CNA2dConfig; 2] {
        [
            CNA2dConfig::conv_bn_relu(Conv2dConfig::new([512, 1024], [3, 3]).with_bias(false)),
            CNA2dConfig::conv_bn_relu(
                Conv2dConfig::new([1024, RESNET_V2_OUT_CHANNELS], [2, 2])
                    .with_padding(PaddingConfig2d::Explicit(0, 1))
                    .with_bias(false),
            ),
        ]
    }

    /// Initialize a [`ResNetV2`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNetV2<B> {
        tracing::debug!(
            in_channels = self.in_channels,
            drop_rate = self.drop_rate,
            "initializing ResNetV2 backbone"
        );

        let [block1, block2, block3, block4, block5] =
            Self::block_configs().map(|cfg| cfg.init(device));
        let [head1, head2] = Self::head_cna_configs().map(|cfg| cfg.init(device));

        ResNetV2 {
            stem_cna: self.stem_cna_config().init(device),
            stem_conv: Self::stem_conv_config().init(device),

            block1,
            block2,
            dropout1: DropoutConfig::new(self.drop_rate).init(),

            block3,
            block4,
            dropout2: DropoutConfig::new(self.drop_rate).init(),

            compress: Self::compress_conv_config().init(device),

            block5,
            norm: BatchNormConfig::new(512).init(device),
            act: Relu::new(),

            head1,
            head2,
        }
    }
}

/// `ResNetV2` backbone.
///
/// Maps ``[batch, in_channels, height, width]`` to ``[batch, 2048, out_height, out_width]``.
#[derive(Module, Debug)]
pub struct ResNetV2<B: Backend> {
    stem_cna: CNA2d<B>,
    stem_conv: Conv2d<B>,

    block1: PreActBlock<B>,
    block2: PreActBlock<B>,
    dropout1: Dropout,

    block3: PreActBlock<B>,
    block4: PreActBlock<B>,
    dropout2: Dropout,

    compress: Conv2d<B>,

    block5: PreActBlock<B>,
    norm: BatchNorm<B, 2>,
    act: Relu,

    head1: CNA2d<B>,
    head2: CNA2d<B>,
}

impl<B: Backend> BackboneMeta for ResNetV2<B> {
    fn name(&self) -> &'static str {
        RESNET_V2_NAME
    }

    fn in_channels(&self) -> usize {
        self.stem_cna.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.head2.out_channels()
    }

    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape> {
        ResNetV2Config::new(self.in_channels()).output_shape(input_resolution)
    }
}

impl<B: Backend> ResNetV2<B> {
    /// The residual blocks, in order.
    pub fn blocks(&self) -> [&PreActBlock<B>; 5] {
        [
            &self.block1,
            &self.block2,
            &self.block3,
            &self.block4,
            &self.block5,
        ]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, 2048, out_height, out_width]``
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())]
        );

        let x = self.stem_cna.forward(input);
        let x = self.stem_conv.forward(x);

        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.dropout1.forward(x);

        let x = self.block3.forward(x);
        let x = self.block4.forward(x);
        let x = self.dropout2.forward(x);

        let x = self.compress.forward(x);

        let x = self.block5.forward(x);
        let x = self.act.forward(self.norm.forward(x));

        let x = self.head1.forward(x);
        let x = self.head2.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[("batch", batch), ("out_channels", self.out_channels())]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestAutodiffBackend, TestBackend, assert_idempotent_forward};
    use bimm_contracts::assert_shape_contract;
    use burn::tensor::Distribution;

    #[test]
    fn test_resnet_v2_config() {
        let config = ResNetV2Config::new(3);
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.out_channels(), 2048);
        assert_eq!(config.drop_rate, 0.2);

        assert_eq!(
            config.output_shape([32, 320]),
            Some(FeatureShape::new(2048, 1, 80))
        );
        assert_eq!(
            config.output_shape([32, 32]),
            Some(FeatureShape::new(2048, 1, 8))
        );
        assert_eq!(
            config.output_shape([64, 100]),
            Some(FeatureShape::new(2048, 5, 25))
        );
        assert_eq!(config.output_shape([16, 320]), None);
    }

    #[test]
    fn test_resnet_v2_blocks_are_projected() {
        for block in ResNetV2Config::block_configs() {
            assert!(block.has_downsample());
        }
    }

    #[test]
    fn test_resnet_v2_forward() {
        let device = Default::default();

        let config = ResNetV2Config::new(1);
        let model: ResNetV2<TestBackend> = config.init(&device);
        assert_eq!(model.in_channels(), 1);
        assert_eq!(model.out_channels(), 2048);
        assert_eq!(
            model.blocks().map(|b| b.out_channels()),
            [64, 128, 128, 256, 512]
        );

        let input = Tensor::random([2, 1, 32, 32], Distribution::Default, &device);
        let output = model.forward(input.clone());

        let expected = config.output_shape([32, 32]).unwrap();
        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_channels", expected.channels),
                ("out_height", expected.height),
                ("out_width", expected.width)
            ],
        );

        assert_idempotent_forward(input, |x| model.forward(x));
    }

    #[test]
    fn test_resnet_v2_forward_autodiff() {
        let device = Default::default();

        let model: ResNetV2<TestAutodiffBackend> = ResNetV2Config::new(3).init(&device);

        let input = Tensor::random([1, 3, 32, 24], Distribution::Default, &device);
        let output = model.forward(input);

        let expected = ResNetV2Config::new(3).output_shape([32, 24]).unwrap();
        assert_eq!(output.dims(), expected.dims(1));
    }
}
