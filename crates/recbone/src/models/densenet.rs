//! # `DenseNet` Backbone
//!
//! ```text
//! stem:  conv(5x5, stride 2, 64)
//! body:  dense(64 -> 128)  -> transition(128 -> 128, pool stride 2)
//!        dense(128 -> 192) -> transition(192 -> 128, pool stride (2, 1))
//!        dense(128 -> 192) -> bn -> relu
//! fold:  [batch, channels, height, width] -> [batch, channels * height, 1, width]
//! ```
//!
//! The fold makes the output channel count depend on the input height;
//! [`BackboneMeta::out_channels`] reports the count for
//! [`DENSENET_DESIGN_HEIGHT`], while [`DenseNetMeta::folded_channels`]
//! gives the count for any height.

use crate::compat::conv_shape::{maybe_conv_output_shape, padding_to_pair};
use crate::layers::blocks::dense::{
    DenseBlock, DenseBlockConfig, DenseTransition, DenseTransitionConfig,
};
use crate::models::backbone::{BackboneMeta, FeatureShape};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Selection name of [`DenseNet`].
pub const DENSENET_NAME: &str = "densenet";

/// The input height the reported ``out_channels`` assumes.
pub const DENSENET_DESIGN_HEIGHT: usize = 32;

/// Stem output channels.
const STEM_CHANNELS: usize = 64;

/// Transition output channels.
const TRANSITION_CHANNELS: usize = 128;

/// [`DenseNet`] Meta trait.
pub trait DenseNetMeta: BackboneMeta {
    /// Channels of the last dense block, before the fold.
    fn feature_channels(&self) -> usize;

    /// The channel count after folding height into channels.
    ///
    /// # Returns
    ///
    /// ``Some(feature_channels * out_height)``; or `None` if the input is too short.
    fn folded_channels(
        &self,
        input_height: usize,
    ) -> Option<usize> {
        // Only the height matters; any surviving width will do.
        let [height, _] = feature_resolution([input_height, 8])?;
        Some(self.feature_channels() * height)
    }
}

/// Resolution of the last dense block, before the fold.
fn feature_resolution(input_resolution: [usize; 2]) -> Option<[usize; 2]> {
    let stem = DenseNetConfig::stem_config(1);
    let stem_padding = padding_to_pair(&stem.padding, stem.kernel_size);
    let res = maybe_conv_output_shape(
        input_resolution,
        stem.kernel_size,
        stem.stride,
        stem_padding,
        stem.dilation,
    )?;

    let [t1, t2] = DenseNetConfig::new(1).transition_configs();
    let res = t1.output_resolution(res)?;
    t2.output_resolution(res)
}

/// [`DenseNet`] configuration.
#[derive(Config, Debug)]
pub struct DenseNetConfig {
    /// The size of the in channels dimension.
    pub in_channels: usize,

    /// Channels added by each dense layer.
    #[config(default = 8)]
    pub growth_rate: usize,

    /// Dense layers per block.
    #[config(default = 8)]
    pub block_layers: usize,

    /// Dense layer bottleneck width, as a multiple of ``growth_rate``.
    #[config(default = 4)]
    pub bottleneck_factor: usize,

    /// Dropout probability in the transitions.
    #[config(default = "0.2")]
    pub drop_rate: f64,
}

impl DenseNetConfig {
    fn stem_config(in_channels: usize) -> Conv2dConfig {
        Conv2dConfig::new([in_channels, STEM_CHANNELS], [5, 5])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(2, 2))
            .with_bias(false)
    }

    fn block_config(
        &self,
        in_channels: usize,
    ) -> DenseBlockConfig {
        DenseBlockConfig::new(self.block_layers, in_channels, self.growth_rate)
            .with_bottleneck_factor(self.bottleneck_factor)
    }

    fn block_configs(&self) -> [DenseBlockConfig; 3] {
        [
            self.block_config(STEM_CHANNELS),
            self.block_config(TRANSITION_CHANNELS),
            self.block_config(TRANSITION_CHANNELS),
        ]
    }

    fn transition_configs(&self) -> [DenseTransitionConfig; 2] {
        let [b1, b2, _] = self.block_configs();
        [
            DenseTransitionConfig::new(b1.out_channels(), TRANSITION_CHANNELS)
                .with_drop_rate(self.drop_rate),
            DenseTransitionConfig::new(b2.out_channels(), TRANSITION_CHANNELS)
                .with_pool_strides([2, 1])
                .with_drop_rate(self.drop_rate),
        ]
    }

    /// Initialize a [`DenseNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DenseNet<B> {
        tracing::debug!(
            in_channels = self.in_channels,
            growth_rate = self.growth_rate,
            block_layers = self.block_layers,
            drop_rate = self.drop_rate,
            "initializing DenseNet backbone"
        );

        let [block1, block2, block3] = self.block_configs().map(|cfg| cfg.init(device));
        let [transition1, transition2] = self.transition_configs().map(|cfg| cfg.init(device));

        DenseNet {
            out_channels: self.out_channels(),
            stem: Self::stem_config(self.in_channels).init(device),
            block1,
            transition1,
            block2,
            transition2,
            block3,
            norm: BatchNormConfig::new(self.feature_channels()).init(device),
            act: Relu::new(),
        }
    }
}

impl BackboneMeta for DenseNetConfig {
    fn name(&self) -> &'static str {
        DENSENET_NAME
    }

    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.folded_channels(DENSENET_DESIGN_HEIGHT)
            .unwrap_or_else(|| self.feature_channels())
    }

    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape> {
        let [height, width] = feature_resolution(input_resolution)?;
        Some(FeatureShape::new(self.feature_channels() * height, 1, width))
    }
}

impl DenseNetMeta for DenseNetConfig {
    fn feature_channels(&self) -> usize {
        let [_, _, b3] = self.block_configs();
        b3.out_channels()
    }
}

/// `DenseNet` backbone.
///
/// Maps ``[batch, in_channels, height, width]`` to ``[batch, folded_channels, 1, out_width]``.
#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    /// Reported output channels; see [`DENSENET_DESIGN_HEIGHT`].
    pub out_channels: usize,

    stem: Conv2d<B>,
    block1: DenseBlock<B>,
    transition1: DenseTransition<B>,
    block2: DenseBlock<B>,
    transition2: DenseTransition<B>,
    block3: DenseBlock<B>,
    norm: BatchNorm<B, 2>,
    act: Relu,
}

impl<B: Backend> BackboneMeta for DenseNet<B> {
    fn name(&self) -> &'static str {
        DENSENET_NAME
    }

    fn in_channels(&self) -> usize {
        self.stem.weight.shape().dims[1]
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape> {
        let [height, width] = feature_resolution(input_resolution)?;
        Some(FeatureShape::new(self.feature_channels() * height, 1, width))
    }
}

impl<B: Backend> DenseNetMeta for DenseNet<B> {
    fn feature_channels(&self) -> usize {
        self.block3.out_channels()
    }
}

impl<B: Backend> DenseNet<B> {
    /// The dense blocks, in order.
    pub fn blocks(&self) -> [&DenseBlock<B>; 3] {
        [&self.block1, &self.block2, &self.block3]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, feature_channels * out_height, 1, out_width]``
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        assert_shape_contract_periodically!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &[("in_channels", self.in_channels())]
        );

        let x = self.stem.forward(input);
        let x = self.transition1.forward(self.block1.forward(x));
        let x = self.transition2.forward(self.block2.forward(x));
        let x = self.block3.forward(x);
        let x = self.act.forward(self.norm.forward(x));

        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &x,
            &["batch", "height", "width"],
            &[("channels", self.feature_channels())]
        );
        let channels = self.feature_channels();

        let x = x.reshape([batch, channels * height, 1, width]);

        assert_shape_contract_periodically!(
            ["batch", "folded_channels", "one", "width"],
            &x,
            &[("batch", batch), ("one", 1), ("width", width)]
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
    use hamcrest::prelude::*;

    #[test]
    fn test_densenet_config() {
        let config = DenseNetConfig::new(3);
        assert_eq!(config.growth_rate, 8);
        assert_eq!(config.block_layers, 8);
        assert_eq!(config.bottleneck_factor, 4);
        assert_eq!(config.drop_rate, 0.2);

        assert_eq!(
            config.block_configs().each_ref().map(|b| b.out_channels()),
            [128, 192, 192]
        );
        assert_eq!(config.feature_channels(), 192);
        assert_that!(config.out_channels(), is(equal_to(768)));

        assert_eq!(
            config.output_shape([32, 320]),
            Some(FeatureShape::new(768, 1, 79))
        );
        assert_eq!(
            config.output_shape([64, 100]),
            Some(FeatureShape::new(192 * 8, 1, 24))
        );
        assert_eq!(config.folded_channels(64), Some(192 * 8));
        assert_eq!(config.folded_channels(4), None);
        assert_eq!(config.output_shape([4, 320]), None);
    }

    #[test]
    fn test_densenet_growth_rate() {
        let config = DenseNetConfig::new(1)
            .with_growth_rate(4)
            .with_block_layers(2);
        assert_eq!(config.feature_channels(), 136);
        assert_eq!(config.out_channels(), 136 * 4);
    }

    #[test]
    fn test_densenet_without_dense_layers() {
        let device = Default::default();

        let config = DenseNetConfig::new(1).with_block_layers(0);
        assert_eq!(config.feature_channels(), 128);
        assert_eq!(config.out_channels(), 128 * 4);

        let model: DenseNet<TestBackend> = config.init(&device);
        assert_eq!(model.feature_channels(), 128);
        assert!(model.blocks().iter().all(|b| b.layers.is_empty()));

        let output = model.forward(Tensor::zeros([1, 1, 32, 32], &device));
        let expected = model.output_shape([32, 32]).unwrap();
        assert_eq!(expected, FeatureShape::new(512, 1, 7));
        assert_eq!(output.dims(), expected.dims(1));
    }

    #[test]
    fn test_densenet_forward() {
        let device = Default::default();

        let config = DenseNetConfig::new(3);
        let model: DenseNet<TestBackend> = config.init(&device);
        assert_eq!(model.in_channels(), 3);
        assert_eq!(model.out_channels(), 768);
        assert_eq!(model.feature_channels(), 192);
        assert!(model.blocks().iter().all(|b| b.layers.len() == 8));

        let input = Tensor::random([1, 3, 32, 320], Distribution::Default, &device);
        let output = model.forward(input.clone());

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 1),
                ("out_channels", 768),
                ("out_height", 1),
                ("out_width", 79)
            ],
        );

        assert_idempotent_forward(input, |x| model.forward(x));
    }

    #[test]
    fn test_densenet_folds_taller_inputs() {
        let device = Default::default();

        let config = DenseNetConfig::new(1);
        let model: DenseNet<TestBackend> = config.init(&device);

        let input = Tensor::random([2, 1, 48, 40], Distribution::Default, &device);
        let output = model.forward(input);

        let expected = model.output_shape([48, 40]).unwrap();
        assert_eq!(expected.height, 1);
        assert_eq!(Some(expected.channels), model.folded_channels(48));
        assert_eq!(output.dims(), expected.dims(2));
        assert_ne!(expected.channels, model.out_channels());
    }

    #[test]
    fn test_densenet_forward_autodiff() {
        let device = Default::default();

        let model: DenseNet<TestAutodiffBackend> = DenseNetConfig::new(3).init(&device);

        let input = Tensor::random([1, 3, 32, 32], Distribution::Default, &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [1, 768, 1, 7]);
    }
}
