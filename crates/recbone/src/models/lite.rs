//! # `DepthwiseLiteNet` Backbone
//!
//! A lightweight depthwise-separable backbone for text lines.
//!
//! | stage | kernel | stride | padding | channels | norm |
//! |-------|--------|--------|---------|----------|------|
//! | stem  | 5      | 2      | 2       | 24       | no   |
//! | dw1   | 3      | 1      | 1       | 128      | no   |
//! | dw2   | 3      | 1      | 1       | 256      | yes  |
//! | dw3   | 3      | 1      | 1       | 256      | no   |
//! | dw4   | 3      | 1      | 1       | 512      | yes  |
//! | dw5   | 3      | 1      | 1       | 512      | no   |
//! | dw6   | 2      | 1      | 0       | 512      | yes  |
//!
//! A square max pool follows `dw1`; text-line max pools follow `dw3` and `dw5`.

use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CNA2dMeta};
use crate::layers::blocks::depthwise_separable::{
    DepthwiseSeparable2d, DepthwiseSeparable2dConfig, DepthwiseSeparable2dMeta,
};
use crate::layers::pool::{
    max_pool_output_resolution, square_max_pool_config, text_line_max_pool_config,
};
use crate::models::backbone::{BackboneMeta, FeatureShape};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::MaxPool2d;
use burn::prelude::{Backend, Config, Module, Tensor};

/// Selection name of [`DepthwiseLiteNet`].
pub const LITE_NAME: &str = "cnn_lite";

/// Per-stage kernel sizes.
pub const LITE_KERNEL_SIZES: [usize; 7] = [5, 3, 3, 3, 3, 3, 2];

/// Per-stage strides.
pub const LITE_STRIDES: [usize; 7] = [2, 1, 1, 1, 1, 1, 1];

/// Per-stage paddings.
pub const LITE_PADDINGS: [usize; 7] = [2, 1, 1, 1, 1, 1, 0];

/// Per-stage channel widths.
pub const LITE_CHANNELS: [usize; 7] = [24, 128, 256, 256, 512, 512, 512];

/// Which depthwise-separable stages normalize.
const LITE_NORMS: [bool; 6] = [false, true, false, true, false, true];

/// [`DepthwiseLiteNet`] configuration.
#[derive(Config, Debug)]
pub struct DepthwiseLiteNetConfig {
    /// The size of the in channels dimension.
    pub in_channels: usize,
}

impl BackboneMeta for DepthwiseLiteNetConfig {
    fn name(&self) -> &'static str {
        LITE_NAME
    }

    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        LITE_CHANNELS[6]
    }

    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape> {
        let [dw1, dw2, dw3, dw4, dw5, dw6] = Self::unit_configs();
        let square = square_max_pool_config();
        let text_line = text_line_max_pool_config();

        let res = self.stem_config().output_resolution(input_resolution)?;
        let res = dw1.output_resolution(res)?;
        let res = max_pool_output_resolution(&square, res)?;
        let res = dw2.output_resolution(res)?;
        let res = dw3.output_resolution(res)?;
        let res = max_pool_output_resolution(&text_line, res)?;
        let res = dw4.output_resolution(res)?;
        let res = dw5.output_resolution(res)?;
        let res = max_pool_output_resolution(&text_line, res)?;
        let [height, width] = dw6.output_resolution(res)?;

        Some(FeatureShape::new(self.out_channels(), height, width))
    }
}

impl DepthwiseLiteNetConfig {
    fn stem_config(&self) -> CNA2dConfig {
        let (k, s, p) = (LITE_KERNEL_SIZES[0], LITE_STRIDES[0], LITE_PADDINGS[0]);
        CNA2dConfig::conv_relu(
            Conv2dConfig::new([self.in_channels, LITE_CHANNELS[0]], [k, k])
                .with_stride([s, s])
                .with_padding(PaddingConfig2d::Explicit(p, p)),
        )
    }

    fn unit_configs() -> [DepthwiseSeparable2dConfig; 6] {
        core::array::from_fn(|idx| {
            let stage = idx + 1;
            DepthwiseSeparable2dConfig::new(
                LITE_CHANNELS[stage - 1],
                LITE_CHANNELS[stage],
                LITE_KERNEL_SIZES[stage],
            )
            .with_stride(LITE_STRIDES[stage])
            .with_padding(LITE_PADDINGS[stage])
            .with_use_norm(LITE_NORMS[idx])
        })
    }

    /// Initialize a [`DepthwiseLiteNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DepthwiseLiteNet<B> {
        tracing::debug!(
            in_channels = self.in_channels,
            "initializing DepthwiseLiteNet backbone"
        );

        let [dw1, dw2, dw3, dw4, dw5, dw6] = Self::unit_configs().map(|cfg| cfg.init(device));

        DepthwiseLiteNet {
            stem: self.stem_config().init(device),
            dw1,
            pool1: square_max_pool_config().init(),
            dw2,
            dw3,
            pool2: text_line_max_pool_config().init(),
            dw4,
            dw5,
            pool3: text_line_max_pool_config().init(),
            dw6,
        }
    }
}

/// Depthwise-separable lite backbone.
///
/// Maps ``[batch, in_channels, height, width]`` to ``[batch, 512, out_height, out_width]``.
#[derive(Module, Debug)]
pub struct DepthwiseLiteNet<B: Backend> {
    stem: CNA2d<B>,
    dw1: DepthwiseSeparable2d<B>,
    pool1: MaxPool2d,
    dw2: DepthwiseSeparable2d<B>,
    dw3: DepthwiseSeparable2d<B>,
    pool2: MaxPool2d,
    dw4: DepthwiseSeparable2d<B>,
    dw5: DepthwiseSeparable2d<B>,
    pool3: MaxPool2d,
    dw6: DepthwiseSeparable2d<B>,
}

impl<B: Backend> BackboneMeta for DepthwiseLiteNet<B> {
    fn name(&self) -> &'static str {
        LITE_NAME
    }

    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.dw6.out_channels()
    }

    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape> {
        DepthwiseLiteNetConfig::new(self.in_channels()).output_shape(input_resolution)
    }
}

impl<B: Backend> DepthwiseLiteNet<B> {
    /// The depthwise-separable units, in order.
    pub fn units(&self) -> [&DepthwiseSeparable2d<B>; 6] {
        [
            &self.dw1, &self.dw2, &self.dw3, &self.dw4, &self.dw5, &self.dw6,
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
    /// ``[batch, 512, out_height, out_width]``
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

        let x = self.stem.forward(input);
        let x = self.dw1.forward(x);
        let x = self.pool1.forward(x);
        let x = self.dw2.forward(x);
        let x = self.dw3.forward(x);
        let x = self.pool2.forward(x);
        let x = self.dw4.forward(x);
        let x = self.dw5.forward(x);
        let x = self.pool3.forward(x);
        let x = self.dw6.forward(x);

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
    use crate::testing::{TestBackend, assert_idempotent_forward};
    use bimm_contracts::assert_shape_contract;
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    #[test]
    fn test_lite_config() {
        let config = DepthwiseLiteNetConfig::new(3);
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.out_channels(), 512);

        let units = DepthwiseLiteNetConfig::unit_configs();
        assert_eq!(
            units.each_ref().map(|u| u.out_channels),
            [128, 256, 256, 512, 512, 512]
        );
        assert_eq!(units.each_ref().map(|u| u.use_norm), LITE_NORMS);
        assert_eq!(units[5].kernel_size, 2);
        assert_eq!(units[5].padding, 0);

        assert_that!(
            config.output_shape([32, 320]),
            is(equal_to(Some(FeatureShape::new(512, 1, 81))))
        );
        assert_eq!(
            config.output_shape([64, 100]),
            Some(FeatureShape::new(512, 3, 26))
        );
        assert_eq!(config.output_shape([8, 320]), None);
    }

    #[test]
    fn test_lite_forward() {
        let device = Default::default();

        let config = DepthwiseLiteNetConfig::new(3);
        let model: DepthwiseLiteNet<TestBackend> = config.init(&device);
        assert_eq!(model.in_channels(), 3);
        assert_eq!(model.out_channels(), 512);
        assert_eq!(model.units().map(|u| u.depthwise.has_norm()), LITE_NORMS);

        let input = Tensor::random([1, 3, 32, 320], Distribution::Default, &device);
        let output = model.forward(input.clone());

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 1),
                ("out_channels", 512),
                ("out_height", 1),
                ("out_width", 81)
            ],
        );

        assert_idempotent_forward(input, |x| model.forward(x));
    }

    #[test]
    fn test_lite_forward_batch() {
        let device = Default::default();

        let config = DepthwiseLiteNetConfig::new(1);
        let model: DepthwiseLiteNet<TestBackend> = config.init(&device);

        let input = Tensor::random([3, 1, 64, 100], Distribution::Default, &device);
        let output = model.forward(input);

        let expected = config.output_shape([64, 100]).unwrap();
        assert_eq!(output.dims(), expected.dims(3));
    }
}
