//! # `VggNet` Backbone
//!
//! Seven ``conv -> bn -> relu`` stages with interleaved max pools.
//!
//! ```text
//! cbr(64)  -> pool(2x2)
//! cbr(128) -> pool(2x2)
//! cbr(256) -> cbr(256) -> pool(text-line)
//! cbr(512) -> cbr(512) -> pool(text-line)
//! cbr(512, 2x2, no padding)
//! ```

use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CNA2dMeta};
use crate::layers::pool::{
    max_pool_output_resolution, square_max_pool_config, text_line_max_pool_config,
};
use crate::models::backbone::{BackboneMeta, FeatureShape};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Selection name of [`VggNet`].
pub const VGG_NAME: &str = "vgg";

/// Per-stage channel widths.
pub const VGG_CHANNELS: [usize; 7] = [64, 128, 256, 256, 512, 512, 512];

/// [`VggNet`] configuration.
#[derive(Config, Debug)]
pub struct VggNetConfig {
    /// The size of the in channels dimension.
    pub in_channels: usize,
}

impl BackboneMeta for VggNetConfig {
    fn name(&self) -> &'static str {
        VGG_NAME
    }

    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        VGG_CHANNELS[6]
    }

    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape> {
        let pools = Self::pool_configs();

        let [height, width] = self.stage_configs().iter().enumerate().try_fold(
            input_resolution,
            |res, (idx, stage)| {
                let res = stage.output_resolution(res)?;
                match pools.iter().find(|(after, _)| *after == idx) {
                    Some((_, pool)) => max_pool_output_resolution(pool, res),
                    None => Some(res),
                }
            },
        )?;

        Some(FeatureShape::new(self.out_channels(), height, width))
    }
}

impl VggNetConfig {
    fn stage_configs(&self) -> [CNA2dConfig; 7] {
        core::array::from_fn(|idx| {
            let in_channels = if idx == 0 {
                self.in_channels
            } else {
                VGG_CHANNELS[idx - 1]
            };
            let conv = if idx == 6 {
                Conv2dConfig::new([in_channels, VGG_CHANNELS[idx]], [2, 2])
            } else {
                Conv2dConfig::new([in_channels, VGG_CHANNELS[idx]], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
            };
            CNA2dConfig::conv_bn_relu(conv)
        })
    }

    /// Pools, by the index of the stage they follow.
    fn pool_configs() -> [(usize, MaxPool2dConfig); 4] {
        [
            (0, square_max_pool_config()),
            (1, square_max_pool_config()),
            (3, text_line_max_pool_config()),
            (5, text_line_max_pool_config()),
        ]
    }

    /// Initialize a [`VggNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> VggNet<B> {
        tracing::debug!(
            in_channels = self.in_channels,
            "initializing VggNet backbone"
        );

        let [cbr1, cbr2, cbr3, cbr4, cbr5, cbr6, cbr7] =
            self.stage_configs().map(|cfg| cfg.init(device));
        let [pool1, pool2, pool3, pool4] = Self::pool_configs().map(|(_, cfg)| cfg.init());

        VggNet {
            cbr1,
            pool1,
            cbr2,
            pool2,
            cbr3,
            cbr4,
            pool3,
            cbr5,
            cbr6,
            pool4,
            cbr7,
        }
    }
}

/// VGG-style backbone.
///
/// Maps ``[batch, in_channels, height, width]`` to ``[batch, 512, out_height, out_width]``.
#[derive(Module, Debug)]
pub struct VggNet<B: Backend> {
    cbr1: CNA2d<B>,
    pool1: MaxPool2d,
    cbr2: CNA2d<B>,
    pool2: MaxPool2d,
    cbr3: CNA2d<B>,
    cbr4: CNA2d<B>,
    pool3: MaxPool2d,
    cbr5: CNA2d<B>,
    cbr6: CNA2d<B>,
    pool4: MaxPool2d,
    cbr7: CNA2d<B>,
}

impl<B: Backend> BackboneMeta for VggNet<B> {
    fn name(&self) -> &'static str {
        VGG_NAME
    }

    fn in_channels(&self) -> usize {
        self.cbr1.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cbr7.out_channels()
    }

    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape> {
        VggNetConfig::new(self.in_channels()).output_shape(input_resolution)
    }
}

impl<B: Backend> VggNet<B> {
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

        let x = self.pool1.forward(self.cbr1.forward(input));
        let x = self.pool2.forward(self.cbr2.forward(x));
        let x = self.cbr3.forward(x);
        let x = self.pool3.forward(self.cbr4.forward(x));
        let x = self.cbr5.forward(x);
        let x = self.pool4.forward(self.cbr6.forward(x));
        let x = self.cbr7.forward(x);

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

    #[test]
    fn test_vgg_config() {
        let config = VggNetConfig::new(3);
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.out_channels(), 512);

        let stages = config.stage_configs();
        assert!(stages.iter().all(|s| s.has_norm()));
        assert_eq!(stages[0].in_channels(), 3);
        assert_eq!(stages[6].kernel_size(), [2, 2]);
        assert_eq!(stages[6].padding(), [0, 0]);

        assert_eq!(
            config.output_shape([32, 320]),
            Some(FeatureShape::new(512, 1, 81))
        );
        assert_eq!(
            config.output_shape([32, 100]),
            Some(FeatureShape::new(512, 1, 26))
        );
        assert_eq!(config.output_shape([16, 320]), None);
    }

    #[test]
    fn test_vgg_forward() {
        let device = Default::default();

        let config = VggNetConfig::new(3);
        let model: VggNet<TestBackend> = config.init(&device);
        assert_eq!(model.in_channels(), 3);
        assert_eq!(model.out_channels(), 512);

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
}
