//! # Pre-Activation Residual Block
//!
//! [`PreActBlock`] is the `ResNet-v2` basic unit: normalization and activation
//! come *before* the convolutions.
//!
//! ```text
//! y        = relu(bn1(x))
//! shortcut = downsample ? conv1x1(y) : x
//! out      = conv3x3(relu(bn2(conv3x3(y)))) + shortcut
//! ```
//!
//! The projection shortcut reads the activated input `y`, not the raw input.
//!
//! Whenever ``in_channels != out_channels`` or ``stride != 1`` the projection
//! must be requested; otherwise the residual sum fails at forward time.
//! See [`PreActBlockMeta::requires_downsample`].

use crate::compat::conv_shape::maybe_conv_output_shape;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`PreActBlock`] Meta trait.
pub trait PreActBlockMeta {
    /// The size of the in channels dimension.
    fn in_channels(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_channels(&self) -> usize;

    /// The stride of the first conv, and of the projection.
    fn stride(&self) -> usize;

    /// Does this block project the shortcut?
    fn has_downsample(&self) -> bool;

    /// Does the channel/stride geometry require a projection shortcut?
    fn requires_downsample(&self) -> bool {
        self.stride() != 1 || self.in_channels() != self.out_channels()
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``Some([out_height, out_width])``; or `None` if the input is empty.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        let stride = self.stride();
        maybe_conv_output_shape(input_resolution, [3, 3], [stride, stride], [1, 1], [1, 1])
    }
}

/// [`PreActBlock`] Config.
///
/// Implements [`PreActBlockMeta`].
#[derive(Config, Debug)]
pub struct PreActBlockConfig {
    /// The size of the in channels dimension.
    pub in_channels: usize,

    /// The size of the out channels dimension.
    pub out_channels: usize,

    /// The stride of the first conv.
    #[config(default = 1)]
    pub stride: usize,

    /// Project the shortcut with a 1x1 conv.
    #[config(default = "false")]
    pub downsample: bool,

    /// Batch norm running-stat momentum.
    #[config(default = "0.9")]
    pub norm_momentum: f64,
}

impl PreActBlockMeta for PreActBlockConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn has_downsample(&self) -> bool {
        self.downsample
    }
}

impl PreActBlockConfig {
    /// Initialize a [`PreActBlock`].
    ///
    /// The downsample invariant is not enforced here;
    /// a block missing a required projection fails in [`PreActBlock::forward`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PreActBlock<B> {
        let stride = [self.stride, self.stride];

        PreActBlock {
            norm1: BatchNormConfig::new(self.in_channels)
                .with_momentum(self.norm_momentum)
                .init(device),
            act: Relu::new(),
            downsample: if self.downsample {
                Some(
                    Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1])
                        .with_stride(stride)
                        .with_bias(false)
                        .init(device),
                )
            } else {
                None
            },
            conv1: Conv2dConfig::new([self.in_channels, self.out_channels], [3, 3])
                .with_stride(stride)
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            norm2: BatchNormConfig::new(self.out_channels)
                .with_momentum(self.norm_momentum)
                .init(device),
            conv2: Conv2dConfig::new([self.out_channels, self.out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
        }
    }
}

/// Pre-activation residual block.
///
/// Implements [`PreActBlockMeta`].
#[derive(Module, Debug)]
pub struct PreActBlock<B: Backend> {
    /// Leading norm.
    pub norm1: BatchNorm<B, 2>,

    /// Shared activation.
    pub act: Relu,

    /// Optional 1x1 projection for the shortcut.
    pub downsample: Option<Conv2d<B>>,

    /// First 3x3 conv; carries the stride.
    pub conv1: Conv2d<B>,

    /// Mid-path norm.
    pub norm2: BatchNorm<B, 2>,

    /// Second 3x3 conv.
    pub conv2: Conv2d<B>,
}

impl<B: Backend> PreActBlockMeta for PreActBlock<B> {
    fn in_channels(&self) -> usize {
        self.conv1.weight.shape().dims[1]
    }

    fn out_channels(&self) -> usize {
        self.conv2.weight.shape().dims[0]
    }

    fn stride(&self) -> usize {
        self.conv1.stride[0]
    }

    fn has_downsample(&self) -> bool {
        self.downsample.is_some()
    }
}

impl<B: Backend> PreActBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_height, out_width]`` tensor.
    ///
    /// # Panics
    ///
    /// If the block has no projection but changes channels or stride.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );

        let x = self.act.forward(self.norm1.forward(input.clone()));

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => input,
        };

        let x = self.conv1.forward(x);
        let x = self.act.forward(self.norm2.forward(x));
        let x = self.conv2.forward(x);

        let x = x + identity;

        if let Some([out_height, out_width]) = self.output_resolution([in_height, in_width]) {
            assert_shape_contract_periodically!(
                ["batch", "out_channels", "out_height", "out_width"],
                &x,
                &[
                    ("batch", batch),
                    ("out_channels", self.out_channels()),
                    ("out_height", out_height),
                    ("out_width", out_width)
                ]
            );
        }

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
    fn test_preact_block_config() {
        let config = PreActBlockConfig::new(64, 128);
        assert_eq!(config.in_channels(), 64);
        assert_eq!(config.out_channels(), 128);
        assert_eq!(config.stride(), 1);
        assert!(!config.has_downsample());
        assert!(config.requires_downsample());
        assert_eq!(config.norm_momentum, 0.9);

        let config = PreActBlockConfig::new(64, 64);
        assert!(!config.requires_downsample());
        assert_eq!(config.output_resolution([16, 160]), Some([16, 160]));

        let config = config.with_stride(2);
        assert!(config.requires_downsample());
        assert_eq!(config.output_resolution([16, 160]), Some([8, 80]));
        assert_eq!(config.output_resolution([7, 7]), Some([4, 4]));
    }

    #[test]
    fn test_preact_block_identity_shortcut() {
        let device = Default::default();

        let block: PreActBlock<TestBackend> = PreActBlockConfig::new(4, 4).init(&device);
        assert!(!block.has_downsample());
        assert_eq!(block.in_channels(), 4);
        assert_eq!(block.out_channels(), 4);

        let input = Tensor::random([2, 4, 6, 10], Distribution::Default, &device);
        let output = block.forward(input.clone());

        let expected = {
            let x = block.act.forward(block.norm1.forward(input.clone()));
            let x = block.conv1.forward(x);
            let x = block.act.forward(block.norm2.forward(x));
            block.conv2.forward(x) + input.clone()
        };
        output.to_data().assert_eq(&expected.to_data(), true);

        assert_idempotent_forward(input, |x| block.forward(x));
    }

    #[test]
    fn test_preact_block_projects_activated_input() {
        let device = Default::default();

        let block: PreActBlock<TestBackend> = PreActBlockConfig::new(4, 8)
            .with_stride(2)
            .with_downsample(true)
            .init(&device);
        assert!(block.has_downsample());
        assert_eq!(block.stride(), 2);

        let input = Tensor::random([2, 4, 8, 9], Distribution::Default, &device);
        let output = block.forward(input.clone());

        let expected = {
            let y = block.act.forward(block.norm1.forward(input));
            let shortcut = block.downsample.as_ref().unwrap().forward(y.clone());
            let x = block.conv1.forward(y);
            let x = block.act.forward(block.norm2.forward(x));
            block.conv2.forward(x) + shortcut
        };
        output.to_data().assert_eq(&expected.to_data(), true);

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_channels", 8),
                ("out_height", 4),
                ("out_width", 5)
            ],
        );
    }

    #[test]
    fn test_preact_block_autodiff() {
        let device = Default::default();

        let block: PreActBlock<TestAutodiffBackend> = PreActBlockConfig::new(2, 4)
            .with_downsample(true)
            .init(&device);

        let input = Tensor::random([2, 2, 5, 5], Distribution::Default, &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [2, 4, 5, 5]);
    }

    #[test]
    #[should_panic]
    fn test_preact_block_missing_downsample_panics() {
        let device = Default::default();

        let block: PreActBlock<TestBackend> = PreActBlockConfig::new(4, 8).init(&device);
        assert!(block.requires_downsample());
        assert!(!block.has_downsample());

        block.forward(Tensor::ones([1, 4, 6, 6], &device));
    }
}
