//! # Dense Blocks
//!
//! A [`DenseBlock`] is a stack of [`DenseLayer`]s;
//! each layer sees the concatenation of the block input and every earlier layer's output,
//! and contributes ``growth_rate`` new channels.
//!
//! A [`DenseTransition`] compresses channels (1x1 conv) and resolution (avg pool)
//! between blocks.
//!
//! See "Densely Connected Convolutional Networks", Huang et al 2016.
//! <https://arxiv.org/abs/1608.06993>

use crate::compat::conv_shape::maybe_pool2d_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Tensor};

/// [`DenseLayer`] configuration.
#[derive(Config, Debug)]
pub struct DenseLayerConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Number of channels this layer adds.
    pub growth_rate: usize,

    /// Bottleneck width, as a multiple of ``growth_rate``.
    #[config(default = 4)]
    pub bottleneck_factor: usize,

    /// Dropout probability applied to the new features.
    #[config(default = "0.0")]
    pub drop_rate: f64,
}

impl DenseLayerConfig {
    /// Number of output channels: ``in_channels + growth_rate``.
    pub fn out_channels(&self) -> usize {
        self.in_channels + self.growth_rate
    }

    /// Initialize a [`DenseLayer`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DenseLayer<B> {
        let bottleneck = self.bottleneck_factor * self.growth_rate;
        DenseLayer {
            norm1: BatchNormConfig::new(self.in_channels).init(device),
            conv1: Conv2dConfig::new([self.in_channels, bottleneck], [1, 1])
                .with_bias(false)
                .init(device),
            norm2: BatchNormConfig::new(bottleneck).init(device),
            conv2: Conv2dConfig::new([bottleneck, self.growth_rate], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            act: Relu::new(),
            dropout: if self.drop_rate > 0.0 {
                Some(DropoutConfig::new(self.drop_rate).init())
            } else {
                None
            },
        }
    }
}

/// Dense layer: ``bn -> relu -> conv1x1 -> bn -> relu -> conv3x3``, concatenated onto its input.
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    norm1: BatchNorm<B, 2>,
    conv1: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    act: Relu,
    dropout: Option<Dropout>,
}

impl<B: Backend> DenseLayer<B> {
    /// Number of input channels.
    pub fn in_channels(&self) -> usize {
        self.conv1.weight.shape().dims[1]
    }

    /// Number of channels this layer adds.
    pub fn growth_rate(&self) -> usize {
        self.conv2.weight.shape().dims[0]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, in_channels + growth_rate, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.act.forward(self.norm1.forward(input.clone()));
        let x = self.conv1.forward(x);
        let x = self.act.forward(self.norm2.forward(x));
        let x = self.conv2.forward(x);
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };

        Tensor::cat(vec![input, x], 1)
    }
}

/// [`DenseBlock`] configuration.
#[derive(Config, Debug)]
pub struct DenseBlockConfig {
    /// Number of dense layers.
    pub num_layers: usize,

    /// Number of input channels.
    pub in_channels: usize,

    /// Channels added per layer.
    pub growth_rate: usize,

    /// Bottleneck width, as a multiple of ``growth_rate``.
    #[config(default = 4)]
    pub bottleneck_factor: usize,

    /// Dropout probability inside each layer.
    #[config(default = "0.0")]
    pub drop_rate: f64,
}

impl DenseBlockConfig {
    /// Number of output channels: ``in_channels + num_layers * growth_rate``.
    pub fn out_channels(&self) -> usize {
        self.in_channels + self.num_layers * self.growth_rate
    }

    /// Initialize a [`DenseBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DenseBlock<B> {
        let layers = (0..self.num_layers)
            .map(|idx| {
                DenseLayerConfig::new(self.in_channels + idx * self.growth_rate, self.growth_rate)
                    .with_bottleneck_factor(self.bottleneck_factor)
                    .with_drop_rate(self.drop_rate)
                    .init(device)
            })
            .collect();

        DenseBlock {
            in_channels: self.in_channels,
            layers,
        }
    }
}

/// A stack of [`DenseLayer`]s.
///
/// A block with no layers passes its input through.
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    /// Number of input channels.
    pub in_channels: usize,

    /// The dense layers, in order.
    pub layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> DenseBlock<B> {
    /// Number of input channels.
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Number of output channels.
    pub fn out_channels(&self) -> usize {
        self.in_channels() + self.layers.iter().map(|l| l.growth_rate()).sum::<usize>()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())]
        );

        let x = self
            .layers
            .iter()
            .fold(input, |x, layer| layer.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("height", height),
                ("width", width)
            ]
        );

        x
    }
}

/// [`DenseTransition`] configuration.
#[derive(Config, Debug)]
pub struct DenseTransitionConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Number of output channels.
    pub out_channels: usize,

    /// Average pool strides.
    #[config(default = "[2, 2]")]
    pub pool_strides: [usize; 2],

    /// Average pool padding.
    #[config(default = "PaddingConfig2d::Valid")]
    pub pool_padding: PaddingConfig2d,

    /// Dropout probability; applied before pooling.
    #[config(default = "0.0")]
    pub drop_rate: f64,
}

impl DenseTransitionConfig {
    /// The average pool config.
    pub fn pool_config(&self) -> AvgPool2dConfig {
        AvgPool2dConfig::new([2, 2])
            .with_strides(self.pool_strides)
            .with_padding(self.pool_padding.clone())
    }

    /// Get the output resolution for a given input resolution.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        let pool = self.pool_config();
        maybe_pool2d_output_resolution(
            input_resolution,
            pool.kernel_size,
            pool.strides,
            &pool.padding,
        )
    }

    /// Initialize a [`DenseTransition`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DenseTransition<B> {
        DenseTransition {
            norm: BatchNormConfig::new(self.in_channels).init(device),
            act: Relu::new(),
            conv: Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            dropout: if self.drop_rate > 0.0 {
                Some(DropoutConfig::new(self.drop_rate).init())
            } else {
                None
            },
            pool: self.pool_config().init(),
        }
    }
}

/// Transition between dense blocks:
/// ``bn -> relu -> conv1x1 -> [dropout] -> avg pool``.
#[derive(Module, Debug)]
pub struct DenseTransition<B: Backend> {
    norm: BatchNorm<B, 2>,
    act: Relu,
    conv: Conv2d<B>,
    dropout: Option<Dropout>,
    pool: AvgPool2d,
}

impl<B: Backend> DenseTransition<B> {
    /// Number of input channels.
    pub fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1]
    }

    /// Number of output channels.
    pub fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    /// Forward pass.
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
        let x = self.act.forward(self.norm.forward(input));
        let x = self.conv.forward(x);
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };
        self.pool.forward(x)
    }
}
