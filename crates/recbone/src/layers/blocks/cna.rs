//! # `CNA2d` - conv/norm/activation block.
//!
//! A [`CNA2d`] module is:
//! * a [`Conv2d`] layer,
//! * an optional [`BatchNorm`] layer,
//! * a [`Relu`] activation.
//!
//! This is the ``ConvBnRelu`` stage of the VGG and `ResNet` backbones;
//! with the norm disabled it is the bare ``conv + relu`` stem of the lite backbone,
//! and each half of a depthwise-separable unit.

use crate::compat::conv_shape::{expect_conv_output_shape, maybe_conv_output_shape, padding_to_pair};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Tensor};

/// [`CNA2d`] Meta.
pub trait CNA2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of groups.
    fn groups(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// The conv kernel size.
    fn kernel_size(&self) -> [usize; 2];

    /// The conv stride.
    fn stride(&self) -> [usize; 2];

    /// The conv ``[height, width]`` padding.
    fn padding(&self) -> [usize; 2];

    /// The conv dilation.
    fn dilation(&self) -> [usize; 2];

    /// Does this block normalize?
    fn has_norm(&self) -> bool;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``Some([out_height, out_width])``, or `None` if the input is too small for the kernel.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        maybe_conv_output_shape(
            input_resolution,
            self.kernel_size(),
            self.stride(),
            self.padding(),
            self.dilation(),
        )
    }
}

/// [`CNA2d`] Config.
///
/// Implements [`CNA2dMeta`].
#[derive(Config, Debug)]
pub struct CNA2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// The optional [`BatchNorm`] config.
    ///
    /// The feature size will be auto-matched to the conv output channels.
    #[config(default = "None")]
    pub norm: Option<BatchNormConfig>,
}

impl CNA2dMeta for CNA2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.conv.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn padding(&self) -> [usize; 2] {
        padding_to_pair(&self.conv.padding, self.conv.kernel_size)
    }

    fn dilation(&self) -> [usize; 2] {
        self.conv.dilation
    }

    fn has_norm(&self) -> bool {
        self.norm.is_some()
    }
}

impl CNA2dConfig {
    /// Build a ``conv -> batch norm -> relu`` config.
    pub fn conv_bn_relu(conv: Conv2dConfig) -> Self {
        Self::new(conv).with_norm(Some(BatchNormConfig::new(0)))
    }

    /// Build a ``conv -> relu`` config.
    pub fn conv_relu(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }

    /// Adjust the norm features to match the conv output size.
    ///
    /// [`CNA2dConfig::init`] does this automatically.
    pub fn match_norm_features(self) -> Self {
        let features = self.out_channels();
        let norm = self.norm.map(|norm| BatchNormConfig {
            num_features: features,
            ..norm
        });
        Self { norm, ..self }
    }

    /// Initialize a [`CNA2d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> CNA2d<B> {
        let cfg = self.match_norm_features();
        CNA2d {
            conv: cfg.conv.init(device),
            norm: cfg.norm.as_ref().map(|norm| norm.init(device)),
            act: Relu::new(),
        }
    }
}

/// Sequenced conv/norm/activation block.
///
/// Implements [`CNA2dMeta`].
#[derive(Module, Debug)]
pub struct CNA2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Optional Norm Layer.
    pub norm: Option<BatchNorm<B, 2>>,

    /// Activation layer.
    pub act: Relu,
}

impl<B: Backend> CNA2dMeta for CNA2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.groups()
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.conv.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn padding(&self) -> [usize; 2] {
        let padding: &PaddingConfig2d = &self.conv.padding;
        padding_to_pair(padding, self.conv.kernel_size)
    }

    fn dilation(&self) -> [usize; 2] {
        self.conv.dilation
    }

    fn has_norm(&self) -> bool {
        self.norm.is_some()
    }
}

impl<B: Backend> CNA2d<B> {
    /// Forward Pass.
    ///
    /// ```rust,ignore
    /// let x = self.conv.forward(input);
    /// let x = self.norm.forward(x); // when present
    /// let x = self.act.forward(x);
    /// ```
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
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = expect_conv_output_shape(
            [in_height, in_width],
            self.kernel_size(),
            self.stride(),
            self.padding(),
            self.dilation(),
        );

        let x = self.conv.forward(input);

        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };

        let x = self.act.forward(x);

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

        x
    }
}
