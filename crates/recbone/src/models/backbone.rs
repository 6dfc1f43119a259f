//! # Backbone Selection
//!
//! [`BackboneConfig`] and [`Backbone`] wrap the four feature extractors,
//! so a recognition model can pick its encoder by name and size its
//! sequence layers from [`BackboneMeta::out_channels`].
//!
//! | name                  | backbone                                    |
//! |-----------------------|---------------------------------------------|
//! | `cnn_lite`, `lite`    | [`DepthwiseLiteNet`]                        |
//! | `vgg`                 | [`VggNet`]                                  |
//! | `resnet`, `resnet_v2` | [`ResNetV2`]                                |
//! | `densenet`            | [`DenseNet`]                                |

use crate::models::densenet::{DenseNet, DenseNetConfig};
use crate::models::lite::{DepthwiseLiteNet, DepthwiseLiteNetConfig};
use crate::models::resnet_v2::{ResNetV2, ResNetV2Config};
use crate::models::vgg::{VggNet, VggNetConfig};
use burn::config::ConfigError;
use burn::prelude::{Backend, Config, Module, Tensor};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The names [`BackboneConfig::from_name`] accepts.
pub const BACKBONE_NAMES: [&str; 6] = [
    "cnn_lite",
    "lite",
    "vgg",
    "resnet",
    "resnet_v2",
    "densenet",
];

/// Backbone selection and loading errors.
#[derive(Debug, thiserror::Error)]
pub enum BackboneError {
    /// The name matches no known backbone.
    #[error("unknown backbone: {name:?}; expected one of {:?}", BACKBONE_NAMES)]
    UnknownBackbone {
        /// The rejected name.
        name: String,
    },

    /// A backbone needs at least one input channel.
    #[error("backbone in_channels must be positive")]
    ZeroInChannels,

    /// The config file could not be written.
    #[error("failed to save backbone config: {0}")]
    Io(#[from] std::io::Error),

    /// The config file could not be read or parsed.
    #[error("failed to load backbone config")]
    Load(#[from] ConfigError),
}

/// A feature map shape, without the batch dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureShape {
    /// Channels.
    pub channels: usize,

    /// Height.
    pub height: usize,

    /// Width.
    pub width: usize,
}

impl FeatureShape {
    /// Create a new shape.
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
    ) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// The full tensor dims for a batch.
    pub fn dims(
        &self,
        batch: usize,
    ) -> [usize; 4] {
        [batch, self.channels, self.height, self.width]
    }
}

/// Backbone Meta trait.
///
/// Implemented by every backbone config and module.
pub trait BackboneMeta {
    /// The selection name.
    fn name(&self) -> &'static str;

    /// The size of the in channels dimension.
    fn in_channels(&self) -> usize;

    /// The size of the out channels dimension, as reported to downstream layers.
    fn out_channels(&self) -> usize;

    /// Predict the output feature shape for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``Some(shape)``; or `None` if the input is too small to survive the stride schedule.
    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape>;
}

/// [`Backbone`] Config.
///
/// Implements [`BackboneMeta`].
#[derive(Config, Debug)]
pub enum BackboneConfig {
    /// A [`DepthwiseLiteNet`].
    Lite(DepthwiseLiteNetConfig),

    /// A [`VggNet`].
    Vgg(VggNetConfig),

    /// A [`ResNetV2`].
    ResNet(ResNetV2Config),

    /// A [`DenseNet`].
    DenseNet(DenseNetConfig),
}

impl From<DepthwiseLiteNetConfig> for BackboneConfig {
    fn from(config: DepthwiseLiteNetConfig) -> Self {
        Self::Lite(config)
    }
}

impl From<VggNetConfig> for BackboneConfig {
    fn from(config: VggNetConfig) -> Self {
        Self::Vgg(config)
    }
}

impl From<ResNetV2Config> for BackboneConfig {
    fn from(config: ResNetV2Config) -> Self {
        Self::ResNet(config)
    }
}

impl From<DenseNetConfig> for BackboneConfig {
    fn from(config: DenseNetConfig) -> Self {
        Self::DenseNet(config)
    }
}

impl BackboneMeta for BackboneConfig {
    fn name(&self) -> &'static str {
        match self {
            Self::Lite(config) => config.name(),
            Self::Vgg(config) => config.name(),
            Self::ResNet(config) => config.name(),
            Self::DenseNet(config) => config.name(),
        }
    }

    fn in_channels(&self) -> usize {
        match self {
            Self::Lite(config) => config.in_channels(),
            Self::Vgg(config) => config.in_channels(),
            Self::ResNet(config) => config.in_channels(),
            Self::DenseNet(config) => config.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            Self::Lite(config) => config.out_channels(),
            Self::Vgg(config) => config.out_channels(),
            Self::ResNet(config) => config.out_channels(),
            Self::DenseNet(config) => config.out_channels(),
        }
    }

    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape> {
        match self {
            Self::Lite(config) => config.output_shape(input_resolution),
            Self::Vgg(config) => config.output_shape(input_resolution),
            Self::ResNet(config) => config.output_shape(input_resolution),
            Self::DenseNet(config) => config.output_shape(input_resolution),
        }
    }
}

impl BackboneConfig {
    /// Select a backbone by name, with default settings.
    ///
    /// # Arguments
    ///
    /// - `name`: one of [`BACKBONE_NAMES`]; case-insensitive.
    /// - `in_channels`: the input image channels.
    ///
    /// # Returns
    ///
    /// The config; or a [`BackboneError`] for unknown names or zero channels.
    pub fn from_name(
        name: &str,
        in_channels: usize,
    ) -> Result<Self, BackboneError> {
        if in_channels == 0 {
            return Err(BackboneError::ZeroInChannels);
        }

        let config = match name.to_ascii_lowercase().as_str() {
            "cnn_lite" | "lite" => DepthwiseLiteNetConfig::new(in_channels).into(),
            "vgg" => VggNetConfig::new(in_channels).into(),
            "resnet" | "resnet_v2" => ResNetV2Config::new(in_channels).into(),
            "densenet" => DenseNetConfig::new(in_channels).into(),
            _ => {
                return Err(BackboneError::UnknownBackbone {
                    name: name.to_string(),
                });
            }
        };

        Ok(config)
    }

    /// Save the config as JSON.
    pub fn save_json<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<(), BackboneError> {
        self.save(path)?;
        Ok(())
    }

    /// Load a config saved by [`BackboneConfig::save_json`].
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, BackboneError> {
        let config = Self::load(path)?;
        if config.in_channels() == 0 {
            return Err(BackboneError::ZeroInChannels);
        }
        Ok(config)
    }

    /// Initialize a [`Backbone`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Backbone<B> {
        match self {
            Self::Lite(config) => config.init(device).into(),
            Self::Vgg(config) => config.init(device).into(),
            Self::ResNet(config) => config.init(device).into(),
            Self::DenseNet(config) => config.init(device).into(),
        }
    }
}

/// A selected feature-extraction backbone.
///
/// Implements [`BackboneMeta`].
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Backbone<B: Backend> {
    /// A [`DepthwiseLiteNet`].
    Lite(DepthwiseLiteNet<B>),

    /// A [`VggNet`].
    Vgg(VggNet<B>),

    /// A [`ResNetV2`].
    ResNet(ResNetV2<B>),

    /// A [`DenseNet`].
    DenseNet(DenseNet<B>),
}

impl<B: Backend> From<DepthwiseLiteNet<B>> for Backbone<B> {
    fn from(model: DepthwiseLiteNet<B>) -> Self {
        Self::Lite(model)
    }
}

impl<B: Backend> From<VggNet<B>> for Backbone<B> {
    fn from(model: VggNet<B>) -> Self {
        Self::Vgg(model)
    }
}

impl<B: Backend> From<ResNetV2<B>> for Backbone<B> {
    fn from(model: ResNetV2<B>) -> Self {
        Self::ResNet(model)
    }
}

impl<B: Backend> From<DenseNet<B>> for Backbone<B> {
    fn from(model: DenseNet<B>) -> Self {
        Self::DenseNet(model)
    }
}

impl<B: Backend> BackboneMeta for Backbone<B> {
    fn name(&self) -> &'static str {
        match self {
            Self::Lite(model) => model.name(),
            Self::Vgg(model) => model.name(),
            Self::ResNet(model) => model.name(),
            Self::DenseNet(model) => model.name(),
        }
    }

    fn in_channels(&self) -> usize {
        match self {
            Self::Lite(model) => model.in_channels(),
            Self::Vgg(model) => model.in_channels(),
            Self::ResNet(model) => model.in_channels(),
            Self::DenseNet(model) => model.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            Self::Lite(model) => model.out_channels(),
            Self::Vgg(model) => model.out_channels(),
            Self::ResNet(model) => model.out_channels(),
            Self::DenseNet(model) => model.out_channels(),
        }
    }

    fn output_shape(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<FeatureShape> {
        match self {
            Self::Lite(model) => model.output_shape(input_resolution),
            Self::Vgg(model) => model.output_shape(input_resolution),
            Self::ResNet(model) => model.output_shape(input_resolution),
            Self::DenseNet(model) => model.output_shape(input_resolution),
        }
    }
}

impl<B: Backend> Backbone<B> {
    /// Apply the wrapped backbone to the input.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// The feature map; see [`BackboneMeta::output_shape`].
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Lite(model) => model.forward(input),
            Self::Vgg(model) => model.forward(input),
            Self::ResNet(model) => model.forward(input),
            Self::DenseNet(model) => model.forward(input),
        }
    }
}
