//! Model Configuration Module
//!
//! Burn `Config` for the composed fusion network. Backbone configs live next
//! to their modules and are nested here; the defaults reproduce the full-size
//! architecture, `compact` keeps the same geometry with far fewer channels.

use burn::config::Config;
use serde::Serialize;

use super::branches::{BackboneFamily, BRANCHES};
use super::convnext::ConvNextConfig;
use super::mobilenet::MobileNetConfig;
use crate::utils::error::{self, FusionError};

/// Configuration of the complete mid-fusion network
#[derive(Config, Debug)]
pub struct MidFusionNetConfig {
    /// Backbone family A
    #[config(default = "MobileNetConfig::new()")]
    pub mobilenet: MobileNetConfig,

    /// Backbone family B
    #[config(default = "ConvNextConfig::new()")]
    pub convnext: ConvNextConfig,

    /// Side length of every transform output
    #[config(default = "224")]
    pub input_size: usize,

    /// Number of output classes (5 cassava categories)
    #[config(default = "crate::NUM_CLASSES")]
    pub num_classes: usize,

    /// Width of the fused latent vector
    #[config(default = "512")]
    pub latent_width: usize,

    /// Dropout rate before the final projection
    #[config(default = "0.4")]
    pub dropout: f64,
}

/// Everything that determines the branch feature-map geometry
#[derive(Serialize)]
struct BackboneSignature<'a> {
    version: &'static str,
    mobilenet: &'a MobileNetConfig,
    convnext: &'a ConvNextConfig,
    input_size: usize,
}

impl MidFusionNetConfig {
    /// Narrow backbones for tests and quick runs
    pub fn compact(num_classes: usize) -> Self {
        Self::new()
            .with_mobilenet(MobileNetConfig::compact())
            .with_convnext(ConvNextConfig::compact())
            .with_num_classes(num_classes)
            .with_latent_width(32)
    }

    /// Validate the configuration
    pub fn validate(&self) -> error::Result<()> {
        if self.num_classes == 0 {
            return Err(FusionError::Config(
                "num_classes must be greater than 0".to_string(),
            ));
        }

        if self.latent_width == 0 {
            return Err(FusionError::Config(
                "latent_width must be greater than 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(FusionError::Config(
                "dropout must be in range [0.0, 1.0)".to_string(),
            ));
        }

        if self.input_size < 32 {
            return Err(FusionError::Config(format!(
                "input_size must be at least 32, got {}",
                self.input_size
            )));
        }

        if self.mobilenet.settings.is_empty() || self.mobilenet.stem_channels == 0 {
            return Err(FusionError::Config(
                "mobilenet needs a stem and at least one block group".to_string(),
            ));
        }

        if self.convnext.dims.is_empty()
            || self.convnext.dims.len() != self.convnext.depths.len()
            || self.convnext.patch_size == 0
        {
            return Err(FusionError::Config(
                "convnext dims and depths must be non-empty and of equal length".to_string(),
            ));
        }

        Ok(())
    }

    /// Channel count each entry of `BRANCHES` produces, in branch order
    pub fn branch_channels(&self) -> Vec<usize> {
        BRANCHES
            .iter()
            .map(|branch| match branch.family {
                BackboneFamily::MobileNet => self.mobilenet.out_channels(),
                BackboneFamily::ConvNext => self.convnext.out_channels(),
            })
            .collect()
    }

    /// JSON value identifying the backbone geometry, used as the shape-cache key
    pub fn backbone_signature(&self) -> error::Result<serde_json::Value> {
        serde_json::to_value(BackboneSignature {
            version: crate::VERSION,
            mobilenet: &self.mobilenet,
            convnext: &self.convnext,
            input_size: self.input_size,
        })
        .map_err(|e| FusionError::Config(format!("cannot serialize backbone signature: {}", e)))
    }
}
