//! Model module for the mid-fusion leaf classifier
//!
//! This module contains:
//! - Two backbone families, each split into early and mid stages
//! - The branch extractor running both families over all four transforms
//! - The fusion encoder and classifier head
//! - Network configuration and the persisted fusion-shape cache

pub mod branches;
pub mod config;
pub mod convnext;
pub mod fusion;
pub mod mobilenet;
pub mod shape_cache;

pub use branches::{BackboneFamily, Branch, BranchExtractor, FusionShape, BRANCHES};
pub use config::MidFusionNetConfig;
pub use convnext::{ConvNextBackbone, ConvNextConfig};
pub use fusion::{
    BranchStage, Classifier, ClassifierConfig, FusionEncoder, FusionEncoderConfig, MidFusionNet,
    ShapeSource,
};
pub use mobilenet::{MobileNetBackbone, MobileNetConfig};
pub use shape_cache::ShapeCache;
