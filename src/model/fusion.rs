//! Fusion head and the composed mid-fusion network
//!
//! Construction is two-phase. Phase 1 builds the transform bank and both
//! backbones, then measures the concatenated channel width with a dry run (or
//! takes it from the shape cache). Phase 2 sizes the fusion projection from
//! that width and attaches the classifier.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::branches::{BranchExtractor, FusionShape};
use super::config::MidFusionNetConfig;
use super::shape_cache::ShapeCache;
use crate::transforms::{TransformBank, TransformedImage};
use crate::utils::error::{self, FusionError};
use crate::utils::logging::PhaseLogger;

/// Configuration for the fusion encoder
#[derive(Config, Debug)]
pub struct FusionEncoderConfig {
    /// Concatenated channel width of all branches
    pub in_channels: usize,

    /// Width of the fused latent vector
    #[config(default = "512")]
    pub latent_width: usize,
}

impl FusionEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FusionEncoder<B> {
        FusionEncoder {
            projection: Conv2dConfig::new([self.in_channels, self.latent_width], [1, 1])
                .init(device),
            norm: BatchNormConfig::new(self.latent_width).init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            in_channels: self.in_channels,
        }
    }
}

/// Concatenate -> 1x1 projection -> BatchNorm -> ReLU -> global average pool
#[derive(Module, Debug)]
pub struct FusionEncoder<B: Backend> {
    pub projection: Conv2d<B>,
    pub norm: BatchNorm<B>,
    pub pool: AdaptiveAvgPool2d,
    in_channels: usize,
}

impl<B: Backend> FusionEncoder<B> {
    /// Fuse branch feature maps `[N, C_i, H, W]` into `[N, latent_width]`
    pub fn forward(&self, features: Vec<Tensor<B, 4>>) -> Tensor<B, 2> {
        let x = Tensor::cat(features, 1);
        let x = relu(self.norm.forward(self.projection.forward(x)));

        // Global pooling: [N, L, H, W] -> [N, L, 1, 1] -> [N, L]
        let x = self.pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }
}

/// Configuration for the classification head
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub in_features: usize,
    pub num_classes: usize,

    /// Dropout rate, only active when training
    #[config(default = "0.4")]
    pub dropout: f64,
}

impl ClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        Classifier {
            dropout: DropoutConfig::new(self.dropout).init(),
            linear: LinearConfig::new(self.in_features, self.num_classes).init(device),
            num_classes: self.num_classes,
        }
    }
}

/// Dropout followed by a linear projection to class scores
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    pub dropout: Dropout,
    pub linear: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> Classifier<B> {
    /// Unnormalized class scores `[N, num_classes]`
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(self.dropout.forward(x))
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Where the fusion shape of a construction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeSource {
    /// Measured by running every branch on synthetic input
    DryRun,
    /// Read from a matching shape-cache entry
    Cache,
}

/// Transform bank, both backbones, fusion encoder and classifier
#[derive(Module, Debug)]
pub struct MidFusionNet<B: Backend> {
    pub transforms: TransformBank<B>,
    pub branches: BranchExtractor<B>,
    pub fusion: FusionEncoder<B>,
    pub classifier: Classifier<B>,
}

/// Output of phase 1: everything whose shape does not depend on the dry run
#[derive(Debug)]
pub struct BranchStage<B: Backend> {
    pub transforms: TransformBank<B>,
    pub branches: BranchExtractor<B>,
    pub shape: FusionShape,
    pub source: ShapeSource,
}

impl<B: Backend> BranchStage<B> {
    /// Phase 1: build the branch side and measure the fusion shape
    pub fn build(
        config: &MidFusionNetConfig,
        cache: Option<&ShapeCache>,
        device: &B::Device,
    ) -> error::Result<Self> {
        config.validate()?;

        let transforms = TransformBank::new(config.input_size, device);
        let branches = BranchExtractor::new(&config.mobilenet, &config.convnext, device);

        let signature = config.backbone_signature()?;
        let expected_channels = config.branch_channels();
        let cached = cache
            .and_then(|cache| cache.lookup(&signature))
            .filter(|shape| {
                let fits = shape.branch_channels == expected_channels;
                if !fits {
                    warn!(
                        "Ignoring cached fusion shape {:?}: constructed branches produce {:?}",
                        shape.branch_channels, expected_channels
                    );
                }
                fits
            });
        if let Some(shape) = cached {
            info!(
                "Fusion shape from cache: {} channels at {}x{}",
                shape.fused_channels(),
                shape.height,
                shape.width
            );
            return Ok(Self {
                transforms,
                branches,
                shape,
                source: ShapeSource::Cache,
            });
        }

        let shape = branches.probe(config.input_size, device)?;
        info!(
            "Dry run measured {} fused channels at {}x{}",
            shape.fused_channels(),
            shape.height,
            shape.width
        );
        if let Some(cache) = cache {
            cache.store(signature, &shape);
        }

        Ok(Self {
            transforms,
            branches,
            shape,
            source: ShapeSource::DryRun,
        })
    }
}

impl<B: Backend> MidFusionNet<B> {
    /// Phase 2: size the fusion head from a measured shape
    pub fn from_branch_stage(
        config: &MidFusionNetConfig,
        stage: BranchStage<B>,
        device: &B::Device,
    ) -> error::Result<Self> {
        let fused_channels = stage.shape.fused_channels();
        if fused_channels == 0 {
            return Err(FusionError::Construction(
                "branches produced no channels to fuse".to_string(),
            ));
        }

        let fusion = FusionEncoderConfig::new(fused_channels)
            .with_latent_width(config.latent_width)
            .init(device);
        let classifier = ClassifierConfig::new(config.latent_width, config.num_classes)
            .with_dropout(config.dropout)
            .init(device);

        Ok(Self {
            transforms: stage.transforms,
            branches: stage.branches,
            fusion,
            classifier,
        })
    }

    /// Both construction phases in order
    pub fn init(
        config: &MidFusionNetConfig,
        cache: Option<&ShapeCache>,
        device: &B::Device,
    ) -> error::Result<(Self, FusionShape, ShapeSource)> {
        let mut phases = PhaseLogger::new("network construction");

        let stage = BranchStage::build(config, cache, device)?;
        let shape = stage.shape.clone();
        let source = stage.source;
        phases.phase("transforms and branches");

        let net = Self::from_branch_stage(config, stage, device)?;
        phases.phase("fusion and classifier");
        phases.finish();

        debug!("Network has {} parameters", net.num_params());
        Ok((net, shape, source))
    }

    /// Run every transform on one image
    pub fn preprocess(&self, image: &RgbImage) -> error::Result<TransformedImage<B>> {
        self.transforms.apply_all(image)
    }

    /// Fused latent vector `[1, latent_width]`
    pub fn embed(&self, inputs: &TransformedImage<B>) -> Tensor<B, 2> {
        self.fusion.forward(self.branches.forward(inputs))
    }

    /// Class scores `[1, num_classes]`
    pub fn forward(&self, inputs: &TransformedImage<B>) -> Tensor<B, 2> {
        self.classifier.forward(self.embed(inputs))
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }

    pub fn fused_channels(&self) -> usize {
        self.fusion.in_channels()
    }
}
