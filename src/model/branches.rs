//! Branch feature extraction
//!
//! Two backbone families, each instantiated once, process all four transform
//! outputs: eight branches over two parameter sets. The branch order is the
//! fixed list [`BRANCHES`]; it is also the channel order of the fused tensor.

use burn::{
    module::Module,
    tensor::{backend::Backend, Distribution, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::convnext::{ConvNextBackbone, ConvNextConfig};
use super::mobilenet::{MobileNetBackbone, MobileNetConfig};
use crate::transforms::{TransformKind, TransformedImage};
use crate::utils::error::{FusionError, Result};

/// Pretrained-style backbone families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackboneFamily {
    /// Depthwise-separable inverted-residual network
    MobileNet,
    /// Staged network with internal downsampling
    ConvNext,
}

impl BackboneFamily {
    pub fn name(self) -> &'static str {
        match self {
            BackboneFamily::MobileNet => "mobilenet",
            BackboneFamily::ConvNext => "convnext",
        }
    }
}

/// One backbone family applied to one transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Branch {
    pub family: BackboneFamily,
    pub transform: TransformKind,
}

impl Branch {
    pub const fn new(family: BackboneFamily, transform: TransformKind) -> Self {
        Self { family, transform }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.family.name(), self.transform)
    }
}

/// The eight branches in concatenation order
pub const BRANCHES: [Branch; 8] = [
    Branch::new(BackboneFamily::MobileNet, TransformKind::Dct),
    Branch::new(BackboneFamily::MobileNet, TransformKind::Stft),
    Branch::new(BackboneFamily::MobileNet, TransformKind::Wavelet),
    Branch::new(BackboneFamily::MobileNet, TransformKind::Learnable),
    Branch::new(BackboneFamily::ConvNext, TransformKind::Dct),
    Branch::new(BackboneFamily::ConvNext, TransformKind::Stft),
    Branch::new(BackboneFamily::ConvNext, TransformKind::Wavelet),
    Branch::new(BackboneFamily::ConvNext, TransformKind::Learnable),
];

/// Feature-map geometry measured by the dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionShape {
    /// Channels of each branch, in [`BRANCHES`] order
    pub branch_channels: Vec<usize>,
    /// Shared spatial height
    pub height: usize,
    /// Shared spatial width
    pub width: usize,
}

impl FusionShape {
    /// Channel width of the concatenated feature maps
    pub fn fused_channels(&self) -> usize {
        self.branch_channels.iter().sum()
    }

    /// Build from per-branch `[N, C, H, W]` dims, failing on any spatial mismatch
    pub fn from_branch_dims(dims: &[(Branch, [usize; 4])]) -> Result<Self> {
        let (_, first) = dims
            .first()
            .ok_or_else(|| FusionError::Construction("no branch feature maps".to_string()))?;
        let expected = [first[2], first[3]];

        let mut branch_channels = Vec::with_capacity(dims.len());
        for (branch, shape) in dims {
            let found = [shape[2], shape[3]];
            if found != expected {
                return Err(FusionError::ShapeMismatch {
                    branch: *branch,
                    expected,
                    found,
                });
            }
            branch_channels.push(shape[1]);
        }

        Ok(Self {
            branch_channels,
            height: expected[0],
            width: expected[1],
        })
    }
}

/// Both backbone families; each is shared by its four branches
#[derive(Module, Debug)]
pub struct BranchExtractor<B: Backend> {
    pub mobilenet: MobileNetBackbone<B>,
    pub convnext: ConvNextBackbone<B>,
}

impl<B: Backend> BranchExtractor<B> {
    pub fn new(mobilenet: &MobileNetConfig, convnext: &ConvNextConfig, device: &B::Device) -> Self {
        Self {
            mobilenet: mobilenet.init(device),
            convnext: convnext.init(device),
        }
    }

    /// Run one family on a `[N, 3, S, S]` input
    pub fn forward_family(&self, family: BackboneFamily, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match family {
            BackboneFamily::MobileNet => self.mobilenet.forward(input),
            BackboneFamily::ConvNext => self.convnext.forward(input),
        }
    }

    /// Run all eight branches; feature maps come back in [`BRANCHES`] order
    pub fn forward(&self, inputs: &TransformedImage<B>) -> Vec<Tensor<B, 4>> {
        BRANCHES
            .iter()
            .map(|branch| self.forward_family(branch.family, inputs.batched(branch.transform)))
            .collect()
    }

    /// Dry run on a synthetic standard-normal input of side `input_size`
    ///
    /// Every branch is evaluated so that the measured geometry covers all
    /// eight feature maps.
    pub fn probe(&self, input_size: usize, device: &B::Device) -> Result<FusionShape> {
        let dummy = Tensor::<B, 4>::random(
            [1, 3, input_size, input_size],
            Distribution::Normal(0.0, 1.0),
            device,
        );

        let dims: Vec<(Branch, [usize; 4])> = BRANCHES
            .iter()
            .map(|branch| {
                let features = self.forward_family(branch.family, dummy.clone());
                debug!("Dry run: branch {} -> {:?}", branch, features.dims());
                (*branch, features.dims())
            })
            .collect();

        FusionShape::from_branch_dims(&dims)
    }
}
