//! Backbone family B: staged ConvNeXt-style network
//!
//! A patchify stem followed by stages of ConvNeXt blocks; every stage except
//! the last ends with a LayerNorm + 2x2/2 downsampling convolution. The early
//! stage holds the stem and the first `early_stages` stages (with their
//! downsamples), the mid stage holds the rest.
//!
//! Default geometry (ConvNeXt-Tiny truncated after its third stage):
//!
//! ```text
//! early  stem 4x4/4 -> 96 | 3 blocks @96 | down -> 192
//! mid    3 blocks @192 | down -> 384 | 9 blocks @384
//! ```

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Gelu, LayerNorm, LayerNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};

/// Configuration for the staged backbone
#[derive(Config, Debug)]
pub struct ConvNextConfig {
    /// Stem kernel size and stride
    #[config(default = "4")]
    pub patch_size: usize,

    /// Channel width of each stage
    #[config(default = "vec![96, 192, 384]")]
    pub dims: Vec<usize>,

    /// Number of blocks in each stage
    #[config(default = "vec![3, 3, 9]")]
    pub depths: Vec<usize>,

    /// Stages (with their trailing downsample) assigned to the early stage
    #[config(default = "1")]
    pub early_stages: usize,

    /// Initial value of the per-channel layer scale
    #[config(default = "1e-6")]
    pub layer_scale_init: f64,

    /// LayerNorm epsilon
    #[config(default = "1e-6")]
    pub norm_epsilon: f64,
}

impl ConvNextConfig {
    /// Narrow, shallow variant with the same stride-16 geometry
    pub fn compact() -> Self {
        Self::new()
            .with_dims(vec![8, 16, 24])
            .with_depths(vec![1, 1, 1])
    }

    pub fn out_channels(&self) -> usize {
        self.dims.last().copied().unwrap_or(0)
    }

    /// Total downsampling factor from input to mid-stage output
    pub fn output_stride(&self) -> usize {
        self.patch_size * (1 << self.dims.len().saturating_sub(1))
    }

    /// Build the early and mid stages
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNextBackbone<B> {
        let first = self.dims.first().copied().unwrap_or(3);
        let stem = Patchify::new(3, first, self.patch_size, self.norm_epsilon, device);

        let mut early = Vec::new();
        let mut mid = Vec::new();

        for (index, (&dim, &depth)) in self.dims.iter().zip(&self.depths).enumerate() {
            let blocks = (0..depth)
                .map(|_| ConvNextBlock::new(dim, self.layer_scale_init, self.norm_epsilon, device))
                .collect();
            let downsample = self
                .dims
                .get(index + 1)
                .map(|&next| Downsample::new(dim, next, self.norm_epsilon, device));

            let stage = ConvNextStage { blocks, downsample };
            if index < self.early_stages {
                early.push(stage);
            } else {
                mid.push(stage);
            }
        }

        ConvNextBackbone {
            stem,
            early,
            mid,
            out_channels: self.out_channels(),
        }
    }
}

/// LayerNorm over the channel axis of an NCHW tensor
#[derive(Module, Debug)]
pub struct ChannelNorm<B: Backend> {
    pub norm: LayerNorm<B>,
}

impl<B: Backend> ChannelNorm<B> {
    fn new(channels: usize, epsilon: f64, device: &B::Device) -> Self {
        Self {
            norm: LayerNormConfig::new(channels)
                .with_epsilon(epsilon)
                .init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = x.permute([0, 2, 3, 1]);
        self.norm.forward(x).permute([0, 3, 1, 2])
    }
}

/// Non-overlapping patch embedding followed by channel norm
#[derive(Module, Debug)]
pub struct Patchify<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: ChannelNorm<B>,
}

impl<B: Backend> Patchify<B> {
    fn new(in_channels: usize, out_channels: usize, patch: usize, epsilon: f64, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [patch, patch])
                .with_stride([patch, patch])
                .init(device),
            norm: ChannelNorm::new(out_channels, epsilon, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

/// Channel norm followed by a 2x2 stride-2 convolution
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub norm: ChannelNorm<B>,
    pub conv: Conv2d<B>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, epsilon: f64, device: &B::Device) -> Self {
        Self {
            norm: ChannelNorm::new(in_channels, epsilon, device),
            conv: Conv2dConfig::new([in_channels, out_channels], [2, 2])
                .with_stride([2, 2])
                .init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.norm.forward(x))
    }
}

/// 7x7 depthwise conv -> LayerNorm -> MLP(4x) -> layer scale, with residual
#[derive(Module, Debug)]
pub struct ConvNextBlock<B: Backend> {
    pub dwconv: Conv2d<B>,
    pub norm: LayerNorm<B>,
    pub pwconv1: Linear<B>,
    pub act: Gelu,
    pub pwconv2: Linear<B>,
    pub layer_scale: Param<Tensor<B, 1>>,
}

impl<B: Backend> ConvNextBlock<B> {
    fn new(dim: usize, layer_scale_init: f64, epsilon: f64, device: &B::Device) -> Self {
        Self {
            dwconv: Conv2dConfig::new([dim, dim], [7, 7])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_groups(dim)
                .init(device),
            norm: LayerNormConfig::new(dim).with_epsilon(epsilon).init(device),
            pwconv1: LinearConfig::new(dim, 4 * dim).init(device),
            act: Gelu::new(),
            pwconv2: LinearConfig::new(4 * dim, dim).init(device),
            layer_scale: Param::from_tensor(Tensor::full([dim], layer_scale_init, device)),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.dwconv.forward(input.clone());
        // Channels-last for the norm and pointwise layers
        let x = x.permute([0, 2, 3, 1]);
        let x = self.norm.forward(x);
        let x = self.pwconv1.forward(x);
        let x = self.act.forward(x);
        let x = self.pwconv2.forward(x);
        let scale: Tensor<B, 4> = self.layer_scale.val().unsqueeze();
        let x = x * scale;

        input + x.permute([0, 3, 1, 2])
    }
}

/// Blocks of one width, optionally followed by a downsample to the next width
#[derive(Module, Debug)]
pub struct ConvNextStage<B: Backend> {
    pub blocks: Vec<ConvNextBlock<B>>,
    pub downsample: Option<Downsample<B>>,
}

impl<B: Backend> ConvNextStage<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        match &self.downsample {
            Some(downsample) => downsample.forward(x),
            None => x,
        }
    }
}

/// Staged backbone split into early and mid stages
#[derive(Module, Debug)]
pub struct ConvNextBackbone<B: Backend> {
    pub stem: Patchify<B>,
    pub early: Vec<ConvNextStage<B>>,
    pub mid: Vec<ConvNextStage<B>>,
    out_channels: usize,
}

impl<B: Backend> ConvNextBackbone<B> {
    /// Stem and early stages
    pub fn forward_early(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.early
            .iter()
            .fold(self.stem.forward(x), |x, stage| stage.forward(x))
    }

    /// Mid stages, consuming the early-stage output
    pub fn forward_mid(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.mid.iter().fold(x, |x, stage| stage.forward(x))
    }

    /// Early and mid stages chained
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward_mid(self.forward_early(x))
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_default_geometry() {
        let config = ConvNextConfig::new();
        assert_eq!(config.out_channels(), 384);
        assert_eq!(config.output_stride(), 16);
        assert_eq!(config.depths.iter().sum::<usize>(), 15);
    }

    #[test]
    fn test_compact_output_shape() {
        let device = Default::default();
        let backbone = ConvNextConfig::compact().init::<TestBackend>(&device);
        assert_eq!(backbone.early.len(), 1);
        assert_eq!(backbone.mid.len(), 2);
        assert!(backbone.mid[1].downsample.is_none());

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 224, 224], &device);
        let early = backbone.forward_early(input.clone());
        assert_eq!(early.dims(), [1, 16, 28, 28]);

        let output = backbone.forward(input);
        assert_eq!(output.dims(), [1, 24, 14, 14]);
    }

    #[test]
    fn test_block_starts_close_to_identity() {
        let device = Default::default();
        let block = ConvNextBlock::<TestBackend>::new(4, 1e-6, 1e-6, &device);
        let input = Tensor::<TestBackend, 4>::random(
            [1, 4, 9, 9],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let output = block.forward(input.clone());
        let diff: f32 = (output - input).abs().max().into_scalar();
        assert!(diff < 1e-3, "max deviation {}", diff);
    }

    #[test]
    fn test_wider_patch_halves_resolution() {
        let device = Default::default();
        let backbone = ConvNextConfig::compact()
            .with_patch_size(8)
            .init::<TestBackend>(&device);
        let output = backbone.forward(Tensor::zeros([1, 3, 224, 224], &device));
        assert_eq!(output.dims(), [1, 24, 7, 7]);
    }
}
