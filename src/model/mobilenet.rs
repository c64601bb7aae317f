//! Backbone family A: depthwise-separable inverted-residual network
//!
//! Follows the MobileNetV2 feature extractor, truncated after the 96-channel
//! group (output stride 16). The blocks are split into an early and a mid
//! stage that are always chained; the early stage also owns the stem.
//!
//! ```text
//! stem   3x3 conv s2 -> 32
//! early  t1 c16 n1 s1 | t6 c24 n2 s2 | t6 c32 n3 s2
//! mid    t6 c64 n4 s2 | t6 c96 n3 s1
//! ```

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

/// One row of the inverted-residual table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvertedResidualSetting {
    /// Expansion factor of the hidden layer
    pub expand_ratio: usize,
    /// Output channels
    pub channels: usize,
    /// Number of repeated blocks
    pub repeats: usize,
    /// Stride of the first block in the group
    pub stride: usize,
}

impl InvertedResidualSetting {
    pub const fn new(expand_ratio: usize, channels: usize, repeats: usize, stride: usize) -> Self {
        Self {
            expand_ratio,
            channels,
            repeats,
            stride,
        }
    }
}

/// Configuration for the inverted-residual backbone
#[derive(Config, Debug)]
pub struct MobileNetConfig {
    /// Channels produced by the stem convolution
    #[config(default = "32")]
    pub stem_channels: usize,

    /// Block groups, in order
    #[config(default = "MobileNetConfig::imagenet_settings()")]
    pub settings: Vec<InvertedResidualSetting>,

    /// Number of blocks (after the stem) that belong to the early stage
    #[config(default = "6")]
    pub early_blocks: usize,

    /// BatchNorm epsilon
    #[config(default = "1e-5")]
    pub norm_epsilon: f64,
}

impl MobileNetConfig {
    /// MobileNetV2 groups up to and including the 96-channel group
    pub fn imagenet_settings() -> Vec<InvertedResidualSetting> {
        vec![
            InvertedResidualSetting::new(1, 16, 1, 1),
            InvertedResidualSetting::new(6, 24, 2, 2),
            InvertedResidualSetting::new(6, 32, 3, 2),
            InvertedResidualSetting::new(6, 64, 4, 2),
            InvertedResidualSetting::new(6, 96, 3, 1),
        ]
    }

    /// Narrow variant with the same stride-16 geometry
    pub fn compact() -> Self {
        Self::new()
            .with_stem_channels(8)
            .with_settings(vec![
                InvertedResidualSetting::new(1, 8, 1, 1),
                InvertedResidualSetting::new(2, 8, 1, 2),
                InvertedResidualSetting::new(2, 12, 1, 2),
                InvertedResidualSetting::new(2, 16, 1, 2),
                InvertedResidualSetting::new(2, 16, 1, 1),
            ])
            .with_early_blocks(3)
    }

    /// Total number of inverted-residual blocks
    pub fn num_blocks(&self) -> usize {
        self.settings.iter().map(|s| s.repeats).sum()
    }

    /// Channels of the mid-stage output
    pub fn out_channels(&self) -> usize {
        self.settings
            .last()
            .map_or(self.stem_channels, |s| s.channels)
    }

    /// Build the early and mid stages
    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetBackbone<B> {
        let stem = ConvNormAct::new(
            ConvSpec::new(3, self.stem_channels, 3, 2),
            true,
            self.norm_epsilon,
            device,
        );

        let mut in_channels = self.stem_channels;
        let mut early = Vec::new();
        let mut mid = Vec::new();

        for setting in &self.settings {
            for repeat in 0..setting.repeats {
                let stride = if repeat == 0 { setting.stride } else { 1 };
                let block = InvertedResidual::new(
                    in_channels,
                    setting.channels,
                    stride,
                    setting.expand_ratio,
                    self.norm_epsilon,
                    device,
                );
                if early.len() < self.early_blocks {
                    early.push(block);
                } else {
                    mid.push(block);
                }
                in_channels = setting.channels;
            }
        }

        MobileNetBackbone {
            stem,
            early,
            mid,
            out_channels: in_channels,
        }
    }
}

/// Convolution geometry; padding keeps `k`-odd kernels centred
#[derive(Debug, Clone, Copy)]
struct ConvSpec {
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    groups: usize,
}

impl ConvSpec {
    fn new(in_channels: usize, out_channels: usize, kernel: usize, stride: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            stride,
            groups: 1,
        }
    }

    fn depthwise(channels: usize, stride: usize) -> Self {
        Self {
            groups: channels,
            ..Self::new(channels, channels, 3, stride)
        }
    }
}

/// Convolution + BatchNorm, optionally followed by ReLU6
#[derive(Module, Debug)]
pub struct ConvNormAct<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    activate: bool,
}

impl<B: Backend> ConvNormAct<B> {
    fn new(spec: ConvSpec, activate: bool, epsilon: f64, device: &B::Device) -> Self {
        let padding = (spec.kernel - 1) / 2;
        let conv = Conv2dConfig::new(
            [spec.in_channels, spec.out_channels],
            [spec.kernel, spec.kernel],
        )
        .with_stride([spec.stride, spec.stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_groups(spec.groups)
        .with_bias(false)
        .init(device);

        let bn = BatchNormConfig::new(spec.out_channels)
            .with_epsilon(epsilon)
            .init(device);

        Self { conv, bn, activate }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        if self.activate {
            relu6(x)
        } else {
            x
        }
    }
}

fn relu6<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    relu(x).clamp_max(6.0)
}

/// Expand (1x1) -> depthwise (3x3) -> linear projection (1x1)
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    pub expand: Option<ConvNormAct<B>>,
    pub depthwise: ConvNormAct<B>,
    pub project: ConvNormAct<B>,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expand_ratio: usize,
        epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand = (expand_ratio != 1).then(|| {
            ConvNormAct::new(ConvSpec::new(in_channels, hidden, 1, 1), true, epsilon, device)
        });

        Self {
            expand,
            depthwise: ConvNormAct::new(ConvSpec::depthwise(hidden, stride), true, epsilon, device),
            project: ConvNormAct::new(
                ConvSpec::new(hidden, out_channels, 1, 1),
                false,
                epsilon,
                device,
            ),
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.project.forward(self.depthwise.forward(x));

        if self.use_residual {
            x + input
        } else {
            x
        }
    }
}

/// Inverted-residual backbone split into early and mid stages
#[derive(Module, Debug)]
pub struct MobileNetBackbone<B: Backend> {
    pub stem: ConvNormAct<B>,
    pub early: Vec<InvertedResidual<B>>,
    pub mid: Vec<InvertedResidual<B>>,
    out_channels: usize,
}

impl<B: Backend> MobileNetBackbone<B> {
    /// Stem and early blocks
    pub fn forward_early(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.early
            .iter()
            .fold(self.stem.forward(x), |x, block| block.forward(x))
    }

    /// Mid blocks, consuming the early-stage output
    pub fn forward_mid(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.mid.iter().fold(x, |x, block| block.forward(x))
    }

    /// Early and mid stages chained: `[N, 3, H, W]` -> `[N, C, H/16, W/16]`
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
    fn test_default_table_matches_truncated_mobilenet_v2() {
        let config = MobileNetConfig::new();
        assert_eq!(config.num_blocks(), 13);
        assert_eq!(config.out_channels(), 96);
        assert_eq!(config.early_blocks, 6);
    }

    #[test]
    fn test_compact_output_shape() {
        let device = Default::default();
        let backbone = MobileNetConfig::compact().init::<TestBackend>(&device);
        assert_eq!(backbone.early.len(), 3);
        assert_eq!(backbone.mid.len(), 2);

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 224, 224], &device);
        let early = backbone.forward_early(input.clone());
        assert_eq!(early.dims(), [1, 12, 28, 28]);

        let output = backbone.forward(input);
        assert_eq!(output.dims(), [1, 16, 14, 14]);
        assert_eq!(backbone.out_channels(), 16);
    }

    #[test]
    fn test_residual_only_when_shapes_match() {
        let device = Default::default();
        let same = InvertedResidual::<TestBackend>::new(8, 8, 1, 2, 1e-5, &device);
        let strided = InvertedResidual::<TestBackend>::new(8, 8, 2, 2, 1e-5, &device);
        let widened = InvertedResidual::<TestBackend>::new(8, 12, 1, 1, 1e-5, &device);

        assert!(same.use_residual);
        assert!(!strided.use_residual);
        assert!(!widened.use_residual);
        assert!(widened.expand.is_none());
    }
}
