//! Frequency-domain transforms feeding the fusion branches
//!
//! Every transform maps an RGB image of arbitrary resolution to a
//! `[3, S, S]` channel-first tensor (S = 224 by default):
//!
//! - `dct`: full-grid 2-D discrete cosine transform
//! - `stft`: per-row short-time Fourier magnitude, first frame
//! - `wavelet`: magnitude of the single-level Haar approximation subband
//! - `learnable`: resized grayscale multiplied by a trainable mask
//!
//! The three deterministic transforms run on the CPU over `ndarray` grids and
//! are uploaded afterwards; the learnable transform runs on the model device.
//! All four replicate their single channel three times.

pub mod dct;
pub mod learnable;
pub mod stft;
pub mod wavelet;

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor, TensorData},
};
use image::RgbImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::utils::error::{FusionError, Result};

pub use learnable::{LearnableFrequency, LearnableFrequencyConfig};

/// Side length of every transform output
pub const OUTPUT_SIZE: usize = 224;

/// Number of replicated output channels
pub const OUTPUT_CHANNELS: usize = 3;

/// The closed set of frequency transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    Dct,
    Stft,
    Wavelet,
    Learnable,
}

impl TransformKind {
    /// All transforms, in branch order
    pub const ALL: [TransformKind; 4] = [
        TransformKind::Dct,
        TransformKind::Stft,
        TransformKind::Wavelet,
        TransformKind::Learnable,
    ];

    /// Position of this transform in [`TransformKind::ALL`]
    pub fn index(self) -> usize {
        match self {
            TransformKind::Dct => 0,
            TransformKind::Stft => 1,
            TransformKind::Wavelet => 2,
            TransformKind::Learnable => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TransformKind::Dct => "dct",
            TransformKind::Stft => "stft",
            TransformKind::Wavelet => "wavelet",
            TransformKind::Learnable => "learnable",
        }
    }

    /// Whether the output depends on trainable state
    pub fn is_learned(self) -> bool {
        matches!(self, TransformKind::Learnable)
    }
}

impl std::fmt::Display for TransformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Convert an RGB image to an 8-bit luma grid (rows = height)
///
/// Uses the ITU-R BT.601 fixed-point weights and rounds to whole intensity
/// levels, so the result matches a `u8` grayscale conversion.
pub fn grayscale(image: &RgbImage) -> Array2<f32> {
    let (width, height) = image.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        let p = image.get_pixel(x as u32, y as u32);
        let luma = (p[0] as u32 * 4899 + p[1] as u32 * 9617 + p[2] as u32 * 1868 + 8192) >> 14;
        luma.min(255) as f32
    })
}

/// Bilinear resize with pixel-centre alignment and edge clamping
pub fn resize_bilinear(grid: &Array2<f32>, out_height: usize, out_width: usize) -> Array2<f32> {
    let (in_height, in_width) = grid.dim();
    let rows = sample_positions(in_height, out_height);
    let cols = sample_positions(in_width, out_width);

    Array2::from_shape_fn((out_height, out_width), |(y, x)| {
        let (y0, y1, wy) = rows[y];
        let (x0, x1, wx) = cols[x];
        let top = grid[[y0, x0]] * (1.0 - wx) + grid[[y0, x1]] * wx;
        let bottom = grid[[y1, x0]] * (1.0 - wx) + grid[[y1, x1]] * wx;
        top * (1.0 - wy) + bottom * wy
    })
}

/// Source index pair and interpolation weight for each output coordinate
fn sample_positions(input: usize, output: usize) -> Vec<(usize, usize, f32)> {
    let scale = input as f64 / output as f64;
    (0..output)
        .map(|i| {
            let pos = (i as f64 + 0.5) * scale - 0.5;
            let mut base = pos.floor();
            let mut weight = pos - base;
            if base < 0.0 {
                base = 0.0;
                weight = 0.0;
            }
            let mut i0 = base as usize;
            if i0 >= input - 1 {
                i0 = input - 1;
                weight = 0.0;
            }
            let i1 = (i0 + 1).min(input - 1);
            (i0, i1, weight as f32)
        })
        .collect()
}

/// Upload a single-channel grid as a `[H, W]` tensor
pub fn grid_to_tensor<B: Backend>(grid: &Array2<f32>, device: &B::Device) -> Tensor<B, 2> {
    let (height, width) = grid.dim();
    let values: Vec<f32> = grid.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [height, width]), device)
}

/// Replicate a `[H, W]` channel into a `[3, H, W]` tensor
pub fn replicate_channels<B: Backend>(channel: Tensor<B, 2>) -> Tensor<B, 3> {
    let channel: Tensor<B, 3> = channel.unsqueeze();
    Tensor::cat(vec![channel; OUTPUT_CHANNELS], 0)
}

fn ensure_non_empty(image: &RgbImage, kind: TransformKind) -> Result<()> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(FusionError::preprocess(
            kind,
            format!("image has zero extent ({}x{})", width, height),
        ));
    }
    Ok(())
}

fn ensure_finite(grid: &Array2<f32>, kind: TransformKind) -> Result<()> {
    if grid.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(FusionError::preprocess(kind, "transform produced non-finite values"))
    }
}

/// The four transforms applied to one image
#[derive(Debug, Clone)]
pub struct TransformedImage<B: Backend> {
    tensors: [Tensor<B, 3>; 4],
}

impl<B: Backend> TransformedImage<B> {
    /// Output of one transform, `[3, S, S]`
    pub fn get(&self, kind: TransformKind) -> &Tensor<B, 3> {
        &self.tensors[kind.index()]
    }

    /// Output of one transform with a leading batch axis, `[1, 3, S, S]`
    pub fn batched(&self, kind: TransformKind) -> Tensor<B, 4> {
        self.tensors[kind.index()].clone().unsqueeze()
    }
}

/// Applies every frequency transform; owns the learnable mask
#[derive(Module, Debug)]
pub struct TransformBank<B: Backend> {
    pub learnable: LearnableFrequency<B>,
    output_size: usize,
}

impl<B: Backend> TransformBank<B> {
    /// Create a bank producing `[3, output_size, output_size]` tensors
    pub fn new(output_size: usize, device: &B::Device) -> Self {
        Self {
            learnable: LearnableFrequencyConfig::new()
                .with_size(output_size)
                .init(device),
            output_size,
        }
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Run one transform on an RGB image
    pub fn apply(&self, kind: TransformKind, image: &RgbImage) -> Result<Tensor<B, 3>> {
        ensure_non_empty(image, kind)?;
        let size = self.output_size;
        let gray = grayscale(image);

        let channel = match kind {
            TransformKind::Dct => self.upload(dct::dct_map(&gray, size), kind)?,
            TransformKind::Stft => self.upload(stft::stft_map(&gray, size), kind)?,
            TransformKind::Wavelet => self.upload(wavelet::wavelet_map(&gray, size), kind)?,
            TransformKind::Learnable => {
                let device = self.learnable.device();
                self.learnable.forward(&gray, &device)
            }
        };

        Ok(replicate_channels(channel))
    }

    /// Run all four transforms, in [`TransformKind::ALL`] order
    pub fn apply_all(&self, image: &RgbImage) -> Result<TransformedImage<B>> {
        Ok(TransformedImage {
            tensors: [
                self.apply(TransformKind::Dct, image)?,
                self.apply(TransformKind::Stft, image)?,
                self.apply(TransformKind::Wavelet, image)?,
                self.apply(TransformKind::Learnable, image)?,
            ],
        })
    }

    fn upload(&self, grid: Array2<f32>, kind: TransformKind) -> Result<Tensor<B, 2>> {
        ensure_finite(&grid, kind)?;
        Ok(grid_to_tensor(&grid, &self.learnable.device()))
    }
}
