//! Learnable frequency filter
//!
//! The grayscale image is resized to the mask size and multiplied element-wise
//! by a trainable mask drawn from a standard normal at construction. The mask is
//! an ordinary parameter: it is saved and loaded with the rest of the model and
//! never resampled between forward passes.

use burn::{
    config::Config,
    module::{Module, Param},
    tensor::{backend::Backend, Distribution, Tensor},
};
use ndarray::Array2;

use super::{grid_to_tensor, resize_bilinear};

/// Configuration for the learnable frequency filter
#[derive(Config, Debug)]
pub struct LearnableFrequencyConfig {
    /// Side length of the square mask
    #[config(default = "224")]
    pub size: usize,
}

impl LearnableFrequencyConfig {
    /// Initialize the filter with a standard-normal mask
    pub fn init<B: Backend>(&self, device: &B::Device) -> LearnableFrequency<B> {
        let mask = Tensor::random(
            [self.size, self.size],
            Distribution::Normal(0.0, 1.0),
            device,
        );

        LearnableFrequency {
            mask: Param::from_tensor(mask),
        }
    }
}

/// Element-wise trainable mask over the resized grayscale image
#[derive(Module, Debug)]
pub struct LearnableFrequency<B: Backend> {
    pub mask: Param<Tensor<B, 2>>,
}

impl<B: Backend> LearnableFrequency<B> {
    /// Side length of the mask
    pub fn size(&self) -> usize {
        self.mask.val().dims()[0]
    }

    /// Device holding the mask
    pub fn device(&self) -> B::Device {
        self.mask.val().device()
    }

    /// Resize `gray` to the mask size, round to intensity levels and filter it
    pub fn forward(&self, gray: &Array2<f32>, device: &B::Device) -> Tensor<B, 2> {
        let size = self.size();
        let resized = resize_bilinear(gray, size, size).mapv(|v| v.round().clamp(0.0, 255.0));
        self.apply_mask(grid_to_tensor(&resized, device))
    }

    /// Multiply a `[size, size]` tensor by the mask
    pub fn apply_mask(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        input * self.mask.val()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_mask_shape_and_statistics() {
        let device = Default::default();
        let filter = LearnableFrequencyConfig::new().init::<TestBackend>(&device);
        assert_eq!(filter.size(), 224);

        let values: Vec<f32> = filter.mask.val().into_data().to_vec().unwrap();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.1, "variance {}", var);
    }

    #[test]
    fn test_mask_is_fixed_between_calls() {
        let device = Default::default();
        let filter = LearnableFrequencyConfig::new()
            .with_size(16)
            .init::<TestBackend>(&device);
        let gray = Array2::from_shape_fn((20, 30), |(y, x)| ((x * y) % 255) as f32);

        let first: Vec<f32> = filter.forward(&gray, &device).into_data().to_vec().unwrap();
        let second: Vec<f32> = filter.forward(&gray, &device).into_data().to_vec().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_image_stays_zero() {
        let device = Default::default();
        let filter = LearnableFrequencyConfig::new()
            .with_size(8)
            .init::<TestBackend>(&device);
        let gray = Array2::zeros((5, 5));

        let out: Vec<f32> = filter.forward(&gray, &device).into_data().to_vec().unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
