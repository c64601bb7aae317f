//! Leaf plausibility heuristic
//!
//! Scores how much an image looks like a green leaf from four colour and
//! texture statistics on a 224x224 resize. It does not use the classifier;
//! callers decide whether to reject images before calling `predict`.

use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};

const SAMPLE_SIZE: u32 = 224;

const GREEN_DOMINANCE_WEIGHT: f32 = 0.35;
const VARIANCE_WEIGHT: f32 = 0.25;
const GREEN_INTENSITY_WEIGHT: f32 = 0.25;
const TEXTURE_WEIGHT: f32 = 0.15;

/// Outcome of a leaf check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafVerdict {
    pub is_leaf: bool,
    pub confidence: f32,
    pub message: String,
}

/// Individual statistics behind a verdict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeafFeatures {
    /// Fraction of pixels with G > R times fraction with G > B
    pub green_dominance: f32,
    /// Standard deviation of all channel values, scaled to [0, 1]
    pub color_variance: f32,
    /// Mean green value, scaled to [0, 1]
    pub green_intensity: f32,
    /// One minus the standard deviation over 128
    pub uniformity: f32,
}

impl LeafFeatures {
    /// Weighted combination clamped to [0, 1]
    pub fn score(&self) -> f32 {
        let score = self.green_dominance * GREEN_DOMINANCE_WEIGHT
            + (self.color_variance * 2.0).min(1.0) * VARIANCE_WEIGHT
            + self.green_intensity * GREEN_INTENSITY_WEIGHT
            + (1.0 - self.uniformity.min(1.0)) * TEXTURE_WEIGHT;
        score.clamp(0.0, 1.0)
    }
}

/// Colour/texture leaf detector with a decision threshold
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LeafCheck {
    pub threshold: f32,
}

impl Default for LeafCheck {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl LeafCheck {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Compute the statistics; `None` for an image with no pixels
    pub fn features(&self, image: &DynamicImage) -> Option<LeafFeatures> {
        if image.width() == 0 || image.height() == 0 {
            return None;
        }

        let rgb = image
            .resize_exact(SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Triangle)
            .to_rgb8();
        let pixels = (SAMPLE_SIZE * SAMPLE_SIZE) as f64;

        let mut green_over_red = 0usize;
        let mut green_over_blue = 0usize;
        let mut green_sum = 0f64;
        let mut sum = 0f64;
        let mut sum_sq = 0f64;

        for p in rgb.pixels() {
            let [r, g, b] = p.0;
            green_over_red += usize::from(g > r);
            green_over_blue += usize::from(g > b);
            green_sum += g as f64;
            for v in [r, g, b] {
                let v = v as f64;
                sum += v;
                sum_sq += v * v;
            }
        }

        let values = pixels * 3.0;
        let mean = sum / values;
        let std = (sum_sq / values - mean * mean).max(0.0).sqrt();

        Some(LeafFeatures {
            green_dominance: ((green_over_red as f64 / pixels) * (green_over_blue as f64 / pixels))
                as f32,
            color_variance: (std / 255.0) as f32,
            green_intensity: (green_sum / pixels / 255.0) as f32,
            uniformity: (1.0 - std / 128.0) as f32,
        })
    }

    /// Decide whether `image` looks like a leaf
    pub fn check(&self, image: &DynamicImage) -> LeafVerdict {
        let Some(features) = self.features(image) else {
            return LeafVerdict {
                is_leaf: false,
                confidence: 0.0,
                message: "Validation error: image has no pixels".to_string(),
            };
        };

        let confidence = features.score();
        let is_leaf = confidence >= self.threshold;
        let message = if is_leaf {
            format!("Valid cassava leaf detected (confidence: {:.2}%)", confidence * 100.0)
        } else {
            format!(
                "This does not appear to be a cassava leaf (confidence: {:.2}%)",
                confidence * 100.0
            )
        };

        LeafVerdict {
            is_leaf,
            confidence,
            message,
        }
    }
}
