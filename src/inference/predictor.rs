//! Inference Predictor Module
//!
//! `FusionPredictor` owns the composed network for its whole lifetime. It is
//! built once (device selection, two-phase construction, weight load) and then
//! answers `predict` calls without mutating anything. Clones share parameter
//! storage, so handing a clone to each worker thread reuses the same model.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::{
    module::Module,
    tensor::{activation::softmax, backend::Backend},
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::weights::{self, WeightSource};
use crate::backend::DeviceSelection;
use crate::model::{FusionShape, MidFusionNet, MidFusionNetConfig, ShapeCache, BRANCHES};
use crate::transforms::TransformKind;
use crate::utils::error::{FusionError, Result};
use crate::CLASS_NAMES;

/// Number of entries kept in [`PredictionResult::top_k`]
pub const DEFAULT_TOP_K: usize = 3;

/// Everything needed to build a predictor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Network architecture
    pub model: MidFusionNetConfig,

    /// Weight store path without extension (the recorder adds `.mpk`)
    pub weights_path: PathBuf,

    /// Optional fusion-shape cache file
    pub shape_cache_path: Option<PathBuf>,

    /// Ordered class labels; position defines the class index
    pub class_labels: Vec<String>,

    /// Seed for random initialization (used when no weight file exists)
    pub seed: Option<u64>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            model: MidFusionNetConfig::new(),
            weights_path: PathBuf::from("models/fusionnet_best"),
            shape_cache_path: Some(PathBuf::from("models/fusion_shape.json")),
            class_labels: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            seed: None,
        }
    }
}

impl PredictorConfig {
    /// Default labels with the compact network
    pub fn compact() -> Self {
        Self {
            model: MidFusionNetConfig::compact(CLASS_NAMES.len()),
            ..Default::default()
        }
    }

    pub fn with_weights_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.weights_path = path.into();
        self
    }

    pub fn with_shape_cache(mut self, path: Option<PathBuf>) -> Self {
        self.shape_cache_path = path;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Replace the labels and resize the classifier to match
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.model.num_classes = labels.len();
        self.class_labels = labels;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;

        if self.class_labels.is_empty() {
            return Err(FusionError::Config("class_labels must not be empty".to_string()));
        }

        if self.class_labels.len() != self.model.num_classes {
            return Err(FusionError::Config(format!(
                "{} class labels configured for a {}-class model",
                self.class_labels.len(),
                self.model.num_classes
            )));
        }

        for (i, label) in self.class_labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(FusionError::Config(format!("class label #{} is blank", i)));
            }
            if self.class_labels[..i].contains(label) {
                return Err(FusionError::Config(format!("duplicate class label {:?}", label)));
            }
        }

        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FusionError::Config(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, json)
            .map_err(|e| FusionError::Config(format!("cannot write {:?}: {}", path, e)))
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| FusionError::Config(format!("cannot read {:?}: {}", path, e)))?;
        serde_json::from_str(&json)
            .map_err(|e| FusionError::Config(format!("invalid config {:?}: {}", path, e)))
    }
}

/// Probability assigned to one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub label: String,
    pub probability: f32,
}

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Predicted class name
    pub predicted_label: String,

    /// Predicted class index (position in the label list)
    pub predicted_index: usize,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Full distribution, in label order
    pub class_probabilities: Vec<ClassProbability>,

    /// Most probable classes, best first
    pub top_k: Vec<ClassProbability>,

    /// Wall-clock time of the prediction in milliseconds
    pub inference_time_ms: f64,
}

impl PredictionResult {
    /// Build a result from a probability vector aligned with `labels`
    pub fn new(labels: &[String], probabilities: &[f32], inference_time: Duration) -> Result<Self> {
        if labels.len() != probabilities.len() {
            return Err(FusionError::Inference(format!(
                "model produced {} probabilities for {} labels",
                probabilities.len(),
                labels.len()
            )));
        }

        // Find predicted class (argmax)
        let (predicted_index, &confidence) = probabilities
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or_else(|| FusionError::Inference("empty probability vector".to_string()))?;

        let class_probabilities: Vec<ClassProbability> = labels
            .iter()
            .zip(probabilities)
            .map(|(label, &probability)| ClassProbability {
                label: label.clone(),
                probability,
            })
            .collect();

        let mut top_k = class_probabilities.clone();
        top_k.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        top_k.truncate(DEFAULT_TOP_K);

        Ok(Self {
            predicted_label: labels[predicted_index].clone(),
            predicted_index,
            confidence,
            class_probabilities,
            top_k,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        })
    }

    /// Probability of `label`, if it is one of the configured classes
    pub fn probability_of(&self, label: &str) -> Option<f32> {
        self.class_probabilities
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.probability)
    }

    /// Check if the prediction is high-confidence
    pub fn is_high_confidence(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    /// Get the entropy of the prediction (measure of uncertainty)
    pub fn entropy(&self) -> f32 {
        self.class_probabilities
            .iter()
            .map(|c| c.probability)
            .filter(|&p| p > 0.0)
            .map(|p| -p * p.ln())
            .sum()
    }

    /// Get the margin between top-1 and top-2 predictions
    pub fn margin(&self) -> f32 {
        match self.top_k.as_slice() {
            [first, second, ..] => first.probability - second.probability,
            _ => self.confidence,
        }
    }

    /// Pretty print the prediction result
    pub fn display(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "Prediction: {} (class {})\n",
            self.predicted_label, self.predicted_index
        ));
        output.push_str(&format!("Confidence: {:.2}%\n", self.confidence * 100.0));
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));

        output.push_str(&format!("\nTop-{} predictions:\n", self.top_k.len()));
        for (i, class) in self.top_k.iter().enumerate() {
            output.push_str(&format!(
                "  {}. {} - {:.2}%\n",
                i + 1,
                class.label,
                class.probability * 100.0
            ));
        }

        output
    }
}

/// Static description of a constructed predictor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub num_classes: usize,
    pub class_names: Vec<String>,
    pub backend: String,
    pub accelerated: bool,
    pub transforms: Vec<String>,
    pub branches: Vec<String>,
    pub input_size: usize,
    pub latent_width: usize,
    pub fused_channels: usize,
    pub num_params: usize,
    pub weights: WeightSource,
}

/// The mid-fusion network with its labels, device and weight provenance
#[derive(Debug, Clone)]
pub struct FusionPredictor<B: Backend> {
    model: MidFusionNet<B>,
    config: PredictorConfig,
    device: B::Device,
    backend_name: String,
    accelerated: bool,
    shape: FusionShape,
    weights: WeightSource,
}

impl<B: Backend> FusionPredictor<B> {
    /// Build the network on the selected device and load its weights
    ///
    /// A missing weight file is not an error: the predictor runs on random
    /// parameters and reports [`WeightSource::RandomInit`]. A weight file that
    /// does not fit the constructed network is a `Construction` error.
    pub fn new(config: PredictorConfig, selection: DeviceSelection<B>) -> Result<Self> {
        Self::build(config, selection, true)
    }

    /// Build the network without consulting the weight store
    pub fn random(config: PredictorConfig, selection: DeviceSelection<B>) -> Result<Self> {
        Self::build(config, selection, false)
    }

    fn build(config: PredictorConfig, selection: DeviceSelection<B>, load: bool) -> Result<Self> {
        config.validate()?;
        let DeviceSelection {
            device,
            backend_name,
            accelerated,
        } = selection;

        if let Some(seed) = config.seed {
            B::seed(&device, seed);
        }

        let cache = config.shape_cache_path.as_ref().map(ShapeCache::new);
        let (model, shape, _) = MidFusionNet::<B>::init(&config.model, cache.as_ref(), &device)?;
        let (model, weights) = if load {
            weights::load_weights::<B, _>(model, &config.weights_path, &device)?
        } else {
            (model, WeightSource::RandomInit)
        };

        info!(
            "Predictor ready on {}: {} classes, {} fused channels, weights {}",
            backend_name,
            config.class_labels.len(),
            shape.fused_channels(),
            weights
        );

        Ok(Self {
            model,
            config,
            device,
            backend_name,
            accelerated,
            shape,
            weights,
        })
    }

    /// Classify one decoded image
    pub fn predict(&self, image: &DynamicImage) -> Result<PredictionResult> {
        let start = Instant::now();

        let rgb = image.to_rgb8();
        let inputs = self.model.preprocess(&rgb)?;
        let logits = self.model.forward(&inputs);
        let probabilities: Vec<f32> = softmax(logits, 1)
            .into_data()
            .to_vec()
            .map_err(|e| FusionError::Inference(format!("cannot read probabilities: {:?}", e)))?;

        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(FusionError::Inference(
                "forward pass produced non-finite probabilities".to_string(),
            ));
        }

        let result = PredictionResult::new(&self.config.class_labels, &probabilities, start.elapsed())?;
        debug!(
            "Predicted {} ({:.2}%) in {:.2} ms",
            result.predicted_label,
            result.confidence * 100.0,
            result.inference_time_ms
        );
        Ok(result)
    }

    /// Describe the constructed model
    pub fn info(&self) -> ModelInfo {
        let model_config = &self.config.model;
        ModelInfo {
            model_type: "MidFusionNet".to_string(),
            num_classes: self.model.num_classes(),
            class_names: self.config.class_labels.clone(),
            backend: self.backend_name.clone(),
            accelerated: self.accelerated,
            transforms: TransformKind::ALL.iter().map(|k| k.to_string()).collect(),
            branches: BRANCHES.iter().map(|b| b.to_string()).collect(),
            input_size: model_config.input_size,
            latent_width: model_config.latent_width,
            fused_channels: self.shape.fused_channels(),
            num_params: self.model.num_params(),
            weights: self.weights.clone(),
        }
    }

    /// Persist the current parameters, learnable mask included
    pub fn save_weights(&self, path: &Path) -> Result<PathBuf> {
        weights::save_weights::<B, _>(&self.model, path)
    }

    pub fn weight_source(&self) -> &WeightSource {
        &self.weights
    }

    pub fn labels(&self) -> &[String] {
        &self.config.class_labels
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn fusion_shape(&self) -> &FusionShape {
        &self.shape
    }

    pub fn model(&self) -> &MidFusionNet<B> {
        &self.model
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn labels(n: usize) -> Vec<String> {
        CLASS_NAMES.iter().take(n).map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prediction_result_new() {
        let probs = vec![0.05, 0.7, 0.05, 0.15, 0.05];
        let result = PredictionResult::new(&labels(5), &probs, Duration::from_millis(50)).unwrap();

        assert_eq!(result.predicted_index, 1);
        assert_eq!(result.predicted_label, CLASS_NAMES[1]);
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.class_probabilities.len(), 5);
        assert_eq!(result.top_k.len(), DEFAULT_TOP_K);
        assert_eq!(result.top_k[1].label, CLASS_NAMES[3]);
        assert!((result.margin() - 0.55).abs() < 1e-6);
        assert!((result.inference_time_ms - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_prediction_entropy() {
        let uniform = PredictionResult::new(&labels(5), &[0.2; 5], Duration::ZERO).unwrap();
        let confident =
            PredictionResult::new(&labels(5), &[0.96, 0.01, 0.01, 0.01, 0.01], Duration::ZERO)
                .unwrap();

        assert!(uniform.entropy() > confident.entropy());
        assert!((uniform.entropy() - 5f32.ln()).abs() < 1e-5);
        assert!(confident.is_high_confidence(0.9));
    }

    #[test]
    fn test_probability_lookup_and_display() {
        let result =
            PredictionResult::new(&labels(5), &[0.1, 0.1, 0.1, 0.1, 0.6], Duration::ZERO).unwrap();
        assert_eq!(result.probability_of("Healthy"), Some(0.6));
        assert_eq!(result.probability_of("Unknown"), None);
        assert!(result.display().contains("Healthy"));
    }

    #[test]
    fn test_label_count_mismatch_is_inference_error() {
        let err = PredictionResult::new(&labels(5), &[0.5, 0.5], Duration::ZERO).unwrap_err();
        assert!(matches!(err, FusionError::Inference(_)));
    }

    #[test]
    fn test_config_validation() {
        assert!(PredictorConfig::default().validate().is_ok());

        let mut short = PredictorConfig::compact();
        short.class_labels.pop();
        assert!(matches!(short.validate(), Err(FusionError::Config(_))));

        let duplicated = PredictorConfig::compact()
            .with_labels(vec!["a".to_string(), "b".to_string(), "a".to_string()]);
        assert!(duplicated.validate().is_err());

        let relabelled = PredictorConfig::compact().with_labels(labels(3));
        assert!(relabelled.validate().is_ok());
        assert_eq!(relabelled.model.num_classes, 3);
    }

    #[test]
    fn test_config_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("predictor.json");
        let config = PredictorConfig::compact().with_seed(7);
        config.save(&path).unwrap();

        let loaded = PredictorConfig::load(&path).unwrap();
        assert_eq!(loaded.class_labels, config.class_labels);
        assert_eq!(loaded.seed, Some(7));
        assert_eq!(loaded.model.latent_width, config.model.latent_width);
        assert!(PredictorConfig::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_predictor_info_in_degraded_mode() {
        let dir = TempDir::new().unwrap();
        let config = PredictorConfig::compact()
            .with_weights_path(dir.path().join("absent"))
            .with_shape_cache(None);
        let selection = DeviceSelection::<TestBackend>::explicit(Default::default(), "NdArray (CPU)", false);

        let predictor = FusionPredictor::new(config, selection).unwrap();
        let info = predictor.info();
        assert_eq!(info.num_classes, 5);
        assert_eq!(info.transforms, vec!["dct", "stft", "wavelet", "learnable"]);
        assert_eq!(info.branches.len(), 8);
        assert_eq!(info.fused_channels, 160);
        assert!(info.num_params > 0);
        assert_eq!(info.weights, WeightSource::RandomInit);
    }
}
