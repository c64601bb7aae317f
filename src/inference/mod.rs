//! Inference module for the fusion classifier
//!
//! This module provides:
//! - `FusionPredictor`: one-time construction and single-image prediction
//! - `SharedPredictor`: lazily built predictor shared across threads
//! - Weight store load/save with parameter shape validation
//! - Leaf plausibility heuristic
//! - Latency benchmarking

pub mod benchmark;
pub mod leaf_check;
pub mod predictor;
pub mod shared;
pub mod weights;

// Re-export main types for convenience
pub use benchmark::{benchmark_predictor, BenchmarkConfig, BenchmarkResult, LatencyStats, Timer};
pub use leaf_check::{LeafCheck, LeafFeatures, LeafVerdict};
pub use predictor::{
    ClassProbability, FusionPredictor, ModelInfo, PredictionResult, PredictorConfig,
};
pub use shared::SharedPredictor;
pub use weights::{load_weights, save_weights, WeightSource};

/// Target latency for a single CPU prediction with the full network (milliseconds)
pub const TARGET_LATENCY_MS: f64 = 2000.0;
