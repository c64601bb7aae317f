//! Benchmark Module for Inference Latency Testing
//!
//! Repeats single-image `predict` calls on one predictor and summarizes the
//! wall-clock latency. Warmup iterations are run first and excluded.

use std::path::Path;
use std::time::{Duration, Instant};

use burn::tensor::backend::Backend;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::predictor::FusionPredictor;
use crate::utils::error::{FusionError, Result};

/// Configuration for benchmarking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Number of warmup iterations (excluded from measurements)
    pub warmup_iterations: usize,

    /// Number of timed iterations
    pub iterations: usize,

    /// Whether to keep individual iteration times
    pub verbose: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            warmup_iterations: 10,
            iterations: 100,
            verbose: false,
        }
    }
}

impl BenchmarkConfig {
    /// Create a quick benchmark config for testing
    pub fn quick() -> Self {
        Self {
            warmup_iterations: 2,
            iterations: 10,
            verbose: false,
        }
    }
}

/// Results from a benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Latency statistics
    pub latency: LatencyStats,

    /// Throughput (images per second)
    pub throughput: f64,

    /// Individual iteration times (if verbose)
    pub iteration_times_ms: Vec<f64>,

    /// Configuration used for this benchmark
    pub config: BenchmarkConfig,

    /// Backend the predictor ran on
    pub backend: String,

    /// Label predicted on the benchmark image
    pub predicted_label: String,

    /// Timestamp of when benchmark was run
    pub timestamp: String,
}

impl BenchmarkResult {
    /// Create a new benchmark result from timing data
    pub fn from_timings(
        timings: &[Duration],
        config: BenchmarkConfig,
        backend: String,
        predicted_label: String,
    ) -> Self {
        let latency = LatencyStats::from_durations(timings);
        let throughput = if latency.mean_ms > 0.0 {
            1000.0 / latency.mean_ms
        } else {
            0.0
        };

        let iteration_times_ms = if config.verbose {
            timings.iter().map(|d| d.as_secs_f64() * 1000.0).collect()
        } else {
            Vec::new()
        };

        Self {
            latency,
            throughput,
            iteration_times_ms,
            config,
            backend,
            predicted_label,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Save results to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FusionError::Persist(format!("cannot serialize benchmark: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FusionError::Persist(format!("cannot create {:?}: {}", parent, e)))?;
        }

        std::fs::write(path, json)
            .map_err(|e| FusionError::Persist(format!("cannot write {:?}: {}", path, e)))
    }

    /// Check if p95 latency meets the target (in milliseconds)
    pub fn meets_latency_target(&self, target_ms: f64) -> bool {
        self.latency.p95_ms <= target_ms
    }

    /// Get a summary string
    pub fn summary(&self) -> String {
        format!(
            "Latency: {:.2}ms (mean), {:.2}ms (p95), {:.2}ms (p99) | Throughput: {:.1} img/s",
            self.latency.mean_ms, self.latency.p95_ms, self.latency.p99_ms, self.throughput
        )
    }
}

impl std::fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Benchmark Results ({})", self.backend)?;
        writeln!(f, "  Timestamp:  {}", self.timestamp)?;
        writeln!(
            f,
            "  Iterations: {} (+{} warmup)",
            self.config.iterations, self.config.warmup_iterations
        )?;
        writeln!(f, "  Mean:       {:8.2} ms", self.latency.mean_ms)?;
        writeln!(f, "  Std Dev:    {:8.2} ms", self.latency.std_ms)?;
        writeln!(f, "  Min:        {:8.2} ms", self.latency.min_ms)?;
        writeln!(f, "  Max:        {:8.2} ms", self.latency.max_ms)?;
        writeln!(f, "  P50:        {:8.2} ms", self.latency.p50_ms)?;
        writeln!(f, "  P95:        {:8.2} ms", self.latency.p95_ms)?;
        writeln!(f, "  P99:        {:8.2} ms", self.latency.p99_ms)?;
        writeln!(f, "  Throughput: {:8.1} images/second", self.throughput)?;
        writeln!(f, "  Prediction: {}", self.predicted_label)
    }
}

/// Latency statistics from benchmark
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Mean latency in milliseconds
    pub mean_ms: f64,
    /// Standard deviation in milliseconds
    pub std_ms: f64,
    /// Minimum latency
    pub min_ms: f64,
    /// Maximum latency
    pub max_ms: f64,
    /// Median (50th percentile)
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
}

impl LatencyStats {
    /// Calculate statistics from a list of durations
    pub fn from_durations(durations: &[Duration]) -> Self {
        if durations.is_empty() {
            return Self::default();
        }

        let mut times_ms: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        times_ms.sort_by(f64::total_cmp);

        let n = times_ms.len();
        let mean = times_ms.iter().sum::<f64>() / n as f64;
        let variance = times_ms.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n as f64;

        Self {
            mean_ms: mean,
            std_ms: variance.sqrt(),
            min_ms: times_ms[0],
            max_ms: times_ms[n - 1],
            p50_ms: percentile(&times_ms, 50.0),
            p95_ms: percentile(&times_ms, 95.0),
            p99_ms: percentile(&times_ms, 99.0),
        }
    }
}

/// Nearest-rank percentile of sorted data
fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_data.len() - 1) as f64).round() as usize;
    sorted_data[idx.min(sorted_data.len() - 1)]
}

/// Timer utility for benchmarking
pub struct Timer {
    start: Instant,
    times: Vec<Duration>,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            times: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        self.start = Instant::now();
    }

    /// Stop timing and record the duration
    pub fn stop(&mut self) -> Duration {
        let elapsed = self.start.elapsed();
        self.times.push(elapsed);
        elapsed
    }

    pub fn times(&self) -> &[Duration] {
        &self.times
    }

    pub fn stats(&self) -> LatencyStats {
        LatencyStats::from_durations(&self.times)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Time repeated predictions of `image`
pub fn benchmark_predictor<B: Backend>(
    predictor: &FusionPredictor<B>,
    image: &DynamicImage,
    config: BenchmarkConfig,
) -> Result<BenchmarkResult> {
    if config.iterations == 0 {
        return Err(FusionError::Config("benchmark needs at least one iteration".to_string()));
    }

    info!(
        "Benchmarking {} iterations after {} warmup",
        config.iterations, config.warmup_iterations
    );

    for _ in 0..config.warmup_iterations {
        predictor.predict(image)?;
    }

    let mut timer = Timer::new();
    let mut last_label = String::new();
    for i in 0..config.iterations {
        timer.start();
        let result = predictor.predict(image)?;
        let elapsed = timer.stop();
        if config.verbose {
            debug!("Iteration {}: {:.2} ms", i, elapsed.as_secs_f64() * 1000.0);
        }
        last_label = result.predicted_label;
    }

    let backend = predictor.info().backend;
    Ok(BenchmarkResult::from_timings(timer.times(), config, backend, last_label))
}
