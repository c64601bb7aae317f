//! One-time predictor construction shared between request handlers
//!
//! The first caller of [`SharedPredictor::get`] builds the predictor while
//! holding the guard; concurrent first callers wait and then receive a clone of
//! the same instance. A failed construction is stored and returned to every
//! later caller instead of being retried.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use burn::tensor::backend::Backend;
use tracing::{error, info};

use super::predictor::{FusionPredictor, PredictorConfig};
use crate::backend::DeviceSelection;
use crate::utils::error::{FusionError, Result};

type Slot<B> = Option<Result<FusionPredictor<B>>>;

/// Lazily constructed, process-wide predictor handle
pub struct SharedPredictor<B: Backend> {
    config: PredictorConfig,
    selection: DeviceSelection<B>,
    slot: Mutex<Slot<B>>,
    constructions: AtomicUsize,
}

impl<B: Backend> SharedPredictor<B> {
    /// Nothing is built until the first [`get`](Self::get)
    pub fn new(config: PredictorConfig, selection: DeviceSelection<B>) -> Self {
        Self {
            config,
            selection,
            slot: Mutex::new(None),
            constructions: AtomicUsize::new(0),
        }
    }

    /// The shared predictor, constructing it on first use
    pub fn get(&self) -> Result<FusionPredictor<B>> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| FusionError::Construction("predictor guard poisoned".to_string()))?;

        let built = slot.get_or_insert_with(|| {
            self.constructions.fetch_add(1, Ordering::SeqCst);
            info!("Constructing shared predictor");
            let result = FusionPredictor::new(self.config.clone(), self.selection.clone());
            if let Err(e) = &result {
                error!("Predictor construction failed: {}", e);
            }
            result
        });

        built.clone()
    }

    /// Whether construction has been attempted
    pub fn is_initialized(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Number of construction attempts so far (at most one)
    pub fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn cpu() -> DeviceSelection<TestBackend> {
        DeviceSelection::explicit(Default::default(), "NdArray (CPU)", false)
    }

    #[test]
    fn test_construction_is_deferred_and_single() {
        let dir = TempDir::new().unwrap();
        let config = PredictorConfig::compact()
            .with_weights_path(dir.path().join("absent"))
            .with_shape_cache(None);
        let shared = SharedPredictor::new(config, cpu());

        assert!(!shared.is_initialized());
        assert_eq!(shared.construction_count(), 0);

        shared.get().unwrap();
        shared.get().unwrap();
        assert!(shared.is_initialized());
        assert_eq!(shared.construction_count(), 1);
    }

    #[test]
    fn test_failure_is_remembered() {
        let mut config = PredictorConfig::compact().with_shape_cache(None);
        config.class_labels.clear();
        let shared = SharedPredictor::new(config, cpu());

        let first = shared.get().unwrap_err();
        let second = shared.get().unwrap_err();
        assert_eq!(first, second);
        assert!(first.is_construction());
        assert_eq!(shared.construction_count(), 1);
    }
}
