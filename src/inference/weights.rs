//! Weight store
//!
//! Weights are persisted with Burn's `CompactRecorder` (named MessagePack,
//! half precision). The recorder adds the `.mpk` extension to whatever path it
//! is given, so callers pass the stem (e.g. `models/fusionnet_best`).
//!
//! Burn does not reliably reject a record whose tensor shapes differ from the
//! module, so after loading, every float parameter is compared in visitation
//! order against the freshly constructed module.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use burn::{
    module::{Module, ModuleVisitor, Param},
    record::{CompactRecorder, Recorder},
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::utils::error::{FusionError, Result};

/// File extension written by the recorder
pub const WEIGHTS_EXTENSION: &str = "mpk";

/// Where the parameters of a predictor came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum WeightSource {
    /// Decoded from a weight file
    Loaded(PathBuf),
    /// No weight file was found; parameters are randomly initialized
    RandomInit,
}

impl WeightSource {
    /// Whether the predictor runs without trained weights
    pub fn is_degraded(&self) -> bool {
        matches!(self, WeightSource::RandomInit)
    }
}

impl std::fmt::Display for WeightSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightSource::Loaded(path) => write!(f, "loaded from {}", path.display()),
            WeightSource::RandomInit => f.write_str("random initialization"),
        }
    }
}

/// Path of the file the recorder reads or writes for `path`
pub fn weights_file(path: &Path) -> PathBuf {
    path.with_extension(WEIGHTS_EXTENSION)
}

/// Collects float parameter shapes in visitation order
#[derive(Default)]
struct ParamShapes {
    shapes: Vec<Vec<usize>>,
}

impl<B: Backend> ModuleVisitor<B> for ParamShapes {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        self.shapes.push(param.val().dims().to_vec());
    }
}

/// Shapes of every float parameter of `module`, in visitation order
pub fn param_shapes<B: Backend, M: Module<B>>(module: &M) -> Vec<Vec<usize>> {
    let mut visitor = ParamShapes::default();
    module.visit(&mut visitor);
    visitor.shapes
}

/// Fail with `Construction` on the first differing parameter shape
pub fn check_param_shapes(expected: &[Vec<usize>], loaded: &[Vec<usize>]) -> Result<()> {
    if expected.len() != loaded.len() {
        return Err(FusionError::Construction(format!(
            "weight file holds {} parameters, model has {}",
            loaded.len(),
            expected.len()
        )));
    }

    for (ordinal, (want, got)) in expected.iter().zip(loaded).enumerate() {
        if want != got {
            return Err(FusionError::Construction(format!(
                "parameter #{} has shape {:?} in the weight file, model expects {:?}",
                ordinal, got, want
            )));
        }
    }

    Ok(())
}

/// Load `path` into `module`, or keep its random initialization when no file exists
pub fn load_weights<B: Backend, M: Module<B>>(
    module: M,
    path: &Path,
    device: &B::Device,
) -> Result<(M, WeightSource)> {
    let file = weights_file(path);
    if !file.exists() {
        warn!(
            "Weight file {:?} not found; running with randomly initialized weights (degraded mode)",
            file
        );
        return Ok((module, WeightSource::RandomInit));
    }

    let expected = param_shapes::<B, M>(&module);
    let record: M::Record =
        <CompactRecorder as Recorder<B>>::load(&CompactRecorder::new(), path.to_path_buf(), device)
            .map_err(|e| FusionError::Construction(format!("failed to load {:?}: {:?}", file, e)))?;

    // Some record/module combinations panic inside burn instead of returning an error
    let loaded = panic::catch_unwind(AssertUnwindSafe(|| module.load_record(record)))
        .map_err(|_| {
            FusionError::Construction(format!("weight file {:?} does not fit the model", file))
        })?;
    check_param_shapes(&expected, &param_shapes::<B, M>(&loaded))?;

    info!("Loaded weights from {:?}", file);
    Ok((loaded, WeightSource::Loaded(file)))
}

/// Persist `module` in the format `load_weights` reads; returns the written file
pub fn save_weights<B: Backend, M: Module<B>>(module: &M, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            FusionError::Persist(format!("cannot create directory {:?}: {}", parent, e))
        })?;
    }

    module
        .clone()
        .save_file(path.to_path_buf(), &CompactRecorder::new())
        .map_err(|e| FusionError::Persist(format!("failed to save {:?}: {:?}", path, e)))?;

    let file = weights_file(path);
    info!("Saved weights to {:?}", file);
    Ok(file)
}
