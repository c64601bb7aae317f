//! Persisted fusion-shape cache
//!
//! Stores the geometry measured by the dry run together with the backbone
//! signature it was measured for. A later construction with the same
//! signature reuses the entry instead of running the branches again. Nothing
//! here is fatal: unreadable or stale entries just mean another dry run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::branches::{FusionShape, BRANCHES};

/// One cached measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeCacheEntry {
    pub signature: serde_json::Value,
    pub shape: FusionShape,
    pub created_at: String,
}

/// File-backed cache for a single fusion shape
#[derive(Debug, Clone)]
pub struct ShapeCache {
    path: PathBuf,
}

impl ShapeCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached shape for `signature`, if present and consistent
    pub fn lookup(&self, signature: &serde_json::Value) -> Option<FusionShape> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) => {
                debug!("No shape cache at {:?}: {}", self.path, e);
                return None;
            }
        };

        let entry: ShapeCacheEntry = match serde_json::from_str(&json) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring unreadable shape cache {:?}: {}", self.path, e);
                return None;
            }
        };

        if &entry.signature != signature {
            debug!("Shape cache {:?} was measured for other backbones", self.path);
            return None;
        }

        if entry.shape.branch_channels.len() != BRANCHES.len() {
            warn!(
                "Ignoring shape cache {:?}: {} branch entries, expected {}",
                self.path,
                entry.shape.branch_channels.len(),
                BRANCHES.len()
            );
            return None;
        }

        Some(entry.shape)
    }

    /// Write the measured shape; failures are logged and swallowed
    pub fn store(&self, signature: serde_json::Value, shape: &FusionShape) {
        let entry = ShapeCacheEntry {
            signature,
            shape: shape.clone(),
            created_at: chrono::Local::now().to_rfc3339(),
        };

        let result = serde_json::to_string_pretty(&entry)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                std::fs::write(&self.path, json).map_err(|e| e.to_string())
            });

        match result {
            Ok(()) => debug!("Wrote shape cache {:?}", self.path),
            Err(e) => warn!("Could not write shape cache {:?}: {}", self.path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_shape() -> FusionShape {
        FusionShape {
            branch_channels: vec![16, 16, 16, 16, 24, 24, 24, 24],
            height: 14,
            width: 14,
        }
    }

    #[test]
    fn test_store_then_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = ShapeCache::new(dir.path().join("nested").join("shape.json"));
        let signature = json!({"input_size": 224});

        assert!(cache.lookup(&signature).is_none());
        cache.store(signature.clone(), &sample_shape());
        assert_eq!(cache.lookup(&signature), Some(sample_shape()));
    }

    #[test]
    fn test_signature_mismatch_misses() {
        let dir = TempDir::new().unwrap();
        let cache = ShapeCache::new(dir.path().join("shape.json"));
        cache.store(json!({"input_size": 224}), &sample_shape());

        assert!(cache.lookup(&json!({"input_size": 192})).is_none());
    }

    #[test]
    fn test_corrupt_file_misses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shape.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = ShapeCache::new(&path);
        assert!(cache.lookup(&json!({})).is_none());
    }

    #[test]
    fn test_wrong_branch_count_misses() {
        let dir = TempDir::new().unwrap();
        let cache = ShapeCache::new(dir.path().join("shape.json"));
        let signature = json!({"input_size": 224});
        let shape = FusionShape {
            branch_channels: vec![16; 4],
            height: 14,
            width: 14,
        };
        cache.store(signature.clone(), &shape);

        assert!(cache.lookup(&signature).is_none());
    }
}
