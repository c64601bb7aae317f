//! Error Handling Module
//!
//! Defines the error taxonomy for the fusion pipeline.
//! Uses thiserror for ergonomic error definitions.
//!
//! Construction-time failures (`Construction`, `ShapeMismatch`, `Config`) abort
//! predictor startup. Per-request failures (`Preprocess`, `Inference`) are
//! returned to the caller with enough context to tell them apart.

use thiserror::Error;

use crate::model::branches::Branch;
use crate::transforms::TransformKind;

/// Main error type for fusion pipeline operations
///
/// The type is `Clone` so a failed one-time construction can be handed to
/// every later caller of a shared predictor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    /// Backbone construction, weight decode or saved/constructed parameter mismatch
    #[error("Construction error: {0}")]
    Construction(String),

    /// Branch feature maps disagree on spatial resolution during the dry run
    #[error(
        "Shape mismatch: branch {branch} produced {found:?} feature map, expected {expected:?}"
    )]
    ShapeMismatch {
        branch: Branch,
        expected: [usize; 2],
        found: [usize; 2],
    },

    /// A transform could not process the input image
    #[error("Preprocess error in {transform} transform: {reason}")]
    Preprocess {
        transform: TransformKind,
        reason: String,
    },

    /// The forward pass produced unusable output
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Writing the weight store failed
    #[error("Persist error: {0}")]
    Persist(String),
}

impl FusionError {
    /// Whether this error happened while building the predictor
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            FusionError::Construction(_) | FusionError::ShapeMismatch { .. } | FusionError::Config(_)
        )
    }

    /// Shorthand for a preprocessing failure in one transform
    pub fn preprocess(transform: TransformKind, reason: impl Into<String>) -> Self {
        FusionError::Preprocess {
            transform,
            reason: reason.into(),
        }
    }
}

/// Convenience Result type for fusion pipeline operations
pub type Result<T> = std::result::Result<T, FusionError>;
