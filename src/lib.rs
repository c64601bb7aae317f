//! # Leaf Fusion
//!
//! Cassava leaf disease classification with a multi-transform, multi-backbone
//! mid-fusion network built on the Burn framework.
//!
//! ## Pipeline
//!
//! - **Transforms**: DCT, STFT magnitude, Haar approximation and a learnable
//!   frequency mask, each mapping an image of any size to `[3, 224, 224]`
//! - **Branches**: a MobileNetV2-style and a ConvNeXt-style backbone, each run
//!   on all four transform outputs (eight branches, two parameter sets)
//! - **Fusion**: channel concatenation, 1x1 projection to 512, BatchNorm,
//!   ReLU, global average pooling
//! - **Classifier**: dropout and a linear layer, followed by softmax
//!
//! ## Modules
//!
//! - `backend`: compile-time backend and device selection
//! - `transforms`: the frequency transform bank
//! - `model`: backbones, branch extractor, fusion head and configuration
//! - `inference`: predictor, weight store, shared handle, leaf check, benchmark
//! - `utils`: error types, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leaf_fusion::backend::{DeviceSelection, InferenceBackend};
//! use leaf_fusion::inference::{FusionPredictor, PredictorConfig};
//!
//! let predictor = FusionPredictor::<InferenceBackend>::new(
//!     PredictorConfig::default(),
//!     DeviceSelection::detect(),
//! )?;
//! let result = predictor.predict(&image::open("leaf.jpg")?)?;
//! println!("{}", result.display());
//! ```

pub mod backend;
pub mod inference;
pub mod model;
pub mod transforms;
pub mod utils;

// Re-export commonly used items for convenience
pub use backend::{DeviceSelection, InferenceBackend};
pub use inference::{
    FusionPredictor, LeafCheck, ModelInfo, PredictionResult, PredictorConfig, SharedPredictor,
    WeightSource,
};
pub use model::{MidFusionNet, MidFusionNetConfig};
pub use transforms::{TransformBank, TransformKind};
pub use utils::error::{FusionError, Result};

/// Cassava disease classes, in class-index order
pub const CLASS_NAMES: [&str; 5] = [
    "Cassava Bacterial Blight (CBB)",
    "Cassava Brown Streak Disease (CBSD)",
    "Cassava Green Mottle (CGM)",
    "Cassava Mosaic Disease (CMD)",
    "Healthy",
];

/// Number of cassava classes
pub const NUM_CLASSES: usize = CLASS_NAMES.len();

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
