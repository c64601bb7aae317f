//! Backend abstraction - Multi-backend support
//!
//! Supports both CUDA (GPU) and NdArray (CPU) backends. The accelerator is
//! used when the crate is built with the `cuda` feature, otherwise inference
//! runs on the CPU backend.

use burn::tensor::backend::Backend;

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (preferred) or NdArray (fallback)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type InferenceBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type InferenceBackend = burn_ndarray::NdArray;

/// Device type of the selected backend
pub type InferenceDevice = <InferenceBackend as Backend>::Device;

/// Get the default device
pub fn default_device() -> InferenceDevice {
    InferenceDevice::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(not(feature = "cuda"))]
    {
        "NdArray (CPU)"
    }
}

/// Check if GPU acceleration is compiled in
pub fn has_gpu() -> bool {
    cfg!(feature = "cuda")
}

/// Device chosen at predictor construction
#[derive(Debug, Clone)]
pub struct DeviceSelection<B: Backend> {
    pub device: B::Device,
    pub backend_name: String,
    pub accelerated: bool,
}

impl DeviceSelection<InferenceBackend> {
    /// Pick the accelerator when available, otherwise the CPU backend
    pub fn detect() -> Self {
        let selection = Self {
            device: default_device(),
            backend_name: backend_name().to_string(),
            accelerated: has_gpu(),
        };
        tracing::info!(
            "Selected backend {} (device {:?})",
            selection.backend_name,
            selection.device
        );
        selection
    }
}

impl<B: Backend> DeviceSelection<B> {
    /// Use an explicit device on any backend
    pub fn explicit(device: B::Device, backend_name: &str, accelerated: bool) -> Self {
        Self {
            device,
            backend_name: backend_name.to_string(),
            accelerated,
        }
    }
}
