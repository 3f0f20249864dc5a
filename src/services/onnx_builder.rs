// Shared ONNX Runtime session builder bound to an explicit execution backend

use anyhow::{Context, Result};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::{builder::GraphOptimizationLevel, Session};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::core::types::Backend;

#[cfg(feature = "cuda")]
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

#[cfg(all(target_os = "macos", feature = "coreml"))]
use ort::execution_providers::{CoreMLExecutionProvider, ExecutionProvider as _};

/// Calculate optimal thread count for ONNX Runtime CPU inference.
///
/// Windows is capped at 6 threads; past that, synchronization overhead
/// outweighs the extra cores.
fn optimal_intra_op_threads() -> usize {
    let total_cores = num_cpus::get();

    #[cfg(target_os = "windows")]
    let optimal = std::cmp::min(6, total_cores).max(1);

    #[cfg(not(target_os = "windows"))]
    let optimal = total_cores.max(1);

    debug!("CPU threads: {} total cores, using {} for inference", total_cores, optimal);
    optimal
}

/// Whether `backend` can run on this machine with the features compiled in.
pub fn backend_available(backend: Backend) -> bool {
    match backend {
        Backend::Cpu => true,
        Backend::Cuda => cuda_available(),
        Backend::CoreMl => coreml_available(),
    }
}

#[cfg(feature = "cuda")]
fn cuda_available() -> bool {
    CUDAExecutionProvider::default()
        .is_available()
        .unwrap_or(false)
}

#[cfg(not(feature = "cuda"))]
fn cuda_available() -> bool {
    false
}

#[cfg(all(target_os = "macos", feature = "coreml"))]
fn coreml_available() -> bool {
    CoreMLExecutionProvider::default()
        .is_available()
        .unwrap_or(false)
}

#[cfg(not(all(target_os = "macos", feature = "coreml")))]
fn coreml_available() -> bool {
    false
}

/// Accelerated providers fail the build instead of silently running on CPU,
/// so the backend recorded for a run is the one actually used.
fn execution_provider(backend: Backend) -> Result<ExecutionProviderDispatch> {
    match backend {
        Backend::Cpu => Ok(CPUExecutionProvider::default().build()),

        #[cfg(feature = "cuda")]
        Backend::Cuda => Ok(CUDAExecutionProvider::default().build().error_on_failure()),
        #[cfg(not(feature = "cuda"))]
        Backend::Cuda => {
            anyhow::bail!("CUDA backend not available. Rebuild with: cargo build --features cuda")
        }

        #[cfg(all(target_os = "macos", feature = "coreml"))]
        Backend::CoreMl => Ok(CoreMLExecutionProvider::default().build().error_on_failure()),
        #[cfg(not(all(target_os = "macos", feature = "coreml")))]
        Backend::CoreMl => anyhow::bail!(
            "CoreML backend not available. Rebuild with: cargo build --features coreml (macOS only)"
        ),
    }
}

/// Build an ONNX Runtime session for the model at `model_path` on `backend`.
pub fn build_session(model_path: &Path, backend: Backend, model_name: &str) -> Result<Session> {
    if !model_path.exists() {
        anyhow::bail!("{} model not found at: {}", model_name, model_path.display());
    }

    let session = Session::builder()
        .context(format!("Failed to create ONNX session builder for {}", model_name))?
        .with_execution_providers([execution_provider(backend)?])
        .context(format!("Failed to configure {} execution provider for {}", backend, model_name))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context(format!("Failed to set graph optimization level for {}", model_name))?
        .with_intra_threads(optimal_intra_op_threads())
        .context(format!("Failed to configure intra-op threads for {}", model_name))?
        .with_inter_threads(1)
        .context(format!("Failed to configure inter-op threads for {}", model_name))?
        .commit_from_file(model_path)
        .context(format!(
            "Failed to load {} ONNX model from {}",
            model_name,
            model_path.display()
        ))?;

    info!("✓ {} model loaded on {} ({})", model_name, backend, model_path.display());
    Ok(session)
}

/// A model session, or the reason it could not be loaded.
pub enum ModelSlot {
    Ready(Mutex<Session>),
    Unavailable(String),
}

impl ModelSlot {
    /// Load a model, keeping the failure as data instead of an error.
    pub fn load(model_path: &Path, backend: Backend, model_name: &str) -> Self {
        match build_session(model_path, backend, model_name) {
            Ok(session) => ModelSlot::Ready(Mutex::new(session)),
            Err(e) => {
                warn!("⚠️  {} model unavailable: {:#}", model_name, e);
                ModelSlot::Unavailable(format!("{:#}", e))
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ModelSlot::Ready(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_always_available() {
        assert!(backend_available(Backend::Cpu));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_unavailable_without_feature() {
        assert!(!backend_available(Backend::Cuda));
        assert!(execution_provider(Backend::Cuda).is_err());
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let slot = ModelSlot::load(&dir.path().join("absent.onnx"), Backend::Cpu, "detector");
        match slot {
            ModelSlot::Unavailable(reason) => assert!(reason.contains("not found")),
            ModelSlot::Ready(_) => panic!("missing model must not load"),
        }
    }
}
