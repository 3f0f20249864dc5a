// ONNX Runtime capability provider: detector + recognizer on one backend

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::core::config::{Config, DetectionConfig};
use crate::core::types::Backend;
use crate::services::capabilities::{Capabilities, CapabilityProvider};
use crate::services::detection::OnnxTextDetector;
use crate::services::ocr::OnnxTextRecognizer;
use crate::services::onnx_builder;

pub struct OnnxCapabilityProvider {
    detection: DetectionConfig,
    recognition_model_dir: PathBuf,
}

impl OnnxCapabilityProvider {
    pub fn new(detection: DetectionConfig, recognition_model_dir: PathBuf) -> Self {
        Self {
            detection,
            recognition_model_dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.detection.clone(),
            config.recognition.model_dir.clone(),
        )
    }
}

impl CapabilityProvider for OnnxCapabilityProvider {
    fn probe_backend(&self, backend: Backend) -> bool {
        onnx_builder::backend_available(backend)
    }

    /// Missing or unloadable models do not fail the open: the detector then
    /// reports itself unavailable (whole-page fallback) and the recognizer
    /// fails each region.
    fn open(&self, backend: Backend) -> anyhow::Result<Capabilities> {
        let start = Instant::now();

        let detector = OnnxTextDetector::load(self.detection.clone(), backend);
        let recognizer = OnnxTextRecognizer::load(&self.recognition_model_dir, backend);

        if !detector.is_available() {
            warn!("⚠️  Text detector unavailable, pages will be read whole");
        }
        if !recognizer.is_available() {
            warn!("⚠️  Text recognizer unavailable, every region will fail");
        }

        info!(
            "✓ Models ready on {} in {:.0}ms",
            backend,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(Capabilities::new(Arc::new(detector), Arc::new(recognizer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{DetectionError, RecognitionError};
    use image::DynamicImage;

    #[test]
    fn test_cpu_always_probes_available() {
        let provider = OnnxCapabilityProvider::from_config(&Config::default());
        assert!(provider.probe_backend(Backend::Cpu));
    }

    #[test]
    fn test_open_without_models_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.detection.model_path = dir.path().join("detector.onnx");
        config.recognition.model_dir = dir.path().to_path_buf();

        let capabilities = OnnxCapabilityProvider::from_config(&config)
            .open(Backend::Cpu)
            .unwrap();
        let page = DynamicImage::new_rgb8(32, 32);
        assert!(matches!(
            capabilities.detector.detect(&page),
            Err(DetectionError::Unavailable(_))
        ));
        assert!(matches!(
            capabilities.recognizer.recognize(&page),
            Err(RecognitionError::Unavailable(_))
        ));
    }
}
