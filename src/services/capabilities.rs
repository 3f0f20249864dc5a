// Capability boundary: text detection, text recognition, backend probing

use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::errors::{DetectionResult, RecognitionResult};
use crate::core::types::{Backend, BackendPreference, BackendSelection, RecognizedText, Region};

/// Finds text-bearing regions on a page.
///
/// `Err(DetectionError::Unavailable)` means the capability cannot run at all
/// (missing model) and the page should be read whole. Any other error is a
/// failure for this image only.
pub trait TextDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> DetectionResult<Vec<Region>>;
}

/// Reads the text inside one cropped region.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, crop: &DynamicImage) -> RecognitionResult<RecognizedText>;
}

/// Handles owned by a single run, released when the run ends.
#[derive(Clone)]
pub struct Capabilities {
    pub detector: Arc<dyn TextDetector>,
    pub recognizer: Arc<dyn TextRecognizer>,
}

impl Capabilities {
    pub fn new(detector: Arc<dyn TextDetector>, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            detector,
            recognizer,
        }
    }
}

/// Source of capabilities bound to an execution backend.
pub trait CapabilityProvider: Send + Sync {
    /// Whether `backend` can be used on this machine.
    fn probe_backend(&self, backend: Backend) -> bool;

    /// Build run-scoped capabilities on `backend`.
    fn open(&self, backend: Backend) -> anyhow::Result<Capabilities>;
}

/// Walk `preference` in order and take the first backend the provider
/// accepts. CPU is tried last even when not listed and is assumed to work
/// if its probe fails too.
///
/// Only an explicit preference can be downgraded: under `Auto` the
/// requested backend is whatever resolved.
pub fn select_backend(
    provider: &dyn CapabilityProvider,
    preference: &BackendPreference,
) -> BackendSelection {
    let mut candidates: Vec<Backend> = preference.candidates().to_vec();
    if !candidates.contains(&Backend::Cpu) {
        candidates.push(Backend::Cpu);
    }

    let resolved = candidates
        .iter()
        .copied()
        .find(|&backend| {
            let available = provider.probe_backend(backend);
            debug!("Backend {} available: {}", backend, available);
            available
        })
        .unwrap_or(Backend::Cpu);

    let requested = match preference {
        BackendPreference::Auto => resolved,
        BackendPreference::Explicit(list) => list.first().copied().unwrap_or(Backend::Cpu),
    };
    let downgraded = resolved != requested;
    if downgraded {
        warn!(
            "Requested backend {} unavailable, using {}",
            requested, resolved
        );
    }

    BackendSelection {
        requested,
        resolved,
        downgraded,
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted capability doubles for tests.

    use super::*;
    use crate::core::errors::{DetectionError, RecognitionError};
    use parking_lot::Mutex;

    type DetectFn = dyn Fn(&DynamicImage) -> DetectionResult<Vec<Region>> + Send + Sync;
    type RecognizeFn = dyn Fn(&DynamicImage) -> RecognitionResult<RecognizedText> + Send + Sync;

    pub struct ScriptedDetector(Box<DetectFn>);

    impl ScriptedDetector {
        pub fn new(
            f: impl Fn(&DynamicImage) -> DetectionResult<Vec<Region>> + Send + Sync + 'static,
        ) -> Self {
            Self(Box::new(f))
        }

        pub fn returning(regions: Vec<Region>) -> Self {
            Self::new(move |_| Ok(regions.clone()))
        }

        pub fn unavailable() -> Self {
            Self::new(|_| Err(DetectionError::Unavailable("no model".into())))
        }
    }

    impl TextDetector for ScriptedDetector {
        fn detect(&self, image: &DynamicImage) -> DetectionResult<Vec<Region>> {
            (self.0)(image)
        }
    }

    pub struct ScriptedRecognizer(Box<RecognizeFn>);

    impl ScriptedRecognizer {
        pub fn new(
            f: impl Fn(&DynamicImage) -> RecognitionResult<RecognizedText> + Send + Sync + 'static,
        ) -> Self {
            Self(Box::new(f))
        }

        /// Reports the crop size as text: `"<w>x<h>"`.
        pub fn echo_size() -> Self {
            Self::new(|crop| {
                Ok(RecognizedText::new(
                    format!("{}x{}", crop.width(), crop.height()),
                    0.9,
                ))
            })
        }

        pub fn failing() -> Self {
            Self::new(|_| Err(RecognitionError::Failed("scripted failure".into())))
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize(&self, crop: &DynamicImage) -> RecognitionResult<RecognizedText> {
            (self.0)(crop)
        }
    }

    pub fn capabilities(detector: ScriptedDetector, recognizer: ScriptedRecognizer) -> Capabilities {
        Capabilities::new(Arc::new(detector), Arc::new(recognizer))
    }

    /// Provider with a fixed set of available backends.
    pub struct FixedProvider {
        pub available: Vec<Backend>,
        pub capabilities: Capabilities,
        pub fail_open: bool,
        pub opened: Mutex<Vec<Backend>>,
    }

    impl FixedProvider {
        pub fn new(available: Vec<Backend>, capabilities: Capabilities) -> Self {
            Self {
                available,
                capabilities,
                fail_open: false,
                opened: Mutex::new(Vec::new()),
            }
        }
    }

    impl CapabilityProvider for FixedProvider {
        fn probe_backend(&self, backend: Backend) -> bool {
            self.available.contains(&backend)
        }

        fn open(&self, backend: Backend) -> anyhow::Result<Capabilities> {
            self.opened.lock().push(backend);
            if self.fail_open {
                anyhow::bail!("scripted open failure");
            }
            Ok(self.capabilities.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    fn provider(available: Vec<Backend>) -> FixedProvider {
        FixedProvider::new(
            available,
            capabilities(ScriptedDetector::returning(vec![]), ScriptedRecognizer::echo_size()),
        )
    }

    fn explicit(list: &[Backend]) -> BackendPreference {
        BackendPreference::Explicit(list.to_vec())
    }

    #[test]
    fn test_first_available_backend_wins() {
        let selection = select_backend(
            &provider(vec![Backend::Cuda, Backend::Cpu]),
            &explicit(&Backend::DEFAULT_PREFERENCE),
        );
        assert_eq!(selection.resolved, Backend::Cuda);
        assert!(!selection.downgraded);
    }

    #[test]
    fn test_downgrade_is_recorded() {
        let selection = select_backend(
            &provider(vec![Backend::CoreMl, Backend::Cpu]),
            &explicit(&Backend::DEFAULT_PREFERENCE),
        );
        assert_eq!(selection.requested, Backend::Cuda);
        assert_eq!(selection.resolved, Backend::CoreMl);
        assert!(selection.downgraded);
    }

    #[test]
    fn test_auto_on_cpu_only_machine_is_not_a_downgrade() {
        let selection = select_backend(&provider(vec![Backend::Cpu]), &BackendPreference::Auto);
        assert_eq!(selection.requested, Backend::Cpu);
        assert_eq!(selection.resolved, Backend::Cpu);
        assert!(!selection.downgraded);
    }

    #[test]
    fn test_cpu_appended_when_not_listed() {
        let selection = select_backend(&provider(vec![Backend::Cpu]), &explicit(&[Backend::Cuda]));
        assert_eq!(selection.resolved, Backend::Cpu);
        assert!(selection.downgraded);
    }

    #[test]
    fn test_cpu_assumed_when_nothing_probes() {
        let selection = select_backend(&provider(vec![]), &explicit(&[Backend::Cpu]));
        assert_eq!(selection.resolved, Backend::Cpu);
        assert!(!selection.downgraded);
    }
}
