// Pipeline orchestrator: backend selection, page scheduling, failure policy

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{ArchiveError, PipelineError, PipelineResult};
use crate::core::types::{BackendPreference, PageResult, PageSource, PageStatus, PipelineReport};
use crate::phases::page_processor::PageProcessor;
use crate::phases::reading_order::SortOptions;
use crate::services::capabilities::{select_backend, CapabilityProvider};

/// Run-level cancellation signal, checked before each page is pulled.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run policy, resolved from configuration.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Record failed pages and continue (`true`) or abort on the first one
    pub skip_errors: bool,
    pub backend_preference: BackendPreference,
    pub sort: SortOptions,
    /// Upper bound on pages (and decoded page images) in flight
    pub max_concurrent_pages: usize,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            skip_errors: true,
            backend_preference: BackendPreference::Auto,
            sort: SortOptions::default(),
            max_concurrent_pages: 1,
        }
    }
}

impl RunPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            skip_errors: config.skip_errors(),
            backend_preference: config.backend_preference().clone(),
            sort: SortOptions::from_config(config),
            max_concurrent_pages: config.max_concurrent_pages(),
        }
    }
}

/// Called once per finished page, in page order.
pub type ProgressCallback = Box<dyn Fn(&PageResult) + Send + Sync>;

/// Drives one run over a page sequence.
pub struct PipelineOrchestrator {
    policy: RunPolicy,
    progress: Option<ProgressCallback>,
}

impl PipelineOrchestrator {
    pub fn new(policy: RunPolicy) -> Self {
        Self {
            policy,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: impl Fn(&PageResult) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Process `pages` in order and build the run's report.
    ///
    /// The backend is resolved once and the capabilities opened on it are
    /// dropped when the run ends, whichever way it ends. Pages run on the
    /// blocking pool, at most `max_concurrent_pages` at a time, and are
    /// reported in page order regardless of completion order.
    ///
    /// # Errors
    /// - `Archive` if the page sequence yields an error (no partial report)
    /// - `CapabilityInit` if the provider cannot open the resolved backend
    /// - `Aborted` on the first failed page when `skip_errors` is off; it
    ///   carries the pages completed before the failure
    ///
    /// On either failure no further pages are pulled and the pages already
    /// in flight are awaited and discarded before returning.
    ///
    /// Cancellation is not an error: the report comes back with
    /// `summary.cancelled` set and only the pages finished before it.
    #[instrument(skip_all, fields(source = %source))]
    pub async fn run<I>(
        &self,
        source: &str,
        pages: I,
        provider: &dyn CapabilityProvider,
        cancel: &CancelFlag,
    ) -> PipelineResult<PipelineReport>
    where
        I: IntoIterator<Item = Result<PageSource, ArchiveError>>,
    {
        let start = Instant::now();
        let selection = select_backend(provider, &self.policy.backend_preference);
        info!(
            "Backend: {} (requested {}{})",
            selection.resolved,
            selection.requested,
            if selection.downgraded { ", downgraded" } else { "" }
        );

        let capabilities =
            provider
                .open(selection.resolved)
                .map_err(|e| PipelineError::CapabilityInit {
                    backend: selection.resolved.to_string(),
                    reason: format!("{:#}", e),
                })?;
        let processor = Arc::new(PageProcessor::new(capabilities, self.policy.sort));

        // Stop pulling pages once cancelled or halted; in-flight pages still finish
        let stopped_early = Arc::new(AtomicBool::new(false));
        let halted = Arc::new(AtomicBool::new(false));
        let mut page_iter = pages.into_iter();
        let gated = {
            let cancel = cancel.clone();
            let stopped_early = Arc::clone(&stopped_early);
            let halted = Arc::clone(&halted);
            std::iter::from_fn(move || {
                if halted.load(Ordering::SeqCst) {
                    return None;
                }
                if cancel.is_cancelled() {
                    stopped_early.store(true, Ordering::SeqCst);
                    return None;
                }
                page_iter.next()
            })
        };

        let mut results = stream::iter(gated)
            .map(|item| {
                let processor = Arc::clone(&processor);
                async move {
                    let page = item?;
                    let (filename, page_number) = (page.filename.clone(), page.page_number);
                    let result =
                        match tokio::task::spawn_blocking(move || processor.process(&page)).await {
                            Ok(result) => result,
                            Err(join_error) => {
                                error!("Page {} ({}) task panicked: {}", page_number, filename, join_error);
                                PageResult::failed(
                                    filename,
                                    page_number,
                                    format!("page task panicked: {}", join_error),
                                    0.0,
                                )
                            }
                        };
                    Ok::<PageResult, ArchiveError>(result)
                }
            })
            .buffered(self.policy.max_concurrent_pages.max(1));

        let mut completed: Vec<PageResult> = Vec::new();
        let mut failure: Option<PipelineError> = None;
        while let Some(item) = results.next().await {
            let result = match item {
                Ok(result) => result,
                Err(e) => {
                    error!("Archive read failed after {} pages: {}", completed.len(), e);
                    failure = Some(PipelineError::Archive(e));
                    break;
                }
            };

            if let Some(progress) = &self.progress {
                progress(&result);
            }

            match result.status {
                PageStatus::Failed if !self.policy.skip_errors => {
                    let reason = result.error.clone().unwrap_or_else(|| "page failed".to_string());
                    error!(
                        "Aborting at page {} ({}): {}",
                        result.page_number, result.filename, reason
                    );
                    let report = PipelineReport::new(
                        source,
                        std::mem::take(&mut completed),
                        selection,
                        false,
                    );
                    failure = Some(PipelineError::Aborted {
                        page_number: result.page_number,
                        filename: result.filename,
                        reason,
                        report: Box::new(report),
                    });
                    break;
                }
                PageStatus::Failed => {
                    warn!("Skipping failed page {} ({})", result.page_number, result.filename)
                }
                _ => debug!("Page {} finished: {}", result.page_number, result.status),
            }
            completed.push(result);
        }

        if let Some(failure) = failure {
            halted.store(true, Ordering::SeqCst);
            let mut discarded = 0usize;
            while results.next().await.is_some() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!("Discarded {} in-flight pages", discarded);
            }
            return Err(failure);
        }

        let cancelled = stopped_early.load(Ordering::SeqCst);
        if cancelled {
            warn!("Run cancelled after {} pages", completed.len());
        }

        let report = PipelineReport::new(source, completed, selection, cancelled);
        let summary = &report.summary;
        info!(
            "✓ Processed {} pages in {:.2}s: {} ok, {} partial, {} failed, {}/{} regions recognized",
            summary.pages_attempted,
            start.elapsed().as_secs_f64(),
            summary.pages_ok,
            summary.pages_partial,
            summary.pages_failed,
            summary.regions_recognized,
            summary.regions_total
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::RecognitionError;
    use crate::core::types::{Backend, RecognizedText, Region};
    use crate::services::capabilities::mock::*;
    use crate::utils::image_ops::encode_png;
    use image::DynamicImage;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn page(page_number: usize, width: u32) -> Result<PageSource, ArchiveError> {
        let png = encode_png(&DynamicImage::new_rgb8(width, 40)).unwrap();
        Ok(PageSource {
            page_number,
            filename: format!("page_{}.png", page_number),
            entry_path: format!("book/page_{}.png", page_number),
            image_bytes: Arc::new(png),
        })
    }

    fn broken_page(page_number: usize) -> Result<PageSource, ArchiveError> {
        Ok(PageSource {
            page_number,
            filename: format!("page_{}.png", page_number),
            entry_path: format!("book/page_{}.png", page_number),
            image_bytes: Arc::new(b"truncated".to_vec()),
        })
    }

    /// Five pages, page 3 undecodable
    fn five_pages_one_broken() -> Vec<Result<PageSource, ArchiveError>> {
        vec![page(1, 50), page(2, 60), broken_page(3), page(4, 70), page(5, 80)]
    }

    fn cpu_provider(recognizer: ScriptedRecognizer) -> FixedProvider {
        FixedProvider::new(
            vec![Backend::Cpu],
            capabilities(ScriptedDetector::returning(vec![]), recognizer),
        )
    }

    fn policy(skip_errors: bool, max_concurrent_pages: usize) -> RunPolicy {
        RunPolicy {
            skip_errors,
            backend_preference: BackendPreference::Explicit(vec![Backend::Cpu]),
            max_concurrent_pages,
            ..RunPolicy::default()
        }
    }

    fn page_numbers(report: &PipelineReport) -> Vec<usize> {
        report.pages.iter().map(|p| p.page_number).collect()
    }

    /// Recognizer that sleeps, then counts the crops it finished.
    fn slow_counting_recognizer(finished: Arc<AtomicUsize>) -> ScriptedRecognizer {
        ScriptedRecognizer::new(move |_| {
            std::thread::sleep(Duration::from_millis(200));
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(RecognizedText::new("late", 1.0))
        })
    }

    async fn assert_nothing_left_running(provider: &FixedProvider, finished: &AtomicUsize) {
        assert_eq!(Arc::strong_count(&provider.capabilities.recognizer), 1);
        let settled = finished.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(finished.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_skip_errors_keeps_every_page() {
        let provider = cpu_provider(ScriptedRecognizer::echo_size());
        let report = PipelineOrchestrator::new(policy(true, 1))
            .run("book.zip", five_pages_one_broken(), &provider, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(page_numbers(&report), vec![1, 2, 3, 4, 5]);
        assert_eq!(report.pages[2].status, PageStatus::Failed);
        assert_eq!(report.summary.pages_attempted, 5);
        assert_eq!(report.summary.pages_failed, 1);
        assert_eq!(report.summary.pages_ok, 4);
        assert_eq!(report.summary.regions_recognized, 4);
        assert!(!report.summary.cancelled);
    }

    #[tokio::test]
    async fn test_strict_mode_aborts_with_partial_report() {
        let provider = cpu_provider(ScriptedRecognizer::echo_size());
        let err = PipelineOrchestrator::new(policy(false, 1))
            .run("book.zip", five_pages_one_broken(), &provider, &CancelFlag::new())
            .await
            .unwrap_err();

        match &err {
            PipelineError::Aborted {
                page_number,
                filename,
                report,
                ..
            } => {
                assert_eq!(*page_number, 3);
                assert_eq!(filename, "page_3.png");
                assert_eq!(page_numbers(report), vec![1, 2]);
                assert_eq!(report.summary.pages_failed, 0);
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert!(err.partial_report().is_some());
    }

    #[tokio::test]
    async fn test_strict_mode_aborts_under_concurrency() {
        let provider = cpu_provider(ScriptedRecognizer::echo_size());
        let err = PipelineOrchestrator::new(policy(false, 4))
            .run("book.zip", five_pages_one_broken(), &provider, &CancelFlag::new())
            .await
            .unwrap_err();

        let report = err.partial_report().unwrap();
        assert_eq!(page_numbers(report), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_partial_pages_never_abort() {
        let recognizer = ScriptedRecognizer::new(|crop| {
            if crop.width() == 60 {
                Err(RecognitionError::Failed("smudged".into()))
            } else {
                Ok(RecognizedText::new("ok", 1.0))
            }
        });
        let report = PipelineOrchestrator::new(policy(false, 1))
            .run(
                "book.zip",
                vec![page(1, 50), page(2, 60), page(3, 70)],
                &cpu_provider(recognizer),
                &CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(page_numbers(&report), vec![1, 2, 3]);
        assert_eq!(report.pages[1].status, PageStatus::Partial);
        assert_eq!(report.summary.pages_partial, 1);
    }

    #[tokio::test]
    async fn test_concurrent_pages_reported_in_page_order() {
        // Earlier pages are wider and sleep longer, so they finish last
        let recognizer = ScriptedRecognizer::new(|crop| {
            std::thread::sleep(Duration::from_millis(crop.width() as u64 / 4));
            Ok(RecognizedText::new(crop.width().to_string(), 1.0))
        });
        let pages: Vec<_> = (1..=6).map(|n| page(n, 260 - 40 * n as u32)).collect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_callback = Arc::clone(&seen);

        let report = PipelineOrchestrator::new(policy(true, 3))
            .with_progress(move |page| seen_by_callback.lock().push(page.page_number))
            .run("book.zip", pages, &cpu_provider(recognizer), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(page_numbers(&report), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5, 6]);
        let texts: Vec<&str> = report.pages.iter().flat_map(|p| p.texts()).collect();
        assert_eq!(texts, vec!["220", "180", "140", "100", "60", "20"]);
    }

    #[tokio::test]
    async fn test_cancellation_between_pages() {
        let cancel = CancelFlag::new();
        let cancel_after_two = cancel.clone();
        let report = PipelineOrchestrator::new(policy(true, 1))
            .with_progress(move |page| {
                if page.page_number == 2 {
                    cancel_after_two.cancel();
                }
            })
            .run(
                "book.zip",
                (1..=5).map(|n| page(n, 50)),
                &cpu_provider(ScriptedRecognizer::echo_size()),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(page_numbers(&report), vec![1, 2]);
        assert!(report.summary.cancelled);
    }

    #[tokio::test]
    async fn test_backend_downgrade_recorded() {
        let provider = FixedProvider::new(
            vec![Backend::CoreMl, Backend::Cpu],
            capabilities(ScriptedDetector::returning(vec![]), ScriptedRecognizer::echo_size()),
        );
        let policy = RunPolicy {
            backend_preference: BackendPreference::Explicit(Backend::DEFAULT_PREFERENCE.to_vec()),
            ..RunPolicy::default()
        };
        let report = PipelineOrchestrator::new(policy)
            .run("book.zip", vec![page(1, 50)], &provider, &CancelFlag::new())
            .await
            .unwrap();

        let backend = report.summary.backend;
        assert_eq!(backend.requested, Backend::Cuda);
        assert_eq!(backend.resolved, Backend::CoreMl);
        assert!(backend.downgraded);
        assert_eq!(*provider.opened.lock(), vec![Backend::CoreMl]);
    }

    #[tokio::test]
    async fn test_auto_backend_is_not_a_downgrade() {
        let provider = cpu_provider(ScriptedRecognizer::echo_size());
        let report = PipelineOrchestrator::new(RunPolicy::default())
            .run("book.zip", vec![page(1, 50)], &provider, &CancelFlag::new())
            .await
            .unwrap();

        let backend = report.summary.backend;
        assert_eq!(backend.requested, Backend::Cpu);
        assert_eq!(backend.resolved, Backend::Cpu);
        assert!(!backend.downgraded);
    }

    #[tokio::test]
    async fn test_abort_waits_for_in_flight_pages() {
        let finished = Arc::new(AtomicUsize::new(0));
        let provider = cpu_provider(slow_counting_recognizer(Arc::clone(&finished)));
        let pages = vec![broken_page(1), page(2, 50), page(3, 50), page(4, 50), page(5, 50)];

        let err = PipelineOrchestrator::new(policy(false, 4))
            .run("book.zip", pages, &provider, &CancelFlag::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Aborted { page_number: 1, .. }));
        assert!(err.partial_report().unwrap().pages.is_empty());
        // Page 5 is never pulled once the run aborts
        assert!(finished.load(Ordering::SeqCst) <= 3);
        assert_nothing_left_running(&provider, &finished).await;
    }

    #[tokio::test]
    async fn test_archive_error_waits_for_in_flight_pages() {
        let finished = Arc::new(AtomicUsize::new(0));
        let provider = cpu_provider(slow_counting_recognizer(Arc::clone(&finished)));
        let pages = vec![
            page(1, 50),
            Err(ArchiveError::EntryRead {
                name: "book/page_2.png".into(),
                source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated"),
            }),
            page(3, 50),
            page(4, 50),
        ];

        let err = PipelineOrchestrator::new(policy(true, 4))
            .run("book.zip", pages, &provider, &CancelFlag::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Archive(_)));
        assert_nothing_left_running(&provider, &finished).await;
    }

    #[tokio::test]
    async fn test_archive_error_is_fatal() {
        let pages = vec![
            page(1, 50),
            Err(ArchiveError::EntryRead {
                name: "book/page_2.png".into(),
                source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated"),
            }),
            page(3, 50),
        ];
        let err = PipelineOrchestrator::new(policy(true, 1))
            .run(
                "book.zip",
                pages,
                &cpu_provider(ScriptedRecognizer::echo_size()),
                &CancelFlag::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Archive(ArchiveError::EntryRead { .. })));
        assert!(err.partial_report().is_none());
    }

    #[tokio::test]
    async fn test_capability_init_failure() {
        let mut provider = cpu_provider(ScriptedRecognizer::echo_size());
        provider.fail_open = true;
        let err = PipelineOrchestrator::new(policy(true, 1))
            .run("book.zip", vec![page(1, 50)], &provider, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CapabilityInit { .. }));
    }

    #[tokio::test]
    async fn test_panicking_page_is_recorded_as_failed() {
        let detector = ScriptedDetector::new(|image| {
            if image.width() == 60 {
                panic!("detector crashed");
            }
            Ok(vec![Region::new(0, 0, 10, 10).unwrap()])
        });
        let provider = FixedProvider::new(
            vec![Backend::Cpu],
            capabilities(detector, ScriptedRecognizer::echo_size()),
        );
        let report = PipelineOrchestrator::new(policy(true, 1))
            .run(
                "book.zip",
                vec![page(1, 50), page(2, 60), page(3, 70)],
                &provider,
                &CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(page_numbers(&report), vec![1, 2, 3]);
        assert_eq!(report.pages[1].status, PageStatus::Failed);
        assert!(report.pages[1].error.as_deref().unwrap().contains("panicked"));
    }
}
