// Error types for every stage of the pipeline
//
// Failures below the page boundary (recognition) are recovered into page data.
// Page-level failures (detection, decoding) become failed pages. Archive and
// capability setup failures end the run.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::types::PipelineReport;

/// Bounding box that violates `x1 < x2 && y1 < y2`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("degenerate region [{x1}, {y1}, {x2}, {y2}]")]
pub struct InvalidRegion {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Text detection capability errors
#[derive(Debug, Error)]
pub enum DetectionError {
    /// The backing model is missing or could not be loaded. Pages fall back
    /// to a single whole-page region instead of failing.
    #[error("Text detection unavailable: {0}")]
    Unavailable(String),

    #[error("ONNX inference failed: {0}")]
    Inference(#[from] ort::Error),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidImage { width: u32, height: u32 },

    #[error("Text detection failed: {0}")]
    Failed(String),
}

/// Text recognition capability errors (always contained to one region)
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("Text recognition unavailable: {0}")]
    Unavailable(String),

    #[error("ONNX inference failed: {0}")]
    Inference(#[from] ort::Error),

    #[error("Region {bbox:?} lies outside the page")]
    EmptyCrop { bbox: [i32; 4] },

    #[error("Text recognition failed: {0}")]
    Failed(String),
}

/// Archive ingestion errors (fatal to the run)
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive not found: {0}")]
    NotFound(PathBuf),

    #[error("Archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt or unsupported zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("No image files found in {0}")]
    NoImages(PathBuf),

    #[error("Failed to read archive entry {name}: {source}")]
    EntryRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive entry {0} is password protected")]
    PasswordProtected(String),
}

/// Output serialization errors
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Run-level errors surfaced by the orchestrator
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Archive read failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Capability initialization failed on {backend}: {reason}")]
    CapabilityInit { backend: String, reason: String },

    /// Strict mode stopped at a failed page. `report` holds every page
    /// completed before it, in page order.
    #[error("Processing aborted at page {page_number} ({filename}): {reason}")]
    Aborted {
        page_number: usize,
        filename: String,
        reason: String,
        report: Box<PipelineReport>,
    },
}

impl PipelineError {
    /// Partial report carried by an aborted run.
    pub fn partial_report(&self) -> Option<&PipelineReport> {
        match self {
            PipelineError::Aborted { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown backend '{0}' (expected auto, cuda, coreml or cpu)")]
    UnknownBackend(String),

    #[error("Unknown output format '{0}' (expected json, txt or both)")]
    UnknownOutputFormat(String),

    #[error("Unknown reading direction '{0}' (expected rtl or ltr)")]
    UnknownReadingDirection(String),

    #[error("Band overlap fraction must be in (0.0, 1.0], got {0}")]
    InvalidBandOverlap(f32),

    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("IoU threshold must be in [0.0, 1.0], got {0}")]
    InvalidIoUThreshold(f32),

    #[error("Invalid detection config: {0}")]
    InvalidDetectionConfig(String),

    #[error("Concurrent page limit must be > 0, got {0}")]
    InvalidConcurrency(usize),

    #[error("Backend preference list is empty")]
    EmptyBackendPreference,

    #[error("At least one output format is required")]
    NoOutputFormats,

    #[error("Environment variable parsing failed: {0}")]
    EnvVarError(String),
}

pub type DetectionResult<T> = Result<T, DetectionError>;
pub type RecognitionResult<T> = Result<T, RecognitionError>;
pub type ArchiveResult<T> = Result<T, ArchiveError>;
pub type OutputResult<T> = Result<T, OutputError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
