pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ArchiveError, ConfigError, DetectionError, InvalidRegion, OutputError, PipelineError,
    RecognitionError,
};
pub use types::{
    Backend, BackendPreference, BackendSelection, FallbackReason, OrderedRegion, OutputFormat,
    PageResult, PageSource, PageStatus, PipelineReport, ReadingDirection, RecognizedText,
    Region, RegionResult, ReportSummary,
};
