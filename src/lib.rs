// Library exports for the manga page OCR pipeline

// Core modules
pub mod core;
pub mod orchestration;
pub mod output;
pub mod phases;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{ArchiveError, ConfigError, DetectionError, OutputError, PipelineError, RecognitionError},
    types::{
        Backend, BackendPreference, BackendSelection, OrderedRegion, OutputFormat, PageResult,
        PageSource, PageStatus, PipelineReport, ReadingDirection, RecognizedText, Region,
        RegionResult,
    },
};

pub use orchestration::{CancelFlag, PipelineOrchestrator, RunPolicy};

pub use output::{serialize, write_artifacts, Artifact};

pub use phases::{PageProcessor, ReadingOrderSorter, SortOptions};

pub use services::{OnnxCapabilityProvider, PageArchive};
