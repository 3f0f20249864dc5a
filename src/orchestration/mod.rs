pub mod pipeline_orchestrator;

pub use pipeline_orchestrator::{CancelFlag, PipelineOrchestrator, ProgressCallback, RunPolicy};
