// Result serializer: structured JSON report and condensed text transcript
//
// Both renderings are pure functions of the report.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::errors::{OutputError, OutputResult};
use crate::core::types::{OutputFormat, PipelineReport};

/// One rendered output, not yet written anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub format: OutputFormat,
    pub contents: String,
}

/// Full-fidelity pretty JSON (UTF-8, non-ASCII kept as is).
pub fn render_structured(report: &PipelineReport) -> OutputResult<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// `[filename]` header per page, then each non-empty recognized text in
/// reading order, then a blank line. Failed and absent regions are omitted.
pub fn render_condensed(report: &PipelineReport) -> String {
    let mut out = String::new();
    for page in &report.pages {
        out.push_str(&format!("[{}]\n", page.filename));
        for text in page.texts() {
            out.push_str(text);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// Render `report` in every requested format, in request order.
pub fn serialize(report: &PipelineReport, formats: &[OutputFormat]) -> OutputResult<Vec<Artifact>> {
    formats
        .iter()
        .map(|&format| {
            let contents = match format {
                OutputFormat::Structured => render_structured(report)?,
                OutputFormat::Condensed => render_condensed(report),
            };
            Ok(Artifact { format, contents })
        })
        .collect()
}

/// Parse a structured artifact back into a report. Region geometry is
/// re-validated on the way in.
pub fn parse_structured(json: &str) -> OutputResult<PipelineReport> {
    Ok(serde_json::from_str(json)?)
}

/// `<dir>/<stem>_output.<ext>`
pub fn artifact_path(output_dir: &Path, stem: &str, format: OutputFormat) -> PathBuf {
    output_dir.join(format!("{}_output.{}", stem, format.extension()))
}

/// Write artifacts into `output_dir` (created if missing). Returns the
/// written paths in artifact order.
pub fn write_artifacts(
    artifacts: &[Artifact],
    output_dir: &Path,
    stem: &str,
) -> OutputResult<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir).map_err(|source| OutputError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;

    artifacts
        .iter()
        .map(|artifact| {
            let path = artifact_path(output_dir, stem, artifact.format);
            std::fs::write(&path, &artifact.contents).map_err(|source| OutputError::Io {
                path: path.clone(),
                source,
            })?;
            info!("{} output saved to: {}", artifact.format.extension().to_uppercase(), path.display());
            Ok(path)
        })
        .collect()
}
