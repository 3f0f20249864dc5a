// Page, region and report types shared by every stage of the pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::core::errors::{ConfigError, InvalidRegion};

/// Axis-aligned text region in the pixel coordinates of its page.
///
/// Always satisfies `x1 < x2 && y1 < y2`. Serialized as `[x1, y1, x2, y2]`;
/// deserialization re-checks the invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[i32; 4]", into = "[i32; 4]")]
pub struct Region {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl Region {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self, InvalidRegion> {
        if x1 < x2 && y1 < y2 {
            Ok(Self { x1, y1, x2, y2 })
        } else {
            Err(InvalidRegion { x1, y1, x2, y2 })
        }
    }

    /// Region covering a whole `width` x `height` page.
    pub fn covering(width: u32, height: u32) -> Result<Self, InvalidRegion> {
        let w = i32::try_from(width).unwrap_or(i32::MAX);
        let h = i32::try_from(height).unwrap_or(i32::MAX);
        Self::new(0, 0, w, h)
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> i64 {
        self.x2 as i64 - self.x1 as i64
    }

    pub fn height(&self) -> i64 {
        self.y2 as i64 - self.y1 as i64
    }

    pub fn bbox(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Length of the shared vertical span (0 when disjoint).
    pub fn vertical_overlap(&self, other: &Region) -> i64 {
        (self.y2.min(other.y2) as i64 - self.y1.max(other.y1) as i64).max(0)
    }

    /// Intersect with a `width` x `height` page. `None` if nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        let w = i32::try_from(width).unwrap_or(i32::MAX);
        let h = i32::try_from(height).unwrap_or(i32::MAX);
        Region::new(
            self.x1.clamp(0, w),
            self.y1.clamp(0, h),
            self.x2.clamp(0, w),
            self.y2.clamp(0, h),
        )
        .ok()
    }
}

impl TryFrom<[i32; 4]> for Region {
    type Error = InvalidRegion;

    fn try_from(bbox: [i32; 4]) -> Result<Self, Self::Error> {
        Region::new(bbox[0], bbox[1], bbox[2], bbox[3])
    }
}

impl From<Region> for [i32; 4] {
    fn from(region: Region) -> Self {
        region.bbox()
    }
}

/// A region with its position in the page's reading sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderedRegion {
    pub reading_order: usize,
    pub region: Region,
}

/// Text produced by the recognizer for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f32,
}

impl RecognizedText {
    /// Confidence is clamped to [0, 1]; NaN becomes 0.
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Outcome for one ordered region of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionResult {
    pub reading_order: usize,
    pub bbox: Region,
    /// `None` when recognition failed for this region.
    pub recognized: Option<RecognizedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Ok,
    /// Detection succeeded but at least one region failed recognition
    Partial,
    /// Page could not be decoded or detection failed
    Failed,
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PageStatus::Ok => "ok",
            PageStatus::Partial => "partial",
            PageStatus::Failed => "failed",
        })
    }
}

/// Why a page was read as a single whole-page region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NoRegionsDetected,
    DetectorUnavailable,
}

/// Result for one page of the archive. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub filename: String,
    /// 1-based position in natural filename order
    pub page_number: usize,
    pub status: PageStatus,
    pub regions: Vec<RegionResult>,
    /// Seconds
    pub processing_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageResult {
    pub fn failed(
        filename: impl Into<String>,
        page_number: usize,
        error: impl Into<String>,
        processing_time: f64,
    ) -> Self {
        Self {
            filename: filename.into(),
            page_number,
            status: PageStatus::Failed,
            regions: Vec::new(),
            processing_time,
            fallback: None,
            error: Some(error.into()),
        }
    }

    pub fn recognized_count(&self) -> usize {
        self.regions.iter().filter(|r| r.recognized.is_some()).count()
    }

    /// Recognized texts in reading order, absent and empty entries skipped.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.regions
            .iter()
            .filter_map(|r| r.recognized.as_ref())
            .map(|r| r.text.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// Execution backend handed to the capability adapters for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cuda,
    CoreMl,
    Cpu,
}

impl Backend {
    /// Accelerated backends first, CPU last.
    pub const DEFAULT_PREFERENCE: [Backend; 3] = [Backend::Cuda, Backend::CoreMl, Backend::Cpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Cuda => "cuda",
            Backend::CoreMl => "coreml",
            Backend::Cpu => "cpu",
        }
    }

}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cuda" => Ok(Backend::Cuda),
            "coreml" | "mps" => Ok(Backend::CoreMl),
            "cpu" => Ok(Backend::Cpu),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Which backends a run may use, in probe order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Best available, in `Backend::DEFAULT_PREFERENCE` order. Never
    /// reported as a downgrade.
    #[default]
    Auto,
    /// User-chosen order; resolving to anything but its head is a downgrade
    Explicit(Vec<Backend>),
}

impl BackendPreference {
    pub fn candidates(&self) -> &[Backend] {
        match self {
            BackendPreference::Auto => &Backend::DEFAULT_PREFERENCE,
            BackendPreference::Explicit(list) => list,
        }
    }

    /// Parse `auto` or a comma-separated list such as `coreml,cpu`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("auto") {
            return Ok(BackendPreference::Auto);
        }
        let mut preference = Vec::new();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let backend: Backend = name.parse()?;
            if !preference.contains(&backend) {
                preference.push(backend);
            }
        }
        Ok(BackendPreference::Explicit(preference))
    }
}

/// Backend the run asked for versus the one it got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSelection {
    pub requested: Backend,
    pub resolved: Backend,
    pub downgraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingDirection {
    #[default]
    RightToLeft,
    LeftToRight,
}

impl FromStr for ReadingDirection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "rtl" | "right_to_left" => Ok(ReadingDirection::RightToLeft),
            "ltr" | "left_to_right" => Ok(ReadingDirection::LeftToRight),
            other => Err(ConfigError::UnknownReadingDirection(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Full-fidelity JSON report
    Structured,
    /// Filename headers plus recognized lines
    Condensed,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Structured => "json",
            OutputFormat::Condensed => "txt",
        }
    }

    /// Parse `both` or a comma-separated list such as `json,txt`.
    pub fn parse_list(s: &str) -> Result<Vec<OutputFormat>, ConfigError> {
        if s.trim().eq_ignore_ascii_case("both") {
            return Ok(vec![OutputFormat::Structured, OutputFormat::Condensed]);
        }
        let mut formats = Vec::new();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let format: OutputFormat = name.parse()?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        Ok(formats)
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" | "structured" => Ok(OutputFormat::Structured),
            "txt" | "text" | "condensed" => Ok(OutputFormat::Condensed),
            other => Err(ConfigError::UnknownOutputFormat(other.to_string())),
        }
    }
}

/// One page image as produced by the archive, not yet decoded.
#[derive(Debug, Clone)]
pub struct PageSource {
    pub page_number: usize,
    pub filename: String,
    /// Path of the entry inside the archive or directory
    pub entry_path: String,
    pub image_bytes: Arc<Vec<u8>>,
}

/// Run-level counters derived from the page results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub pages_attempted: usize,
    pub pages_ok: usize,
    pub pages_partial: usize,
    pub pages_failed: usize,
    pub regions_total: usize,
    pub regions_recognized: usize,
    /// Sum of per-page processing times, seconds
    pub total_processing_time: f64,
    pub backend: BackendSelection,
    pub cancelled: bool,
}

impl ReportSummary {
    pub fn tally(pages: &[PageResult], backend: BackendSelection, cancelled: bool) -> Self {
        let count = |status: PageStatus| pages.iter().filter(|p| p.status == status).count();
        Self {
            pages_attempted: pages.len(),
            pages_ok: count(PageStatus::Ok),
            pages_partial: count(PageStatus::Partial),
            pages_failed: count(PageStatus::Failed),
            regions_total: pages.iter().map(|p| p.regions.len()).sum(),
            regions_recognized: pages.iter().map(PageResult::recognized_count).sum(),
            total_processing_time: pages.iter().map(|p| p.processing_time).sum(),
            backend,
            cancelled,
        }
    }
}

/// Terminal artifact of a run: every page result in page order plus summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Archive or directory the pages came from
    pub source: String,
    pub summary: ReportSummary,
    pub pages: Vec<PageResult>,
}

impl PipelineReport {
    pub fn new(
        source: impl Into<String>,
        pages: Vec<PageResult>,
        backend: BackendSelection,
        cancelled: bool,
    ) -> Self {
        Self {
            source: source.into(),
            summary: ReportSummary::tally(&pages, backend, cancelled),
            pages,
        }
    }
}
