use crate::core::errors::ConfigError;
use crate::core::types::{BackendPreference, OutputFormat, ReadingDirection};
use std::env;
use std::path::PathBuf;
use tracing::Level;

/// Run policy configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Record failed pages and keep going instead of aborting the run
    pub skip_errors: bool,
    pub backend_preference: BackendPreference,
    pub output_formats: Vec<OutputFormat>,
    /// Minimum vertical overlap, as a fraction of the shorter region, for two
    /// regions to share a band
    pub band_overlap_fraction: f32,
    pub reading_direction: ReadingDirection,
    /// Pages in flight at once (1 = sequential)
    pub max_concurrent_pages: usize,
}

/// Detection configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub target_size: u32,
    /// Detector class ids that denote text
    pub text_labels: Vec<i64>,
}

/// Recognition configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Directory holding `ocr/ocr.onnx` and `ocr/cjk_vocab.txt`
    pub model_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub detection: DetectionConfig,
    pub recognition: RecognitionConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig {
                skip_errors: true,
                backend_preference: BackendPreference::Auto,
                output_formats: vec![OutputFormat::Structured, OutputFormat::Condensed],
                band_overlap_fraction: 0.5,
                reading_direction: ReadingDirection::RightToLeft,
                max_concurrent_pages: 1,
            },
            detection: DetectionConfig {
                model_path: PathBuf::from("models/detector.onnx"),
                confidence_threshold: 0.3,
                iou_threshold: 0.7,
                target_size: 640,
                text_labels: vec![1, 2],
            },
            recognition: RecognitionConfig {
                model_dir: PathBuf::from("models"),
            },
            log: LogConfig { level: Level::INFO },
        }
    }
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        Self::load_with(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup, falling back to defaults for
    /// missing keys. Enum-valued keys must parse; numeric keys that fail to
    /// parse keep their default.
    fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }


        let backend_preference = match lookup("BACKEND_PREFERENCE") {
            Some(s) => BackendPreference::parse(&s)?,
            None => defaults.pipeline.backend_preference,
        };

        let output_formats = match lookup("OUTPUT_FORMAT") {
            Some(s) => OutputFormat::parse_list(&s)?,
            None => defaults.pipeline.output_formats,
        };

        let reading_direction = match lookup("READING_DIRECTION") {
            Some(s) => s.parse()?,
            None => defaults.pipeline.reading_direction,
        };

        let text_labels = match lookup("TEXT_LABELS") {
            Some(s) => s
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| {
                    l.parse::<i64>().map_err(|_| {
                        ConfigError::EnvVarError(format!("TEXT_LABELS: '{}' is not an integer", l))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => defaults.detection.text_labels,
        };

        let level = lookup("LOG_LEVEL")
            .and_then(|s| parse_level(&s))
            .unwrap_or(defaults.log.level);

        Ok(Self {
            pipeline: PipelineConfig {
                skip_errors: parsed(&lookup, "SKIP_ERRORS").unwrap_or(defaults.pipeline.skip_errors),
                backend_preference,
                output_formats,
                band_overlap_fraction: parsed(&lookup, "BAND_OVERLAP_FRACTION")
                    .unwrap_or(defaults.pipeline.band_overlap_fraction),
                reading_direction,
                max_concurrent_pages: parsed(&lookup, "MAX_CONCURRENT_PAGES")
                    .unwrap_or(defaults.pipeline.max_concurrent_pages),
            },
            detection: DetectionConfig {
                model_path: lookup("DETECTOR_MODEL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.detection.model_path),
                confidence_threshold: parsed(&lookup, "CONFIDENCE_THRESHOLD")
                    .unwrap_or(defaults.detection.confidence_threshold),
                iou_threshold: parsed(&lookup, "IOU_THRESHOLD").unwrap_or(defaults.detection.iou_threshold),
                target_size: parsed(&lookup, "TARGET_SIZE").unwrap_or(defaults.detection.target_size),
                text_labels,
            },
            recognition: RecognitionConfig {
                model_dir: lookup("OCR_MODEL_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.recognition.model_dir),
            },
            log: LogConfig { level },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.pipeline.band_overlap_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::InvalidBandOverlap(fraction));
        }

        if self.pipeline.max_concurrent_pages == 0 {
            return Err(ConfigError::InvalidConcurrency(
                self.pipeline.max_concurrent_pages,
            ));
        }

        if self.pipeline.backend_preference.candidates().is_empty() {
            return Err(ConfigError::EmptyBackendPreference);
        }

        if self.pipeline.output_formats.is_empty() {
            return Err(ConfigError::NoOutputFormats);
        }

        // Validate detection thresholds
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.detection.confidence_threshold,
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.iou_threshold) {
            return Err(ConfigError::InvalidIoUThreshold(
                self.detection.iou_threshold,
            ));
        }

        if !(320..=2048).contains(&self.detection.target_size) {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "target_size must be between 320 and 2048, got {}",
                self.detection.target_size
            )));
        }

        if self.detection.text_labels.is_empty() {
            return Err(ConfigError::InvalidDetectionConfig(
                "text_labels must name at least one class".to_string(),
            ));
        }

        Ok(())
    }

    pub fn skip_errors(&self) -> bool {
        self.pipeline.skip_errors
    }

    pub fn backend_preference(&self) -> &BackendPreference {
        &self.pipeline.backend_preference
    }

    pub fn output_formats(&self) -> &[OutputFormat] {
        &self.pipeline.output_formats
    }

    pub fn band_overlap_fraction(&self) -> f32 {
        self.pipeline.band_overlap_fraction
    }

    pub fn reading_direction(&self) -> ReadingDirection {
        self.pipeline.reading_direction
    }

    pub fn max_concurrent_pages(&self) -> usize {
        self.pipeline.max_concurrent_pages
    }

    pub fn log_level(&self) -> Level {
        self.log.level
    }
}

pub fn parse_level(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Backend;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::load_with(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.skip_errors());
        assert_eq!(config.band_overlap_fraction(), 0.5);
        assert_eq!(config.reading_direction(), ReadingDirection::RightToLeft);
        assert_eq!(config.backend_preference(), &BackendPreference::Auto);
        assert_eq!(config.output_formats().len(), 2);
        assert_eq!(config.max_concurrent_pages(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_overrides() {
        let config = load(&[
            ("SKIP_ERRORS", "false"),
            ("BACKEND_PREFERENCE", "coreml,cpu"),
            ("OUTPUT_FORMAT", "txt"),
            ("READING_DIRECTION", "ltr"),
            ("BAND_OVERLAP_FRACTION", "0.25"),
            ("MAX_CONCURRENT_PAGES", "4"),
            ("TEXT_LABELS", "2"),
            ("LOG_LEVEL", "debug"),
        ])
        .unwrap();

        assert!(!config.skip_errors());
        assert_eq!(
            config.backend_preference(),
            &BackendPreference::Explicit(vec![Backend::CoreMl, Backend::Cpu])
        );
        assert_eq!(config.output_formats(), &[OutputFormat::Condensed]);
        assert_eq!(config.reading_direction(), ReadingDirection::LeftToRight);
        assert_eq!(config.band_overlap_fraction(), 0.25);
        assert_eq!(config.max_concurrent_pages(), 4);
        assert_eq!(config.detection.text_labels, vec![2]);
        assert_eq!(config.log_level(), Level::DEBUG);
    }

    #[test]
    fn test_unknown_enum_values_rejected() {
        assert!(matches!(
            load(&[("BACKEND_PREFERENCE", "tpu")]),
            Err(ConfigError::UnknownBackend(_))
        ));
        assert!(matches!(
            load(&[("OUTPUT_FORMAT", "pdf")]),
            Err(ConfigError::UnknownOutputFormat(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.pipeline.band_overlap_fraction = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBandOverlap(_))
        ));

        let mut config = Config::default();
        config.pipeline.band_overlap_fraction = 1.0;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.pipeline.max_concurrent_pages = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConcurrency(0))
        ));

        let mut config = Config::default();
        config.detection.target_size = 100;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.output_formats.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoOutputFormats)));
    }
}
