// Command-line entry point: OCR every page of a manga archive

use manga_ocr_batch::{
    core::{Config, types::*},
    orchestration::{CancelFlag, PipelineOrchestrator, RunPolicy},
    output,
    services::{OnnxCapabilityProvider, PageArchive},
    PipelineError,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Json,
    Txt,
    Both,
}

impl FormatArg {
    fn formats(self) -> Vec<OutputFormat> {
        match self {
            FormatArg::Json => vec![OutputFormat::Structured],
            FormatArg::Txt => vec![OutputFormat::Condensed],
            FormatArg::Both => vec![OutputFormat::Structured, OutputFormat::Condensed],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DeviceArg {
    Auto,
    Cuda,
    #[value(alias = "mps")]
    Coreml,
    Cpu,
}

impl DeviceArg {
    fn preference(self) -> BackendPreference {
        match self {
            DeviceArg::Auto => BackendPreference::Auto,
            DeviceArg::Cuda => BackendPreference::Explicit(vec![Backend::Cuda]),
            DeviceArg::Coreml => BackendPreference::Explicit(vec![Backend::CoreMl]),
            DeviceArg::Cpu => BackendPreference::Explicit(vec![Backend::Cpu]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DirectionArg {
    Rtl,
    Ltr,
}

#[derive(Parser, Debug)]
#[command(
    name = "manga-ocr-batch",
    about = "Extract text from every page of a manga archive",
    long_about = "Extract text from every page of a manga archive.\n\
                  \n\
                  INPUT is a .zip/.cbz archive or a directory of page images. Writes\n\
                  <stem>_output.json and/or <stem>_output.txt next to the input\n\
                  unless --output-dir is given.",
    version
)]
struct Args {
    /// Archive (.zip/.cbz) or directory of page images
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Directory for the output files (default: the input's parent)
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long = "output-format", value_enum)]
    format: Option<FormatArg>,

    /// Execution device; auto tries CUDA, then CoreML (alias mps), then CPU
    #[arg(long, value_enum)]
    device: Option<DeviceArg>,

    /// Record failed pages and continue
    #[arg(long, conflicts_with = "no_skip_errors")]
    skip_errors: bool,

    /// Stop at the first failed page
    #[arg(long)]
    no_skip_errors: bool,

    /// Panel reading direction
    #[arg(long, value_enum)]
    reading_direction: Option<DirectionArg>,

    /// Vertical overlap fraction that puts two regions on one line
    #[arg(long, value_name = "F")]
    band_overlap: Option<f32>,

    /// Pages processed concurrently
    #[arg(short = 'j', long, value_name = "N")]
    jobs: Option<usize>,

    /// Text detector model (.onnx)
    #[arg(long, value_name = "PATH")]
    detector_model: Option<PathBuf>,

    /// Directory holding ocr/ocr.onnx and ocr/cjk_vocab.txt
    #[arg(long, value_name = "DIR")]
    ocr_model_dir: Option<PathBuf>,

    /// Show detailed processing information
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn apply_to(&self, config: &mut Config) {
        let pipeline = &mut config.pipeline;
        if let Some(format) = self.format {
            pipeline.output_formats = format.formats();
        }
        if let Some(device) = self.device {
            pipeline.backend_preference = device.preference();
        }
        if self.skip_errors {
            pipeline.skip_errors = true;
        }
        if self.no_skip_errors {
            pipeline.skip_errors = false;
        }
        if let Some(direction) = self.reading_direction {
            pipeline.reading_direction = match direction {
                DirectionArg::Rtl => ReadingDirection::RightToLeft,
                DirectionArg::Ltr => ReadingDirection::LeftToRight,
            };
        }
        if let Some(fraction) = self.band_overlap {
            pipeline.band_overlap_fraction = fraction;
        }
        if let Some(jobs) = self.jobs {
            pipeline.max_concurrent_pages = jobs;
        }
        if let Some(path) = &self.detector_model {
            config.detection.model_path = path.clone();
        }
        if let Some(dir) = &self.ocr_model_dir {
            config.recognition.model_dir = dir.clone();
        }
        if self.verbose {
            config.log.level = tracing::Level::DEBUG;
        } else if self.quiet {
            config.log.level = tracing::Level::ERROR;
        }
    }

    /// Output file stem: archive name without extension, or directory name
    fn stem(&self) -> String {
        self.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pages".to_string())
    }

    fn output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => match self.input.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        }
    }
}

/// How a run ended, mapped to the process exit code
enum Outcome {
    Completed,
    Cancelled,
    Aborted,
}

impl Outcome {
    fn exit_code(&self) -> ExitCode {
        match self {
            Outcome::Completed => ExitCode::SUCCESS,
            Outcome::Aborted => ExitCode::from(1),
            Outcome::Cancelled => ExitCode::from(130),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration, then let the command line override it
    let config = match Config::new().and_then(|mut config| {
        args.apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::new(format!(
        "manga_ocr_batch={},ort=off",
        config.log_level().as_str().to_lowercase()
    ));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&args, &config).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: &Args, config: &Config) -> Result<Outcome> {
    info!("=== MANGA OCR BATCH ===");
    info!(
        "Config: skip_errors={} direction={:?} band_overlap={} jobs={}",
        config.skip_errors(),
        config.reading_direction(),
        config.band_overlap_fraction(),
        config.max_concurrent_pages()
    );

    let archive = PageArchive::open(&args.input)?;
    let source = archive.source().display().to_string();
    let progress = progress_bar(archive.len() as u64, args.quiet);

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight pages");
                cancel.cancel();
            }
        });
    }

    let provider = OnnxCapabilityProvider::from_config(config);
    let orchestrator = {
        let progress = progress.clone();
        PipelineOrchestrator::new(RunPolicy::from_config(config)).with_progress(move |page| {
            progress.set_message(page.filename.clone());
            progress.inc(1);
        })
    };

    let result = orchestrator
        .run(&source, archive.into_pages(), &provider, &cancel)
        .await;
    progress.finish_and_clear();

    let (report, outcome) = match result {
        Ok(report) if report.summary.cancelled => (report, Outcome::Cancelled),
        Ok(report) => (report, Outcome::Completed),
        Err(PipelineError::Aborted {
            page_number,
            filename,
            reason,
            report,
        }) => {
            error!(
                "Stopped at page {} ({}): {}. Writing the {} pages completed before it",
                page_number,
                filename,
                reason,
                report.pages.len()
            );
            (*report, Outcome::Aborted)
        }
        Err(e) => return Err(e.into()),
    };

    save(&report, config, &args.output_dir(), &args.stem())?;
    Ok(outcome)
}

fn save(report: &PipelineReport, config: &Config, output_dir: &Path, stem: &str) -> Result<()> {
    let artifacts = output::serialize(report, config.output_formats())?;
    let paths = output::write_artifacts(&artifacts, output_dir, stem)
        .with_context(|| format!("Failed to write results to {}", output_dir.display()))?;

    let summary = &report.summary;
    info!(
        "✓ {} pages ({} ok, {} partial, {} failed) on {} → {} files",
        summary.pages_attempted,
        summary.pages_ok,
        summary.pages_partial,
        summary.pages_failed,
        summary.backend.resolved,
        paths.len()
    );
    Ok(())
}

fn progress_bar(pages: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(pages);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        Ok(style) => bar.set_style(style.progress_chars("█▓▒░  ")),
        Err(e) => warn!("Progress bar template rejected: {}", e),
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(argv: &[&str]) -> Config {
        let argv = std::iter::once("manga-ocr-batch").chain(argv.iter().copied());
        let args = Args::try_parse_from(argv).unwrap();
        let mut config = Config::default();
        args.apply_to(&mut config);
        config
    }

    #[test]
    fn test_output_format_flag() {
        let config = configured(&["book.zip", "--output-format", "txt"]);
        assert_eq!(config.output_formats(), &[OutputFormat::Condensed]);

        let config = configured(&["book.zip", "-f", "json"]);
        assert_eq!(config.output_formats(), &[OutputFormat::Structured]);
    }

    #[test]
    fn test_device_mps_alias() {
        let config = configured(&["book.zip", "--device", "mps"]);
        assert_eq!(
            config.backend_preference(),
            &BackendPreference::Explicit(vec![Backend::CoreMl])
        );

        let config = configured(&["book.zip", "--device", "auto"]);
        assert_eq!(config.backend_preference(), &BackendPreference::Auto);
    }

    #[test]
    fn test_strict_mode_and_jobs() {
        let config = configured(&["book.zip", "--no-skip-errors", "-j", "3"]);
        assert!(!config.skip_errors());
        assert_eq!(config.max_concurrent_pages(), 3);
        let conflicting = ["manga-ocr-batch", "book.zip", "--skip-errors", "--no-skip-errors"];
        assert!(Args::try_parse_from(conflicting).is_err());
    }
}
