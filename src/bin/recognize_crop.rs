//! Run the line recognizer on a single cropped image
//! Run with: cargo run --release --bin recognize_crop -- <image_path> [models_dir]

use anyhow::Result;
use manga_ocr_batch::services::{OnnxTextRecognizer, TextRecognizer};
use manga_ocr_batch::Backend;
use std::path::Path;
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("manga_ocr_batch::services::ocr=debug")
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let sample_path = args.get(1).map(String::as_str).unwrap_or("test_sample.png");
    let models_dir = Path::new(args.get(2).map(String::as_str).unwrap_or("models"));

    if !Path::new(sample_path).exists() {
        eprintln!("Image not found: {}", sample_path);
        std::process::exit(1);
    }

    info!("Loading image: {}", sample_path);
    let image = image::open(sample_path)?;
    info!("Image dimensions: {}x{}", image.width(), image.height());

    info!("Loading recognizer from: {}", models_dir.display());
    let recognizer = OnnxTextRecognizer::load(models_dir, Backend::Cpu);
    let recognized = recognizer.recognize(&image)?;

    println!("\n=== Results ===");
    println!("Confidence: {:.2}", recognized.confidence);
    if recognized.text.is_empty() {
        println!("Text: (empty)");
    } else {
        println!("Text: {}", recognized.text);
    }

    Ok(())
}
