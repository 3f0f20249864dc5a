// Local CJK line recognizer: CTC model over a tab-separated vocabulary

use anyhow::Context;
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::value::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::errors::{RecognitionError, RecognitionResult};
use crate::core::types::{Backend, RecognizedText};
use crate::services::capabilities::TextRecognizer;
use crate::services::onnx_builder::ModelSlot;

/// OCR model input dimensions
const TARGET_HEIGHT: u32 = 60;
const MIN_WIDTH: u32 = 10;

pub fn model_path(models_dir: &Path) -> PathBuf {
    models_dir.join("ocr").join("ocr.onnx")
}

pub fn vocab_path(models_dir: &Path) -> PathBuf {
    models_dir.join("ocr").join("cjk_vocab.txt")
}

/// Parse a vocabulary file (format: `index\tchar`, one per line).
///
/// Indices 0 and 32..97 default to their ASCII characters; the file
/// overrides them. `<space>` maps to a space and `<blank>` entries are
/// skipped.
pub fn parse_vocabulary(content: &str) -> HashMap<usize, String> {
    let mut vocab: HashMap<usize, String> = (32u8..97)
        .map(|b| (b as usize, (b as char).to_string()))
        .collect();
    vocab.insert(0, " ".to_string());

    for line in content.lines() {
        let Some((idx_str, token)) = line.split_once('\t') else {
            continue;
        };
        let Ok(idx) = idx_str.trim().parse::<usize>() else {
            continue;
        };
        match token {
            "<blank>" => continue,
            "<space>" => vocab.insert(idx, " ".to_string()),
            other => vocab.insert(idx, other.to_string()),
        };
    }

    vocab
}

/// CTC greedy decode over `[seq_len, num_classes]` logits.
///
/// Collapses repeats, drops the blank class and averages the softmax
/// probability of every emitted symbol.
fn ctc_greedy_decode(
    logits: &[f32],
    seq_len: usize,
    num_classes: usize,
    blank_index: usize,
    vocab: &HashMap<usize, String>,
) -> (String, f32) {
    let mut text = String::new();
    let mut probabilities = Vec::new();
    let mut prev_idx: Option<usize> = None;

    for step in logits.chunks_exact(num_classes).take(seq_len) {
        let (best_idx, best_val) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });

        if best_idx != blank_index && Some(best_idx) != prev_idx {
            text.push_str(vocab.get(&best_idx).map(String::as_str).unwrap_or("?"));
            let denominator: f32 = step.iter().map(|v| (v - best_val).exp()).sum();
            probabilities.push(1.0 / denominator);
        }
        prev_idx = Some(best_idx);
    }

    let confidence = if probabilities.is_empty() {
        0.0
    } else {
        probabilities.iter().sum::<f32>() / probabilities.len() as f32
    };
    (text, confidence)
}

/// CTC text line recognizer (`data`, `seq_lengths` in; logits out).
pub struct OnnxTextRecognizer {
    model: ModelSlot,
    vocab: HashMap<usize, String>,
}

impl OnnxTextRecognizer {
    /// Load `ocr/ocr.onnx` and `ocr/cjk_vocab.txt` from `models_dir`. A
    /// missing file leaves the recognizer unavailable rather than failing.
    pub fn load(models_dir: &Path, backend: Backend) -> Self {
        let vocab = match std::fs::read_to_string(vocab_path(models_dir))
            .with_context(|| format!("Failed to read OCR vocabulary in {}", models_dir.display()))
        {
            Ok(content) => parse_vocabulary(&content),
            Err(e) => {
                warn!("⚠️  OCR vocabulary unavailable: {:#}", e);
                return Self {
                    model: ModelSlot::Unavailable(format!("{:#}", e)),
                    vocab: HashMap::new(),
                };
            }
        };

        let model = ModelSlot::load(&model_path(models_dir), backend, "OCR");
        if model.is_ready() {
            info!("OCR recognizer initialized: vocab_size={}", vocab.len());
        }
        Self { model, vocab }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_ready()
    }

    /// Resize to the model's line height keeping aspect ratio, normalize to
    /// [0, 1] and lay out as `[1, 3, H, W]`.
    fn preprocess_image(&self, image: &DynamicImage) -> RecognitionResult<(Array4<f32>, i32)> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(RecognitionError::Failed(format!("empty crop {}x{}", w, h)));
        }

        let scale = TARGET_HEIGHT as f32 / h as f32;
        let new_w = ((w as f32 * scale) as u32).max(MIN_WIDTH);

        let rgb = image
            .resize_exact(new_w, TARGET_HEIGHT, image::imageops::FilterType::Lanczos3)
            .to_rgb8();

        let mut tensor = Array4::<f32>::zeros((1, 3, TARGET_HEIGHT as usize, new_w as usize));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        // seq_length = width / 4 (LSTM stride)
        Ok((tensor, (new_w / 4) as i32))
    }
}

impl TextRecognizer for OnnxTextRecognizer {
    fn recognize(&self, crop: &DynamicImage) -> RecognitionResult<RecognizedText> {
        let session = match &self.model {
            ModelSlot::Ready(session) => session,
            ModelSlot::Unavailable(reason) => {
                return Err(RecognitionError::Unavailable(reason.clone()))
            }
        };

        let (tensor, seq_length) = self.preprocess_image(crop)?;
        let data_value = Value::from_array(tensor)?;
        let seq_lengths_value = Value::from_array(([1usize], vec![seq_length]))?;

        let (dims, logits) = {
            let mut session = session.lock();
            let outputs = session.run(ort::inputs![
                "data" => data_value,
                "seq_lengths" => seq_lengths_value
            ])?;

            // Named output first, then whatever comes first
            let (shape, logits) = match outputs.get("output") {
                Some(output) => output.try_extract_tensor::<f32>()?,
                None => {
                    let first_key = outputs
                        .keys()
                        .next()
                        .ok_or_else(|| RecognitionError::Failed("no outputs from OCR model".into()))?;
                    outputs[first_key].try_extract_tensor::<f32>()?
                }
            };
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            (dims, logits.to_vec())
        };

        let (seq_len, num_classes) = match dims.as_slice() {
            [s, 1, v] => (*s, *v),
            [1, s, v] => (*s, *v),
            [s, v] => (*s, *v),
            _ => {
                return Err(RecognitionError::Failed(format!(
                    "unexpected logits shape: {:?}",
                    dims
                )))
            }
        };
        if num_classes == 0 {
            return Err(RecognitionError::Failed("model produced no classes".into()));
        }

        // Blank is the last class
        let (text, confidence) =
            ctc_greedy_decode(&logits, seq_len, num_classes, num_classes - 1, &self.vocab);

        debug!("OCR result: '{}' (confidence: {:.2})", text, confidence);
        Ok(RecognizedText::new(text, confidence))
    }
}
