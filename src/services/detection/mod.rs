use image::DynamicImage;
use ndarray::{arr2, Array2, Array4};
use ort::value::Value;
use std::time::Instant;
use tracing::{debug, trace};

use crate::core::config::DetectionConfig;
use crate::core::errors::{DetectionError, DetectionResult};
use crate::core::types::{Backend, Region};
use crate::services::capabilities::TextDetector;
use crate::services::onnx_builder::ModelSlot;

/// Raw model output above the confidence threshold, before NMS
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    bbox: [i32; 4],
    confidence: f32,
}

/// RT-DETR text region detector (`images`, `orig_target_sizes` in;
/// `labels`, `boxes`, `scores` out, boxes in original pixel coordinates).
pub struct OnnxTextDetector {
    model: ModelSlot,
    config: DetectionConfig,
}

impl OnnxTextDetector {
    /// Never fails: a missing or broken model makes every `detect` call
    /// report `Unavailable`.
    pub fn load(config: DetectionConfig, backend: Backend) -> Self {
        let model = ModelSlot::load(&config.model_path, backend, "detector");
        Self { model, config }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_ready()
    }

    fn preprocess_image(&self, img: &DynamicImage) -> (Array4<f32>, Array2<i64>) {
        let target_size = self.config.target_size;
        trace!(
            "Preprocessing image: {}x{} → {}x{}",
            img.width(),
            img.height(),
            target_size,
            target_size
        );

        let original_size = arr2(&[[img.width() as i64, img.height() as i64]]);

        let resized = img.resize_exact(
            target_size,
            target_size,
            image::imageops::FilterType::Triangle,
        );
        let rgb_img = resized.to_rgb8();

        let target = target_size as usize;
        let mut array = Array4::<f32>::zeros((1, 3, target, target));

        for (x, y, pixel) in rgb_img.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            array[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            array[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        (array, original_size)
    }

    /// Turn raw model outputs into page regions: label and confidence filter,
    /// NMS, then clamp to the page and drop anything degenerate.
    fn postprocess(
        &self,
        labels: &[i64],
        boxes: &[f32],
        scores: &[f32],
        width: u32,
        height: u32,
    ) -> Vec<Region> {
        let count = labels.len().min(scores.len()).min(boxes.len() / 4);
        trace!("Raw detections from model: {}", count);

        let candidates: Vec<Candidate> = (0..count)
            .filter(|&i| {
                self.config.text_labels.contains(&labels[i])
                    && scores[i] >= self.config.confidence_threshold
            })
            .map(|i| Candidate {
                bbox: [
                    boxes[i * 4] as i32,
                    boxes[i * 4 + 1] as i32,
                    boxes[i * 4 + 2] as i32,
                    boxes[i * 4 + 3] as i32,
                ],
                confidence: scores[i],
            })
            .collect();

        debug!(
            "Filtered {} detections above confidence threshold {:.2}",
            candidates.len(),
            self.config.confidence_threshold
        );

        nms(candidates, self.config.iou_threshold)
            .into_iter()
            .filter_map(|c| {
                let [x1, y1, x2, y2] = c.bbox;
                Region::new(x1, y1, x2, y2).ok()?.clamp_to(width, height)
            })
            .collect()
    }
}

impl TextDetector for OnnxTextDetector {
    fn detect(&self, image: &DynamicImage) -> DetectionResult<Vec<Region>> {
        let session = match &self.model {
            ModelSlot::Ready(session) => session,
            ModelSlot::Unavailable(reason) => {
                return Err(DetectionError::Unavailable(reason.clone()))
            }
        };

        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(DetectionError::InvalidImage { width, height });
        }

        let start = Instant::now();
        let (preprocessed, original_size) = self.preprocess_image(image);
        let images_value = Value::from_array(preprocessed)?;
        let sizes_value = Value::from_array(original_size)?;

        let (labels, boxes, scores) = {
            let mut session = session.lock();
            let outputs = session.run(ort::inputs![
                "images" => images_value,
                "orig_target_sizes" => sizes_value
            ])?;

            let (_labels_shape, labels) = outputs["labels"].try_extract_tensor::<i64>()?;
            let (_boxes_shape, boxes) = outputs["boxes"].try_extract_tensor::<f32>()?;
            let (_scores_shape, scores) = outputs["scores"].try_extract_tensor::<f32>()?;
            (labels.to_vec(), boxes.to_vec(), scores.to_vec())
        };

        let regions = self.postprocess(&labels, &boxes, &scores, width, height);
        debug!(
            "✓ Detection completed in {:.2}ms: {} text regions",
            start.elapsed().as_secs_f64() * 1000.0,
            regions.len()
        );
        Ok(regions)
    }
}

fn calculate_iou(box1: &[i32; 4], box2: &[i32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let area = |b: &[i32; 4]| ((b[2] - b[0]) as f32) * ((b[3] - b[1]) as f32);
    let intersection = ((x2 - x1) as f32) * ((y2 - y1) as f32);
    let union = area(box1) + area(box2) - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression, highest confidence first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if keep
            .iter()
            .all(|kept| calculate_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        } else {
            trace!("NMS: suppressed {:?}", candidate.bbox);
        }
    }
    keep
}
