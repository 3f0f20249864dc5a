// Page processor: detection -> reading order -> per-region recognition

use image::DynamicImage;
use std::time::Instant;
use tracing::{debug, error, instrument, trace, warn};

use crate::core::errors::DetectionError;
use crate::core::types::{
    FallbackReason, OrderedRegion, PageResult, PageSource, PageStatus, Region, RegionResult,
};
use crate::phases::reading_order::{ReadingOrderSorter, SortOptions};
use crate::services::capabilities::Capabilities;
use crate::utils::image_ops::{crop_region, decode_image};

/// Turns one page image into a `PageResult`.
///
/// Recognition failures stay inside their region and mark the page
/// `partial`. Decode or detection failures mark the page `failed`; whether
/// that ends the run is the orchestrator's call.
pub struct PageProcessor {
    capabilities: Capabilities,
    sorter: ReadingOrderSorter,
}

impl PageProcessor {
    pub fn new(capabilities: Capabilities, sort_options: SortOptions) -> Self {
        Self {
            capabilities,
            sorter: ReadingOrderSorter::new(sort_options),
        }
    }

    #[instrument(skip(self, page), fields(
        page_number = page.page_number,
        filename = %page.filename
    ))]
    pub fn process(&self, page: &PageSource) -> PageResult {
        let start = Instant::now();

        let image = match decode_image(&page.image_bytes) {
            Ok(image) => image,
            Err(e) => {
                error!("Page {} ({}) could not be decoded: {:#}", page.page_number, page.filename, e);
                return PageResult::failed(
                    &page.filename,
                    page.page_number,
                    format!("{:#}", e),
                    start.elapsed().as_secs_f64(),
                );
            }
        };

        let (regions, fallback) = match self.detect(&image) {
            Ok(detected) => detected,
            Err(e) => {
                error!("Detection failed on page {} ({}): {}", page.page_number, page.filename, e);
                return PageResult::failed(
                    &page.filename,
                    page.page_number,
                    e.to_string(),
                    start.elapsed().as_secs_f64(),
                );
            }
        };

        let ordered = self.sorter.sort(&regions);
        debug!("Page {}: {} regions in reading order", page.page_number, ordered.len());

        let results: Vec<RegionResult> = ordered
            .iter()
            .map(|ordered_region| self.recognize_region(&image, ordered_region))
            .collect();

        let status = if results.iter().any(|r| r.recognized.is_none()) {
            PageStatus::Partial
        } else {
            PageStatus::Ok
        };

        let processing_time = start.elapsed().as_secs_f64();
        debug!(
            "Page {} {} in {:.3}s ({} of {} regions recognized)",
            page.page_number,
            status,
            processing_time,
            results.iter().filter(|r| r.recognized.is_some()).count(),
            results.len()
        );

        PageResult {
            filename: page.filename.clone(),
            page_number: page.page_number,
            status,
            regions: results,
            processing_time,
            fallback,
            error: None,
        }
    }

    /// Detected regions, or the whole page when detection is unavailable or
    /// finds nothing.
    fn detect(
        &self,
        image: &DynamicImage,
    ) -> Result<(Vec<Region>, Option<FallbackReason>), DetectionError> {
        let whole_page = || {
            Region::covering(image.width(), image.height()).map_err(|_| {
                DetectionError::InvalidImage {
                    width: image.width(),
                    height: image.height(),
                }
            })
        };

        match self.capabilities.detector.detect(image) {
            Ok(regions) if regions.is_empty() => {
                debug!("No regions detected, reading whole page");
                Ok((vec![whole_page()?], Some(FallbackReason::NoRegionsDetected)))
            }
            Ok(regions) => Ok((regions, None)),
            Err(DetectionError::Unavailable(reason)) => {
                warn!("Detector unavailable ({}), reading whole page", reason);
                Ok((vec![whole_page()?], Some(FallbackReason::DetectorUnavailable)))
            }
            Err(e) => Err(e),
        }
    }

    fn recognize_region(&self, image: &DynamicImage, ordered: &OrderedRegion) -> RegionResult {
        let outcome = crop_region(image, &ordered.region)
            .and_then(|crop| self.capabilities.recognizer.recognize(&crop));

        match outcome {
            Ok(recognized) => {
                trace!(
                    "Region {} {:?}: {:?} ({:.2})",
                    ordered.reading_order,
                    ordered.region.bbox(),
                    recognized.text,
                    recognized.confidence
                );
                RegionResult {
                    reading_order: ordered.reading_order,
                    bbox: ordered.region,
                    recognized: Some(recognized),
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    "Recognition failed for region {} {:?}: {}",
                    ordered.reading_order,
                    ordered.region.bbox(),
                    e
                );
                RegionResult {
                    reading_order: ordered.reading_order,
                    bbox: ordered.region,
                    recognized: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
