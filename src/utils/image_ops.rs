use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::core::errors::RecognitionError;
use crate::core::types::Region;

/// Decode page bytes in any format the `image` crate recognizes.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).context("Failed to decode page image")
}

/// Crop `region` out of `img`, first clamping it to the image bounds.
///
/// A region with no area left after clamping yields `EmptyCrop`.
pub fn crop_region(img: &DynamicImage, region: &Region) -> Result<DynamicImage, RecognitionError> {
    let clamped = region
        .clamp_to(img.width(), img.height())
        .ok_or(RecognitionError::EmptyCrop {
            bbox: region.bbox(),
        })?;

    // Clamped coordinates are non-negative and within the image
    Ok(img.crop_imm(
        clamped.x1() as u32,
        clamped.y1() as u32,
        clamped.width() as u32,
        clamped.height() as u32,
    ))
}

/// Encode an image to PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("Failed to encode image as PNG")?;
    Ok(png_bytes)
}
