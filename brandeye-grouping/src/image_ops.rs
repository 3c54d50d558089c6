//! Decoding the shelf image and cutting detection crops

use crate::error::GroupingError;
use brandeye_core::BBox;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, GroupingError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| GroupingError::InvalidImage(format!("cannot decode image: {}", e)))?
        .to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(GroupingError::InvalidImage("image has no pixels".to_string()));
    }
    Ok(image)
}

/// Region `(x, y, width, height)` of `bbox` inside a `width` x `height` image.
///
/// Boxes are clamped to the image. A box lying entirely outside collapses onto a
/// one-pixel sliver at the nearest edge so every detection still has a crop.
pub fn crop_region(bbox: &BBox, width: u32, height: u32) -> (u32, u32, u32, u32) {
    if let Some(c) = bbox.clamp_to(width, height) {
        return (c.x1 as u32, c.y1 as u32, (c.x2 - c.x1) as u32, (c.y2 - c.y1) as u32);
    }
    let max_x = width.saturating_sub(1) as i64;
    let max_y = height.saturating_sub(1) as i64;
    let x = (bbox.x1 as i64).clamp(0, max_x) as u32;
    let y = (bbox.y1 as i64).clamp(0, max_y) as u32;
    let w = (bbox.width().max(1) as u64).min((width - x) as u64) as u32;
    let h = (bbox.height().max(1) as u64).min((height - y) as u64) as u32;
    (x, y, w.max(1), h.max(1))
}

pub fn crop(image: &RgbImage, bbox: &BBox) -> RgbImage {
    let (x, y, w, h) = crop_region(bbox, image.width(), image.height());
    image::imageops::crop_imm(image, x, y, w, h).to_image()
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, GroupingError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image.clone()).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
