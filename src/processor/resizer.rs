use image::imageops::FilterType;
use image::DynamicImage;

use crate::variant::Width;

/// Fits the image to the requested width, preserving its aspect ratio.
///
/// Images already at or below the requested width are returned as-is,
/// variants are never upscaled.
pub fn resize(img: DynamicImage, width: Width, filter: FilterType) -> DynamicImage {
    match width {
        Width::Pixels(target) if target < img.width() => {
            let height = (img.height() as u64 * target as u64 / img.width() as u64).max(1);
            img.resize_exact(target, height as u32, filter)
        },
        _ => img,
    }
}
