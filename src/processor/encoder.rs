use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageOutputFormat};

use crate::config::ImageKind;
use crate::error::{CdnError, CdnResult};

/// Encodes the image into the given format.
///
/// `quality` drives the lossy encoders (JPEG and WebP), PNG and GIF are
/// lossless and ignore it.
pub fn encode_to(img: &DynamicImage, kind: ImageKind, quality: u8) -> CdnResult<Bytes> {
    let mut buff = Cursor::new(Vec::new());
    match kind {
        ImageKind::Jpeg => {
            // The JPEG encoder has no alpha channel support.
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_to(&mut buff, ImageOutputFormat::Jpeg(quality))?
        },
        ImageKind::Png => img.write_to(&mut buff, ImageOutputFormat::Png)?,
        ImageKind::Gif => {
            DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buff, ImageOutputFormat::Gif)?
        },
        ImageKind::Webp => return encode_webp(img, quality),
    }

    Ok(Bytes::from(buff.into_inner()))
}

fn encode_webp(img: &DynamicImage, quality: u8) -> CdnResult<Bytes> {
    // libwebp only takes 8-bit RGB or RGBA buffers.
    let normalized = if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };

    let encoder = webp::Encoder::from_image(&normalized)
        .map_err(|e| CdnError::Transcode(format!("webp encoder rejected image: {}", e)))?;
    // libwebp rejects sides over 16383px, `encode` would panic on that.
    let encoded = encoder
        .encode_simple(false, quality as f32)
        .map_err(|e| CdnError::Transcode(format!("webp encoding failed: {:?}", e)))?;

    Ok(Bytes::copy_from_slice(&encoded))
}
