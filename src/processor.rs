use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use async_trait::async_trait;
use bytes::Bytes;
use image::imageops::FilterType;
use tokio::sync::oneshot;

use crate::config::ImageKind;
use crate::error::{CdnError, CdnResult};
use crate::variant::{VariantKey, Width};

pub mod encoder;
pub mod resizer;

#[cfg(test)]
pub mod mock;

/// The output parameters of a single transcode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub width: Width,
    pub quality: u8,
    pub format: ImageKind,
}

impl From<&VariantKey> for TranscodeRequest {
    fn from(key: &VariantKey) -> Self {
        Self {
            width: key.width(),
            quality: key.quality(),
            format: key.format(),
        }
    }
}

/// Turns original image bytes into the bytes of a variant.
///
/// Implementations must be deterministic, the same original and request
/// always produce the same output.
#[async_trait]
pub trait Transcoder: Sync + Send + 'static {
    async fn transcode(&self, original: Bytes, request: TranscodeRequest) -> CdnResult<Bytes>;
}

/// The codec backed transcoder.
///
/// Decoding, resampling and encoding are CPU bound so they run on the
/// rayon pool rather than on the async runtime's workers.
pub struct ImageTranscoder {
    filter: FilterType,
}

impl ImageTranscoder {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

#[async_trait]
impl Transcoder for ImageTranscoder {
    async fn transcode(&self, original: Bytes, request: TranscodeRequest) -> CdnResult<Bytes> {
        let filter = self.filter;
        let (tx, rx) = oneshot::channel();

        rayon::spawn(move || {
            // A panic on the global pool aborts the process.
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                transcode_blocking(&original, request, filter)
            }))
            .unwrap_or_else(|payload| Err(CdnError::Transcode(panic_message(&*payload))));
            let _ = tx.send(result);
        });

        rx.await
            .map_err(|_| CdnError::Transcode("encoder worker exited without a result".into()))?
    }
}

fn transcode_blocking(
    original: &[u8],
    request: TranscodeRequest,
    filter: FilterType,
) -> CdnResult<Bytes> {
    let img = image::load_from_memory(original)?;
    let img = resizer::resize(img, request.width, filter);
    encoder::encode_to(&img, request.format, request.quality)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());

    format!("codec panicked: {}", detail)
}
