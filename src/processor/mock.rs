use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{TranscodeRequest, Transcoder};
use crate::error::{CdnError, CdnResult};

/// A deterministic transcoder that never touches a codec.
///
/// The output encodes the request and a checksum of the input, so equal
/// inputs always give byte-identical outputs.
pub struct CountingTranscoder {
    calls: AtomicUsize,
    delay: Duration,
    failing: AtomicBool,
}

impl CountingTranscoder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for CountingTranscoder {
    async fn transcode(&self, original: Bytes, request: TranscodeRequest) -> CdnResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(CdnError::Transcode("injected failure".into()));
        }

        let out = format!(
            "{}|w{}|q{}|{:08x}",
            request.format,
            request.width,
            request.quality,
            crc32fast::hash(&original),
        );
        Ok(Bytes::from(out))
    }
}
