use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;

use crate::cache::VariantCache;
use crate::config::{ImageKind, RuntimeConfig};
use crate::error::{CdnError, CdnResult};
use crate::processor::ImageTranscoder;
use crate::storage::ContentStore;
use crate::variant::{ImageId, KeyLimits, VariantKey};

#[derive(Debug, Serialize)]
pub struct UploadInfo {
    /// The generated ID for the image.
    ///
    /// This is used to request variants of the image.
    pub image_id: String,

    /// The format sniffed from the uploaded bytes.
    pub format: ImageKind,

    /// The size of the original in bytes.
    pub size: usize,

    /// The time spent processing the image in seconds.
    pub processing_time: f32,

    /// The crc32 checksum of the uploaded image.
    pub checksum: u32,

    /// Where the image is served from.
    pub url: String,

    /// Example variant requests for the image.
    pub usage: UsageLinks,
}

#[derive(Debug, Serialize)]
pub struct UsageLinks {
    pub original: String,
    pub resize: String,
    pub quality: String,
    pub both: String,
}

impl UsageLinks {
    fn for_url(url: &str) -> Self {
        Self {
            original: format!("{}?w=original", url),
            resize: format!("{}?w=500", url),
            quality: format!("{}?q=75", url),
            both: format!("{}?w=500&q=75", url),
        }
    }
}

/// A resolved variant ready to be served.
#[derive(Debug, Clone)]
pub struct Variant {
    pub key: VariantKey,
    pub data: Bytes,
}

impl Variant {
    #[inline]
    pub fn content_type(&self) -> &'static str {
        self.key.format().as_content_type()
    }
}

pub struct CdnService {
    config: Arc<RuntimeConfig>,
    limits: KeyLimits,
    originals: Arc<dyn ContentStore>,
    cache: VariantCache,
}

impl CdnService {
    pub fn new(
        config: Arc<RuntimeConfig>,
        originals: Arc<dyn ContentStore>,
        cache: VariantCache,
    ) -> Self {
        Self {
            limits: KeyLimits::from(config.as_ref()),
            config,
            originals,
            cache,
        }
    }

    /// Connects the configured backends and wires up the codec backed
    /// transcoder.
    pub async fn from_config(config: Arc<RuntimeConfig>) -> anyhow::Result<Self> {
        let backends = config.backend.connect().await?;
        let transcoder = Arc::new(ImageTranscoder::new(config.images.resize_filter.into()));
        let cache = VariantCache::new(
            backends.originals.clone(),
            backends.variants,
            transcoder,
            config.cache_size,
        );

        Ok(Self::new(config, backends.originals, cache))
    }

    #[inline]
    pub fn cfg(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Validates and stores an original, `base_url` is the scheme and
    /// authority the returned links are rooted at.
    pub async fn upload(
        &self,
        data: Bytes,
        extension: &str,
        content_type: &str,
        base_url: &str,
    ) -> CdnResult<UploadInfo> {
        let instant = Instant::now();
        let extension = extension.trim_start_matches('.');
        let format = self.validate_upload(&data, extension, content_type)?;

        let meta = self.originals.put(data, extension, content_type).await?;
        let processing_time = instant.elapsed().as_secs_f32();

        info!(
            "Stored original {} ({}, {} bytes) in {:.3}s",
            meta.image_id, format, meta.size, processing_time,
        );

        let url = format!("{}/v1/images/{}", base_url.trim_end_matches('/'), meta.image_id);
        Ok(UploadInfo {
            usage: UsageLinks::for_url(&url),
            url,
            image_id: meta.image_id,
            format,
            size: meta.size,
            processing_time,
            checksum: meta.checksum,
        })
    }

    pub async fn retrieve(
        &self,
        image_id: &str,
        raw_width: Option<&str>,
        raw_quality: Option<&str>,
        raw_format: Option<&str>,
    ) -> CdnResult<Variant> {
        let image_id = ImageId::parse(image_id)?;
        let key = VariantKey::normalize(image_id, raw_width, raw_quality, raw_format, &self.limits)?;

        let data = self.cache.get_or_create(&key).await?;
        Ok(Variant { key, data })
    }

    /// Checks the upload against the configured rules, returning the
    /// format sniffed from its content.
    fn validate_upload(
        &self,
        data: &[u8],
        extension: &str,
        content_type: &str,
    ) -> CdnResult<ImageKind> {
        let rules = &self.config.upload;

        if data.is_empty() {
            return Err(CdnError::invalid("upload is empty"));
        }

        if data.len() > rules.max_upload_size {
            return Err(CdnError::invalid(format!(
                "upload of {} bytes exceeds the {} byte limit",
                data.len(),
                rules.max_upload_size,
            )));
        }

        if !rules.allows_extension(extension) {
            return Err(CdnError::invalid(format!(
                "extension {:?} is not allowed",
                extension
            )));
        }

        let declared: mime::Mime = content_type
            .parse()
            .map_err(|_| CdnError::invalid(format!("malformed content type {:?}", content_type)))?;
        if declared.type_() != mime::IMAGE {
            return Err(CdnError::invalid(format!(
                "content type {} is not an image",
                declared
            )));
        }

        image::guess_format(data)
            .ok()
            .and_then(ImageKind::from_guessed_format)
            .ok_or_else(|| CdnError::invalid("upload is not a supported image"))
    }
}
