use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CdnResult;
use crate::variant::{ImageId, VariantKey};

/// What is known about a stored original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalImage {
    /// The generated id the original is addressed by.
    pub image_id: String,

    /// The file extension the uploader declared.
    pub extension: String,

    /// The MIME type the uploader declared.
    pub content_type: String,

    /// The size of the original in bytes.
    pub size: usize,

    /// The crc32 checksum of the original bytes.
    pub checksum: u32,
}

/// Durable, immutable storage of uploaded originals.
#[async_trait]
pub trait ContentStore: Sync + Send + 'static {
    /// Stores a new original under a freshly generated id.
    async fn put(
        &self,
        data: Bytes,
        extension: &str,
        content_type: &str,
    ) -> CdnResult<OriginalImage>;

    /// Fetches the bytes of an original, failing with `NotFound` if the
    /// id was never stored or has since been removed.
    async fn get(&self, image_id: &ImageId) -> CdnResult<Bytes>;

    /// Removes an original. Removing an unknown id is not an error.
    async fn delete(&self, image_id: &ImageId) -> CdnResult<()>;
}

/// The persistent namespace of derived variants.
///
/// Implementations must make `store` atomic: a concurrent `fetch`, even
/// from another process, sees either the previous state or the complete
/// new variant, never a partial write.
#[async_trait]
pub trait VariantStore: Sync + Send + 'static {
    async fn fetch(&self, key: &VariantKey) -> CdnResult<Option<Bytes>>;

    async fn store(&self, key: &VariantKey, data: Bytes) -> CdnResult<()>;
}
