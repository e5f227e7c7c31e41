use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{CdnError, CdnResult};
use crate::storage::{ContentStore, OriginalImage, VariantStore};
use crate::variant::{ImageId, VariantKey};

pub struct FileSystemContentStore {
    directory: PathBuf,
}

impl FileSystemContentStore {
    pub async fn open(dir: PathBuf) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { directory: dir })
    }

    #[inline]
    fn data_path(&self, image_id: &ImageId) -> PathBuf {
        self.directory.join(image_id.as_str())
    }

    #[inline]
    fn meta_path(&self, image_id: &ImageId) -> PathBuf {
        self.directory.join(format!("{}.json", image_id))
    }

    async fn read_meta(&self, image_id: &ImageId) -> CdnResult<OriginalImage> {
        let path = self.meta_path(image_id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(ref e) if e.kind() == ErrorKind::NotFound => {
                return Err(CdnError::storage(format!(
                    "original {} has no metadata record",
                    image_id
                )))
            },
            Err(other) => return Err(other.into()),
        };

        serde_json::from_slice(&raw)
            .map_err(|e| CdnError::storage(format!("corrupt metadata for {}: {}", image_id, e)))
    }
}

#[async_trait]
impl ContentStore for FileSystemContentStore {
    async fn put(
        &self,
        data: Bytes,
        extension: &str,
        content_type: &str,
    ) -> CdnResult<OriginalImage> {
        let image_id = ImageId::generate();
        let meta = OriginalImage {
            image_id: image_id.to_string(),
            extension: extension.to_ascii_lowercase(),
            content_type: content_type.to_string(),
            size: data.len(),
            checksum: crc32fast::hash(&data),
        };

        let encoded = serde_json::to_vec(&meta)
            .map_err(|e| CdnError::storage(format!("failed to encode metadata: {}", e)))?;

        // The data file marks existence so the metadata has to land first.
        write_atomic(&self.meta_path(&image_id), &encoded).await?;

        let path = self.data_path(&image_id);
        debug!("Storing original @ {:?}", &path);
        write_atomic(&path, &data).await?;

        Ok(meta)
    }

    async fn get(&self, image_id: &ImageId) -> CdnResult<Bytes> {
        let path = self.data_path(image_id);

        debug!("Retrieving original @ {:?}", &path);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(ref e) if e.kind() == ErrorKind::NotFound => {
                return Err(CdnError::NotFound(format!("original {}", image_id)))
            },
            Err(other) => return Err(other.into()),
        };

        let meta = self.read_meta(image_id).await?;
        if meta.size != data.len() || meta.checksum != crc32fast::hash(&data) {
            error!("Integrity check failed for original {}", image_id);
            return Err(CdnError::storage(format!(
                "original {} does not match its recorded checksum",
                image_id
            )));
        }

        Ok(data)
    }

    async fn delete(&self, image_id: &ImageId) -> CdnResult<()> {
        for path in [self.data_path(image_id), self.meta_path(image_id)] {
            debug!("Purging original @ {:?}", &path);

            match tokio::fs::remove_file(&path).await {
                Ok(()) => continue,
                Err(ref e) if e.kind() == ErrorKind::NotFound => continue,
                Err(other) => return Err(other.into()),
            }
        }

        Ok(())
    }
}

pub struct FileSystemVariantStore {
    directory: PathBuf,
}

impl FileSystemVariantStore {
    pub async fn open(dir: PathBuf) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { directory: dir })
    }

    /// Variants are grouped per original so a retention sweep can drop
    /// every derivation of an image with a single directory removal.
    #[inline]
    fn format_path(&self, key: &VariantKey) -> PathBuf {
        self.directory
            .join(key.image_id().as_str())
            .join(key.to_string())
    }
}

#[async_trait]
impl VariantStore for FileSystemVariantStore {
    async fn fetch(&self, key: &VariantKey) -> CdnResult<Option<Bytes>> {
        let path = self.format_path(key);

        match tokio::fs::read(&path).await {
            Ok(data) if data.is_empty() => {
                warn!("Ignoring empty variant @ {:?}", &path);
                Ok(None)
            },
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(other) => Err(other.into()),
        }
    }

    async fn store(&self, key: &VariantKey, data: Bytes) -> CdnResult<()> {
        let path = self.format_path(key);

        debug!("Storing variant @ {:?}", &path);
        write_atomic(&path, &data).await?;
        Ok(())
    }
}

/// Writes `data` to a uniquely named sibling temp file and renames it
/// over `path`, so readers only ever observe complete files.
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let (dir, name) = match (path.parent(), path.file_name()) {
        (Some(dir), Some(name)) => (dir, name.to_string_lossy()),
        _ => {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("{:?} is not a file path", path),
            ))
        },
    };

    let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().to_simple()));

    let mut file = match tokio::fs::File::create(&tmp).await {
        Ok(file) => file,
        Err(ref e) if e.kind() == ErrorKind::NotFound => {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::File::create(&tmp).await?
        },
        Err(other) => return Err(other),
    };

    let written = async {
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }

    Ok(())
}
