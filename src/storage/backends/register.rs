use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::filesystem::{FileSystemContentStore, FileSystemVariantStore};
use crate::storage::{ContentStore, VariantStore};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendConfigs {
    FileSystem {
        directory: PathBuf,
    },
}

/// The connected stores for originals and derived variants.
pub struct Backends {
    pub originals: Arc<dyn ContentStore>,
    pub variants: Arc<dyn VariantStore>,
}

impl BackendConfigs {
    pub async fn connect(&self) -> anyhow::Result<Backends> {
        match self {
            Self::FileSystem { directory } => {
                let originals = FileSystemContentStore::open(directory.join("originals")).await?;
                let variants = FileSystemVariantStore::open(directory.join("variants")).await?;

                Ok(Backends {
                    originals: Arc::new(originals),
                    variants: Arc::new(variants),
                })
            },
        }
    }
}
