use std::io;

use thiserror::Error;

pub type CdnResult<T> = Result<T, CdnError>;

/// Every failure the cache and service can surface to a caller.
///
/// The type is `Clone` because a single derivation outcome is handed
/// to every request that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CdnError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl CdnError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

impl From<io::Error> for CdnError {
    fn from(e: io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<image::ImageError> for CdnError {
    fn from(e: image::ImageError) -> Self {
        Self::Transcode(e.to_string())
    }
}
