use std::path::Path;

use anyhow::ensure;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::storage::BackendConfigs;

#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// The set storage backend configuration.
    pub backend: BackendConfigs,

    #[serde(default)]
    /// Defaults and limits applied when normalizing variant requests.
    pub images: ImageConfig,

    #[serde(default)]
    /// The output formats variants may be encoded to.
    pub formats: ImageFormats,

    #[serde(default)]
    /// Rules an upload must pass before it is stored.
    pub upload: UploadConfig,

    #[serde(default)]
    /// The maximum size in bytes of the in-memory variant cache.
    ///
    /// A size of `0` disables the in-memory layer entirely, every hit is
    /// then served from the variant store.
    pub cache_size: u64,

    #[serde(default)]
    /// The externally visible base URL, e.g. `https://cdn.example.com`.
    ///
    /// Upload responses link to images under this, falling back to the
    /// request's `Host` header when not set.
    pub public_url: Option<String>,
}

impl RuntimeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.images.max_width >= 1, "images.max_width must be at least 1");
        ensure!(
            (1..=100).contains(&self.images.default_quality),
            "images.default_quality must be within 1..=100, got {}",
            self.images.default_quality,
        );
        ensure!(
            self.formats.is_enabled(self.images.default_format),
            "the default format {} is disabled in the formats config",
            self.images.default_format,
        );
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ImageKind {
    /// The PNG encoding format.
    Png,

    /// The JPEG encoding format.
    #[serde(alias = "jpg")]
    #[strum(to_string = "jpeg", serialize = "jpg")]
    Jpeg,

    /// The WebP encoding format.
    Webp,

    /// The GIF encoding format.
    Gif,
}

impl ImageKind {
    pub fn from_content_type(kind: &str) -> Option<Self> {
        match kind {
            "image/png" => Some(Self::Png),
            "image/jpeg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn from_guessed_format(fmt: image::ImageFormat) -> Option<Self> {
        match fmt {
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Gif => Some(Self::Gif),
            image::ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn as_content_type(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Gif => "image/gif",
            ImageKind::Webp => "image/webp",
        }
    }

    pub fn as_file_extension(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpeg",
            ImageKind::Gif => "gif",
            ImageKind::Webp => "webp",
        }
    }

    pub fn variants() -> &'static [Self] {
        &[
            ImageKind::Png,
            ImageKind::Jpeg,
            ImageKind::Gif,
            ImageKind::Webp,
        ]
    }
}

#[derive(Debug, Copy, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_width")]
    /// The width used when a request does not specify one.
    ///
    /// Defaults to `800`.
    pub default_width: u32,

    #[serde(default = "default_max_width")]
    /// Requested widths above this are silently clamped down to it.
    ///
    /// Defaults to `2000`.
    pub max_width: u32,

    #[serde(default = "default_quality")]
    /// The encoder quality used when a request does not specify one.
    ///
    /// Defaults to `80`.
    pub default_quality: u8,

    #[serde(default = "default_format")]
    /// The output format used when a request does not specify one.
    ///
    /// Defaults to `webp`.
    pub default_format: ImageKind,

    #[serde(default)]
    /// The resampling filter used when downscaling.
    pub resize_filter: ResizeFilter,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            default_width: default_width(),
            max_width: default_max_width(),
            default_quality: default_quality(),
            default_format: default_format(),
            resize_filter: ResizeFilter::default(),
        }
    }
}

#[derive(Debug, Copy, Clone, Deserialize)]
pub struct ImageFormats {
    #[serde(default = "default_true")]
    /// Enable PNG re-encoding.
    ///
    /// Defaults to `true`.
    pub png: bool,

    #[serde(default = "default_true")]
    /// Enable JPEG re-encoding.
    ///
    /// Defaults to `true`.
    pub jpeg: bool,

    #[serde(default = "default_true")]
    /// Enable WebP re-encoding.
    ///
    /// Defaults to `true`.
    pub webp: bool,

    #[serde(default = "default_true")]
    /// Enable gif re-encoding.
    ///
    /// This is generally quite a slow encoder, buckets serving
    /// large images may want to turn it off.
    ///
    /// Defaults to `true`.
    pub gif: bool,
}

impl ImageFormats {
    pub fn is_enabled(&self, kind: ImageKind) -> bool {
        match kind {
            ImageKind::Png => self.png,
            ImageKind::Jpeg => self.jpeg,
            ImageKind::Gif => self.gif,
            ImageKind::Webp => self.webp,
        }
    }
}

impl Default for ImageFormats {
    fn default() -> Self {
        Self {
            png: true,
            jpeg: true,
            webp: true,
            gif: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_size")]
    /// The largest original accepted, in bytes.
    ///
    /// Defaults to 10 MiB.
    pub max_upload_size: usize,

    #[serde(default = "default_allowed_extensions")]
    /// Declared file extensions accepted on upload, compared case-insensitively.
    pub allowed_extensions: Vec<String>,

    #[serde(default)]
    /// A bearer token required by the upload route.
    ///
    /// Uploads are left open when this is not set.
    pub private_key: Option<String>,
}

impl UploadConfig {
    pub fn allows_extension(&self, ext: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size: default_max_upload_size(),
            allowed_extensions: default_allowed_extensions(),
            private_key: None,
        }
    }
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl Default for ResizeFilter {
    fn default() -> Self {
        Self::Triangle
    }
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_width() -> u32 {
    800
}

const fn default_max_width() -> u32 {
    2000
}

const fn default_quality() -> u8 {
    80
}

const fn default_format() -> ImageKind {
    ImageKind::Webp
}

const fn default_max_upload_size() -> usize {
    10 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}
