use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use uuid::Uuid;

use crate::config::{ImageFormats, ImageKind, RuntimeConfig};
use crate::error::{CdnError, CdnResult};

/// The identifier of a stored original.
///
/// Generated ids are simple (hyphen-less) v4 UUIDs, ids coming from a
/// request are only accepted if they are made of ASCII alphanumerics and
/// `-` so they can never escape the storage directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(String);

impl ImageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_simple().to_string())
    }

    pub fn parse(raw: &str) -> CdnResult<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(CdnError::invalid(format!("malformed image id {:?}", raw)))
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ImageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Width {
    /// Keep the original resolution, only re-encode.
    Original,

    /// Fit the image to this many pixels wide.
    Pixels(u32),
}

impl Display for Width {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Width::Original => f.write_str("original"),
            Width::Pixels(px) => write!(f, "{}", px),
        }
    }
}

/// The defaults and bounds a raw request is normalized against.
#[derive(Debug, Copy, Clone)]
pub struct KeyLimits {
    pub default_width: u32,
    pub max_width: u32,
    pub default_quality: u8,
    pub default_format: ImageKind,
    pub formats: ImageFormats,
}

impl From<&RuntimeConfig> for KeyLimits {
    fn from(cfg: &RuntimeConfig) -> Self {
        Self {
            default_width: cfg.images.default_width,
            max_width: cfg.images.max_width,
            default_quality: cfg.images.default_quality,
            default_format: cfg.images.default_format,
            formats: cfg.formats,
        }
    }
}

#[cfg(test)]
impl Default for KeyLimits {
    fn default() -> Self {
        let images = crate::config::ImageConfig::default();
        Self {
            default_width: images.default_width,
            max_width: images.max_width,
            default_quality: images.default_quality,
            default_format: images.default_format,
            formats: ImageFormats::default(),
        }
    }
}

/// The canonical identity of a derived variant.
///
/// Two requests that normalize to equal keys are served by the same
/// stored variant and coalesce onto the same derivation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    image_id: ImageId,
    width: Width,
    quality: u8,
    format: ImageKind,
}

impl VariantKey {
    /// Builds a canonical key from raw request parameters.
    ///
    /// Absent parameters take their configured defaults, numeric
    /// parameters are clamped into range without signalling it, and
    /// anything that cannot be parsed is rejected with `InvalidParameter`.
    pub fn normalize(
        image_id: ImageId,
        raw_width: Option<&str>,
        raw_quality: Option<&str>,
        raw_format: Option<&str>,
        limits: &KeyLimits,
    ) -> CdnResult<Self> {
        let width = normalize_width(raw_width, limits)?;
        let quality = normalize_quality(raw_quality, limits)?;
        let format = normalize_format(raw_format, limits)?;

        Ok(Self {
            image_id,
            width,
            quality,
            format,
        })
    }

    #[inline]
    pub fn image_id(&self) -> &ImageId {
        &self.image_id
    }

    #[inline]
    pub fn width(&self) -> Width {
        self.width
    }

    #[inline]
    pub fn quality(&self) -> u8 {
        self.quality
    }

    #[inline]
    pub fn format(&self) -> ImageKind {
        self.format
    }
}

impl Display for VariantKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_w{}_q{}.{}",
            self.image_id,
            self.width,
            self.quality,
            self.format.as_file_extension(),
        )
    }
}

impl FromStr for VariantKey {
    type Err = CdnError;

    /// Parses the canonical `{id}_w{width}_q{quality}.{format}` form back
    /// into a key. The parts are taken verbatim, no defaults are applied.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CdnError::invalid(format!("malformed variant key {:?}", s));

        let (rest, ext) = s.rsplit_once('.').ok_or_else(malformed)?;
        let (rest, quality) = rest.rsplit_once("_q").ok_or_else(malformed)?;
        let (image_id, width) = rest.rsplit_once("_w").ok_or_else(malformed)?;

        let width = match width {
            "original" => Width::Original,
            px => Width::Pixels(px.parse().map_err(|_| malformed())?),
        };

        Ok(Self {
            image_id: ImageId::parse(image_id)?,
            width,
            quality: quality.parse().map_err(|_| malformed())?,
            format: ext.parse().map_err(|_| malformed())?,
        })
    }
}

fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|v| !v.is_empty())
}

fn normalize_width(raw: Option<&str>, limits: &KeyLimits) -> CdnResult<Width> {
    let max = limits.max_width.max(1) as i64;
    let requested = match present(raw) {
        None => limits.default_width as i64,
        Some(v) if v.eq_ignore_ascii_case("original") => return Ok(Width::Original),
        Some(v) => v
            .parse::<i64>()
            .map_err(|_| CdnError::invalid(format!("width {:?} is not an integer", v)))?,
    };

    Ok(Width::Pixels(requested.clamp(1, max) as u32))
}

fn normalize_quality(raw: Option<&str>, limits: &KeyLimits) -> CdnResult<u8> {
    let requested = match present(raw) {
        None => limits.default_quality as i64,
        Some(v) => v
            .parse::<i64>()
            .map_err(|_| CdnError::invalid(format!("quality {:?} is not an integer", v)))?,
    };

    Ok(requested.clamp(1, 100) as u8)
}

fn normalize_format(raw: Option<&str>, limits: &KeyLimits) -> CdnResult<ImageKind> {
    let kind = match present(raw) {
        None => limits.default_format,
        Some(v) => v
            .parse::<ImageKind>()
            .map_err(|_| CdnError::invalid(format!("unsupported format {:?}", v)))?,
    };

    if !limits.formats.is_enabled(kind) {
        return Err(CdnError::invalid(format!("format {} is disabled", kind)));
    }

    Ok(kind)
}
