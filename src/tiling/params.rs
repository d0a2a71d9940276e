//! Parameter types for tiling.
//!
//! - [`TileFormat`]: the encodings tiles and fallback renditions can be written in.
//! - [`FallbackMode`]: what to do when the fallback rendition can't be encoded.
//! - [`Quality`]: lossy encoding quality (1–100, default 90). Clamped on construction.

use serde::{Deserialize, Serialize};

/// Output encoding for tiles and fallback renditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TileFormat {
    #[default]
    #[serde(rename = "jpg")]
    Jpeg,
    #[serde(rename = "png")]
    Png,
}

impl TileFormat {
    /// File extension used in IIIF paths (`default.<ext>`).
    pub fn extension(self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpg",
            TileFormat::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Png => "image/png",
        }
    }

    /// The matching `image` crate format, for comparing against sniffed input.
    pub fn image_format(self) -> image::ImageFormat {
        match self {
            TileFormat::Jpeg => image::ImageFormat::Jpeg,
            TileFormat::Png => image::ImageFormat::Png,
        }
    }
}

/// Policy for sources whose fallback rendition can't be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Fail the image with `UnsupportedFallbackFormat`; nothing is committed.
    #[default]
    Require,
    /// Commit the pyramid without a fallback rendition.
    Skip,
}

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}
