//! The per-pyramid `info.json` descriptor (IIIF Image API 3, level 0).
//!
//! Written by the tile generator, read back by the manifest builder and by
//! the idempotency check, which returns the recorded dimensions without
//! decoding the source again.
//!
//! ```json
//! {
//!   "@context": "http://iiif.io/api/image/3/context.json",
//!   "id": "https://example.org/images/p1",
//!   "type": "ImageService3",
//!   "protocol": "http://iiif.io/api/image",
//!   "profile": "level0",
//!   "width": 1000,
//!   "height": 800,
//!   "tiles": [{ "width": 256, "height": 256, "scaleFactors": [1, 2, 4] }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_FILENAME: &str = "info.json";
pub const IMAGE_CONTEXT: &str = "http://iiif.io/api/image/3/context.json";
pub const IMAGE_PROTOCOL: &str = "http://iiif.io/api/image";
pub const IMAGE_SERVICE_TYPE: &str = "ImageService3";
pub const LEVEL0_PROFILE: &str = "level0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub protocol: String,
    pub profile: String,
    pub width: u32,
    pub height: u32,
    pub tiles: Vec<TileInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileInfo {
    pub width: u32,
    pub height: u32,
    pub scale_factors: Vec<u32>,
}

impl ImageInfo {
    pub fn new(
        id: impl Into<String>,
        width: u32,
        height: u32,
        tile_size: u32,
        scale_factors: Vec<u32>,
    ) -> Self {
        Self {
            context: IMAGE_CONTEXT.to_string(),
            id: id.into(),
            kind: IMAGE_SERVICE_TYPE.to_string(),
            protocol: IMAGE_PROTOCOL.to_string(),
            profile: LEVEL0_PROFILE.to_string(),
            width,
            height,
            tiles: vec![TileInfo {
                width: tile_size,
                height: tile_size,
                scale_factors,
            }],
        }
    }

    /// Nominal tile edge, if the descriptor advertises tiles.
    pub fn tile_size(&self) -> Option<u32> {
        self.tiles.first().map(|t| t.width)
    }

    pub fn scale_factors(&self) -> &[u32] {
        self.tiles
            .first()
            .map(|t| t.scale_factors.as_slice())
            .unwrap_or(&[])
    }

    /// Load `info.json` from a pyramid directory.
    pub fn load(pyramid_dir: &Path) -> Result<Self, DescriptorError> {
        let path = descriptor_path(pyramid_dir);
        let content = std::fs::read_to_string(&path).map_err(|source| DescriptorError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| DescriptorError::Parse { path, source })
    }

    /// Write `info.json` into a pyramid directory.
    pub fn save(&self, pyramid_dir: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(descriptor_path(pyramid_dir), json)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DescriptorError {
    #[error("cannot read descriptor {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid descriptor {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub fn descriptor_path(pyramid_dir: &Path) -> PathBuf {
    pyramid_dir.join(DESCRIPTOR_FILENAME)
}
