//! Content fingerprints for idempotent pyramid generation.
//!
//! Tiling a large scan takes seconds to minutes, so a pyramid is regenerated
//! only when something that affects its bytes has changed. Existence of the
//! output directory alone is not enough: a source image replaced under the
//! same identifier, or a changed tile size, would go unnoticed.
//!
//! # Design
//!
//! Every committed pyramid carries a sidecar `.fingerprint.json` next to its
//! `info.json`:
//!
//! - **`source_hash`**: SHA-256 of the source file contents. Content-based
//!   rather than mtime-based so it survives `git checkout` and copies between
//!   machines.
//! - **`params_hash`**: SHA-256 of everything else that ends up in the output:
//!   tile size, tile encoding and quality, fallback format and mode, and the
//!   base URL written into `info.json`.
//!
//! A pyramid is reused when the sidecar exists, parses, has the current
//! [`FINGERPRINT_VERSION`], and both hashes match. Anything else (missing,
//! corrupt, old version) is treated as a miss.

use crate::tiling::{FallbackMode, Quality, TileFormat};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the fingerprint sidecar within a pyramid directory.
pub const FINGERPRINT_FILENAME: &str = ".fingerprint.json";

/// Version of the sidecar format. Bump this to invalidate all existing
/// pyramids when the layout or key computation changes.
pub const FINGERPRINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint {
    pub version: u32,
    pub source_hash: String,
    pub params_hash: String,
}

impl Fingerprint {
    pub fn new(source_hash: String, params_hash: String) -> Self {
        Self {
            version: FINGERPRINT_VERSION,
            source_hash,
            params_hash,
        }
    }

    /// Load the sidecar from a pyramid directory. Returns `None` if the file
    /// doesn't exist, can't be parsed, or has a different version.
    pub fn load(pyramid_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(fingerprint_path(pyramid_dir)).ok()?;
        let fingerprint: Self = serde_json::from_str(&content).ok()?;
        (fingerprint.version == FINGERPRINT_VERSION).then_some(fingerprint)
    }

    pub fn save(&self, pyramid_dir: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(fingerprint_path(pyramid_dir), json)
    }
}

pub fn fingerprint_path(pyramid_dir: &Path) -> PathBuf {
    pyramid_dir.join(FINGERPRINT_FILENAME)
}

/// SHA-256 of a byte slice, as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of the parameters that shape a pyramid's output.
pub fn hash_pyramid_params(
    tile_size: u32,
    tile_format: TileFormat,
    tile_quality: Quality,
    fallback_format: TileFormat,
    fallback_mode: FallbackMode,
    base_url: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"pyramid\0");
    hasher.update(tile_size.to_le_bytes());
    hasher.update(tile_format.extension().as_bytes());
    hasher.update(b"\0");
    hasher.update(tile_quality.value().to_le_bytes());
    hasher.update(fallback_format.extension().as_bytes());
    hasher.update(b"\0");
    hasher.update(match fallback_mode {
        FallbackMode::Require => b"\x01",
        FallbackMode::Skip => b"\x00",
    });
    hasher.update(base_url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Summary of what a pass did with each image.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassStats {
    pub generated: u32,
    pub regenerated: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl PassStats {
    pub fn total(&self) -> u32 {
        self.generated + self.regenerated + self.skipped + self.failed
    }
}

impl fmt::Display for PassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} generated, {} regenerated, {} unchanged",
            self.generated, self.regenerated, self.skipped
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        write!(f, " ({} total)", self.total())
    }
}
