//! Configuration module.
//!
//! Handles loading, validating, and merging `iiif.toml`. User values are laid
//! over the stock defaults key by key, so a config file only needs the keys it
//! wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! base_url = "http://localhost:8000"  # Public URL the output root is served from
//!
//! [tiles]
//! size = 256                # Tile edge in pixels
//! format = "jpg"            # Tile encoding: jpg | png
//! quality = 90              # JPEG quality (1-100)
//!
//! [fallback]
//! format = "jpg"            # Full-resolution rendition: jpg | png
//! mode = "require"          # require | skip (when the rendition can't be encoded)
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::tiling::{FallbackMode, TileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Conventional config file name looked up in the working directory.
pub const CONFIG_FILENAME: &str = "iiif.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Generator configuration loaded from `iiif.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IiifConfig {
    /// Public URL of the output root, without a trailing slash.
    pub base_url: String,
    pub tiles: TilesConfig,
    pub fallback: FallbackConfig,
    pub processing: ProcessingConfig,
}

impl Default for IiifConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            tiles: TilesConfig::default(),
            fallback: FallbackConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl IiifConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::Validation("base_url must not be empty".into()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.tiles.size == 0 {
            return Err(ConfigError::Validation("tiles.size must be positive".into()));
        }
        if !(1..=100).contains(&self.tiles.quality) {
            return Err(ConfigError::Validation(
                "tiles.quality must be 1-100".into(),
            ));
        }
        Ok(())
    }

    /// Strip trailing slashes so URLs can be joined with a single `/`.
    fn normalize(mut self) -> Self {
        let trimmed = self.base_url.trim_end_matches('/').len();
        self.base_url.truncate(trimmed);
        self
    }
}

/// Tile pyramid settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TilesConfig {
    /// Edge length of a full tile in pixels.
    pub size: u32,
    /// Encoding for tile files.
    pub format: TileFormat,
    /// JPEG encoding quality; ignored for PNG.
    pub quality: u32,
}

impl Default for TilesConfig {
    fn default() -> Self {
        Self {
            size: 256,
            format: TileFormat::Jpeg,
            quality: 90,
        }
    }
}

/// Full-resolution fallback rendition settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackConfig {
    pub format: TileFormat,
    pub mode: FallbackMode,
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel tiling workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(IiifConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<IiifConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: IiifConfig = merged.try_into()?;
    let config = config.normalize();
    config.validate()?;
    Ok(config)
}

/// Load config from the given file, falling back to stock defaults if it
/// does not exist.
pub fn load_config(path: &Path) -> Result<IiifConfig, ConfigError> {
    resolve_config(stock_defaults_value(), load_raw_config(path)?)
}

/// Returns a fully-commented stock `iiif.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# iiif-static configuration
# =========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Public URL the output directory is served from. Every id in info.json and
# manifest.json is built from it. A trailing slash is ignored.
base_url = "http://localhost:8000"

# ---------------------------------------------------------------------------
# Tile pyramid
# ---------------------------------------------------------------------------
[tiles]
# Edge length of a full tile in pixels. Edge tiles are cropped, never padded.
size = 256

# Tile encoding: "jpg" or "png".
format = "jpg"

# JPEG quality (1 = worst, 100 = best). Ignored for png.
quality = 90

# ---------------------------------------------------------------------------
# Full-resolution fallback (images/<id>/full/max/0/default.<ext>)
# ---------------------------------------------------------------------------
[fallback]
# Encoding of the fallback rendition. JPEG sources are copied unchanged
# when this is "jpg"; everything else is re-encoded.
format = "jpg"

# What to do when the rendition can't be encoded:
#   "require" - fail the image (nothing is written)
#   "skip"    - publish the pyramid without a fallback
mode = "require"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel tiling workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
