//! On-disk layout of a committed pyramid, and its validation.
//!
//! ```text
//! <output_root>/images/<id>/
//! ├── info.json                         # descriptor
//! ├── .fingerprint.json                 # source + params hashes
//! ├── full/max/0/default.<ext>          # full-resolution fallback
//! └── <x>,<y>,<w>,<h>/<tw>,<th>/0/default.<ext>   # one per tile
//! ```

use super::calculations::plan_pyramid;
use super::descriptor::{DESCRIPTOR_FILENAME, DescriptorError, ImageInfo};
use super::params::TileFormat;
use crate::fingerprint::FINGERPRINT_FILENAME;
use crate::identifier::Identifier;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory under the output root holding one pyramid per identifier.
pub const IMAGES_DIR: &str = "images";

/// Prefix of the directory a pyramid is written into before it is committed.
pub const STAGING_PREFIX: &str = ".staging-";

/// Prefix of the directory a replaced pyramid is parked in during a commit.
pub const REPLACED_PREFIX: &str = ".replaced-";

/// Pyramid directory for an identifier.
pub fn pyramid_dir(output_root: &Path, identifier: &Identifier) -> PathBuf {
    output_root.join(IMAGES_DIR).join(identifier.as_str())
}

/// Fallback path relative to the pyramid root.
pub fn fallback_relative_path(format: TileFormat) -> String {
    format!("full/max/0/default.{}", format.extension())
}

pub fn fallback_path(pyramid_dir: &Path, format: TileFormat) -> PathBuf {
    pyramid_dir.join(fallback_relative_path(format))
}

/// Result of checking a pyramid directory against its own descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidReport {
    pub width: u32,
    pub height: u32,
    /// Number of tiles the descriptor implies.
    pub tiles: usize,
    pub has_fallback: bool,
    pub problems: Vec<String>,
}

impl PyramidReport {
    pub fn is_complete(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Check that every tile implied by `info.json` exists and nothing else
/// does. A missing fallback is reported through `has_fallback`, not as a
/// problem, since pyramids may be published without one.
pub fn validate_pyramid(
    dir: &Path,
    tile_format: TileFormat,
    fallback_format: TileFormat,
) -> Result<PyramidReport, DescriptorError> {
    let info = ImageInfo::load(dir)?;
    let mut problems = Vec::new();

    let expected: BTreeSet<String> = match info.tile_size() {
        Some(tile_size) if tile_size > 0 => {
            let levels = plan_pyramid(info.width, info.height, tile_size);
            let factors: Vec<u32> = levels.iter().map(|l| l.scale_factor).collect();
            if factors != info.scale_factors() {
                problems.push(format!(
                    "scale factors {:?} do not match {}x{} at tile size {} (expected {:?})",
                    info.scale_factors(),
                    info.width,
                    info.height,
                    tile_size,
                    factors
                ));
            }
            levels
                .iter()
                .flat_map(|level| level.tiles.iter())
                .map(|tile| tile.relative_path(tile_format.extension()))
                .collect()
        }
        _ => {
            problems.push("descriptor has no positive tile size".to_string());
            BTreeSet::new()
        }
    };

    let fallback = fallback_relative_path(fallback_format);
    let mut found = BTreeSet::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                problems.push(format!("unreadable entry: {e}"));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        if relative == DESCRIPTOR_FILENAME || relative == FINGERPRINT_FILENAME || relative == fallback
        {
            continue;
        }
        found.insert(relative);
    }

    for missing in expected.difference(&found) {
        problems.push(format!("missing tile {missing}"));
    }
    for unexpected in found.difference(&expected) {
        problems.push(format!("unexpected file {unexpected}"));
    }

    Ok(PyramidReport {
        width: info.width,
        height: info.height,
        tiles: expected.len(),
        has_fallback: dir.join(&fallback).is_file(),
        problems,
    })
}

/// Staging and replaced directories left under `images/` by an interrupted
/// generation, sorted by name. Empty if `images/` doesn't exist.
pub fn stale_work_dirs(output_root: &Path) -> Vec<PathBuf> {
    WalkDir::new(output_root.join(IMAGES_DIR))
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.starts_with(STAGING_PREFIX) || name.starts_with(REPLACED_PREFIX)
        })
        .map(|entry| entry.into_path())
        .collect()
}
