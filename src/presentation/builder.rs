//! Manifest assembly and writing.
//!
//! [`ManifestBuilder::build`] reads the `info.json` of every identifier in a
//! [`Pass`], assembles the whole document in memory and only then writes it.
//! A missing or unreadable descriptor aborts the build before anything
//! touches the disk, so a manifest is either complete or absent.

use super::canvas::{build_canvas, manifest_url};
use super::document::{Label, MANIFEST_FILENAME, Manifest};
use super::pass::Pass;
use crate::config::IiifConfig;
use crate::identifier::Identifier;
use crate::tiling::descriptor::{DescriptorError, ImageInfo};
use crate::tiling::layout::{fallback_path, pyramid_dir};
use crate::tiling::TileFormat;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("no descriptor for '{identifier}' at {} (was it tiled into this output root?)", path.display())]
    MissingDescriptor { identifier: Identifier, path: PathBuf },
    #[error("invalid descriptor {}: {source}", path.display())]
    InvalidDescriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn descriptor_failure(identifier: &Identifier, err: DescriptorError) -> ManifestError {
    match err {
        DescriptorError::Io { path, source } if source.kind() == io::ErrorKind::NotFound => {
            ManifestError::MissingDescriptor {
                identifier: identifier.clone(),
                path,
            }
        }
        DescriptorError::Io { path, source } => ManifestError::Filesystem { path, source },
        DescriptorError::Parse { path, source } => ManifestError::InvalidDescriptor { path, source },
    }
}

/// Builds one Presentation 3 manifest per pass.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    output_root: PathBuf,
    base_url: String,
    fallback_format: TileFormat,
}

impl ManifestBuilder {
    pub fn new(output_root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        let trimmed = base_url.trim_end_matches('/').len();
        base_url.truncate(trimmed);
        Self {
            output_root: output_root.into(),
            base_url,
            fallback_format: TileFormat::default(),
        }
    }

    pub fn from_config(output_root: impl Into<PathBuf>, config: &IiifConfig) -> Self {
        Self::new(output_root, config.base_url.clone()).with_fallback_format(config.fallback.format)
    }

    /// Encoding the tile generator used for fallback renditions.
    pub fn with_fallback_format(mut self, format: TileFormat) -> Self {
        self.fallback_format = format;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn manifest_path(&self, manifest_id: &Identifier) -> PathBuf {
        self.output_root
            .join(manifest_id.as_str())
            .join(MANIFEST_FILENAME)
    }

    /// Assemble the manifest in memory, in pass order.
    pub fn assemble(
        &self,
        pass: &Pass,
        manifest_id: &Identifier,
        label: &Label,
    ) -> Result<Manifest, ManifestError> {
        let mut canvases = Vec::with_capacity(pass.len());
        for identifier in pass.identifiers() {
            let dir = pyramid_dir(&self.output_root, identifier);
            let info = ImageInfo::load(&dir).map_err(|e| descriptor_failure(identifier, e))?;
            if !fallback_path(&dir, self.fallback_format).is_file() {
                warn!(
                    identifier = %identifier,
                    "no full-resolution fallback, canvas body will not resolve"
                );
            }
            debug!(identifier = %identifier, width = info.width, height = info.height, "canvas");
            canvases.push(build_canvas(
                &self.base_url,
                identifier,
                &info,
                self.fallback_format,
            ));
        }
        if canvases.is_empty() {
            warn!(manifest = %manifest_id, "building manifest with no canvases");
        }
        Ok(Manifest::new(
            manifest_url(&self.base_url, manifest_id),
            label.clone(),
            canvases,
        ))
    }

    /// Assemble and write `<output_root>/<manifest_id>/manifest.json`.
    /// Returns the manifest's public URL.
    pub fn build(
        &self,
        pass: &Pass,
        manifest_id: &Identifier,
        label: &Label,
    ) -> Result<String, ManifestError> {
        let manifest = self.assemble(pass, manifest_id, label)?;
        let json = serde_json::to_string_pretty(&manifest)?;
        let path = self.manifest_path(manifest_id);
        write_atomic(&path, json.as_bytes())?;
        info!(url = %manifest.id, canvases = manifest.items.len(), "manifest written");
        Ok(manifest.id)
    }
}

fn fs_error(path: &Path) -> impl FnOnce(io::Error) -> ManifestError + '_ {
    move |source| ManifestError::Filesystem {
        path: path.to_path_buf(),
        source,
    }
}

/// Write via a temporary file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ManifestError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(fs_error(dir))?;

    let mut file = tempfile::Builder::new()
        .prefix(".manifest-")
        .tempfile_in(dir)
        .map_err(fs_error(dir))?;
    file.write_all(contents).map_err(fs_error(path))?;
    make_world_readable(file.as_file()).map_err(fs_error(path))?;
    file.as_file().sync_all().map_err(fs_error(path))?;
    file.persist(path).map_err(|e| ManifestError::Filesystem {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Temporary files are created owner-only; published files must be
/// readable by whatever user serves the output directory.
#[cfg(unix)]
fn make_world_readable(file: &std::fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_world_readable(_file: &std::fs::File) -> io::Result<()> {
    Ok(())
}
