//! Tile pyramid generation for a single source image.
//!
//! [`TileGenerator::generate_tiles`] turns one source file into a complete
//! IIIF level-0 pyramid under `<output_root>/images/<id>/`:
//!
//! 1. Read the source and fingerprint it ([`crate::fingerprint`]).
//! 2. If a committed pyramid with a matching fingerprint and a readable
//!    `info.json` exists, return [`TileStatus::Skipped`] without decoding.
//! 3. Otherwise check the header, decode, plan the levels ([`super::calculations`]) and write
//!    every tile, `info.json`, the full-resolution fallback and the
//!    fingerprint into a hidden staging directory next to the target.
//! 4. Swap the staging directory into place. A previous pyramid is moved
//!    aside first and deleted only once the new one is in place.
//!
//! Every failure before step 4 leaves the target untouched: either the old
//! pyramid or nothing at all.
//!
//! Levels are built by successive halving, so each level is downsampled from
//! the one above it rather than from the full-resolution image.

use super::backend::{BackendError, ImageBackend};
use super::calculations::{Level, plan_pyramid};
use super::descriptor::{ImageInfo, descriptor_path};
use super::layout::{
    IMAGES_DIR, REPLACED_PREFIX, STAGING_PREFIX, fallback_path, pyramid_dir, stale_work_dirs,
};
use super::params::{FallbackMode, Quality, TileFormat};
use super::rust_backend::RustBackend;
use crate::config::IiifConfig;
use crate::fingerprint::{self, Fingerprint, fingerprint_path};
use crate::identifier::Identifier;
use crate::presentation::{Pass, PassError};
use image::DynamicImage;
use image::imageops::FilterType;
use std::borrow::Cow;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum TileError {
    #[error("tile size must be positive")]
    InvalidTileSize,
    #[error(transparent)]
    Pass(#[from] PassError),
    #[error("cannot decode {}: {reason}", path.display())]
    ImageDecode { path: PathBuf, reason: String },
    #[error("cannot encode {} fallback for {}: {reason}", format.extension(), path.display())]
    UnsupportedFallbackFormat {
        path: PathBuf,
        format: TileFormat,
        reason: String,
    },
    #[error("cannot encode {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TileError {
    /// Whether the same image can succeed if the caller retries with
    /// [`FallbackMode::Skip`].
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TileError::UnsupportedFallbackFormat { .. })
    }
}

fn fs_error(path: &Path) -> impl FnOnce(io::Error) -> TileError + '_ {
    move |source| TileError::Filesystem {
        path: path.to_path_buf(),
        source,
    }
}

fn create_dir_all(path: &Path) -> Result<(), TileError> {
    std::fs::create_dir_all(path).map_err(fs_error(path))
}

fn encode_failure(path: &Path, err: BackendError) -> TileError {
    match err {
        BackendError::Io(source) => TileError::Filesystem {
            path: path.to_path_buf(),
            source,
        },
        other => TileError::Encode {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

/// Everything that shapes the bytes of a pyramid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileOptions {
    /// Public URL of the output root, without a trailing slash.
    pub base_url: String,
    pub tile_size: u32,
    pub tile_format: TileFormat,
    pub tile_quality: Quality,
    pub fallback_format: TileFormat,
    pub fallback_mode: FallbackMode,
}

impl TileOptions {
    pub fn from_config(config: &IiifConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            tile_size: config.tiles.size,
            tile_format: config.tiles.format,
            tile_quality: Quality::new(config.tiles.quality),
            fallback_format: config.fallback.format,
            fallback_mode: config.fallback.mode,
        }
    }

    pub fn with_fallback_mode(mut self, mode: FallbackMode) -> Self {
        self.fallback_mode = mode;
        self
    }

    pub fn params_hash(&self) -> String {
        fingerprint::hash_pyramid_params(
            self.tile_size,
            self.tile_format,
            self.tile_quality,
            self.fallback_format,
            self.fallback_mode,
            &self.base_url,
        )
    }
}

impl Default for TileOptions {
    fn default() -> Self {
        Self::from_config(&IiifConfig::default())
    }
}

/// One image to tile.
#[derive(Debug, Clone)]
pub struct TileRequest {
    pub image_path: PathBuf,
    pub identifier: Identifier,
    /// Regenerate even when the fingerprint matches.
    pub force: bool,
}

impl TileRequest {
    pub fn new(image_path: impl Into<PathBuf>, identifier: Identifier) -> Self {
        Self {
            image_path: image_path.into(),
            identifier,
            force: false,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    /// No pyramid existed for this identifier.
    Generated,
    /// A stale pyramid was replaced.
    Regenerated,
    /// The committed pyramid was already up to date.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileOutcome {
    pub identifier: Identifier,
    /// True pixel dimensions of the source.
    pub width: u32,
    pub height: u32,
    pub status: TileStatus,
    /// Whether the committed pyramid has a full-resolution fallback.
    pub fallback: bool,
}

/// Writes tile pyramids under `<output_root>/images/`.
pub struct TileGenerator<B: ImageBackend = RustBackend> {
    backend: B,
    output_root: PathBuf,
    options: TileOptions,
}

impl TileGenerator<RustBackend> {
    pub fn new(output_root: impl Into<PathBuf>, options: TileOptions) -> Self {
        Self::with_backend(RustBackend::new(), output_root, options)
    }
}

impl<B: ImageBackend> TileGenerator<B> {
    pub fn with_backend(backend: B, output_root: impl Into<PathBuf>, options: TileOptions) -> Self {
        Self {
            backend,
            output_root: output_root.into(),
            options,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &TileOptions {
        &self.options
    }

    pub fn pyramid_dir(&self, identifier: &Identifier) -> PathBuf {
        pyramid_dir(&self.output_root, identifier)
    }

    /// Public id of the image service, as written into `info.json`.
    pub fn service_id(&self, identifier: &Identifier) -> String {
        format!("{}/{}/{}", self.options.base_url, IMAGES_DIR, identifier)
    }

    /// Delete staging and replaced directories left behind by an interrupted
    /// generation. Returns how many were removed.
    ///
    /// Only safe while no other generation writes into the same output root.
    pub fn remove_stale_work_dirs(&self) -> usize {
        let mut removed = 0;
        for dir in stale_work_dirs(&self.output_root) {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {
                    debug!(path = %dir.display(), "removed stale work directory");
                    removed += 1;
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "cannot remove stale work directory")
                }
            }
        }
        removed
    }

    /// Tile one image and record its identifier in `pass`.
    ///
    /// A duplicate identifier is rejected before any file is read. The
    /// identifier is recorded only after the pyramid is committed (or found
    /// up to date), so a failed image never becomes a canvas.
    pub fn generate_tiles(
        &self,
        pass: &mut Pass,
        request: &TileRequest,
    ) -> Result<TileOutcome, TileError> {
        if pass.contains(&request.identifier) {
            return Err(PassError::DuplicateIdentifier(request.identifier.clone()).into());
        }
        let outcome = self.tile(request)?;
        pass.record(request.identifier.clone())?;
        Ok(outcome)
    }

    /// Tile one image without touching any pass state.
    ///
    /// Safe to call concurrently for distinct identifiers.
    pub fn tile(&self, request: &TileRequest) -> Result<TileOutcome, TileError> {
        let mode = self.options.fallback_mode;
        self.tile_in_mode(request, mode, &[mode])
    }

    /// Tile one image, committing it without a fallback if the fallback
    /// can't be encoded. The recovery path for a recoverable [`TileError`].
    pub fn tile_without_fallback(&self, request: &TileRequest) -> Result<TileOutcome, TileError> {
        self.tile_in_mode(request, FallbackMode::Skip, &[FallbackMode::Skip])
    }

    /// Tile one image in the configured mode, retrying without a fallback on
    /// a recoverable error.
    ///
    /// A pyramid committed by an earlier retry is reused as it is, so images
    /// whose fallback can't be encoded are decoded once, not on every pass.
    pub fn tile_allowing_missing_fallback(
        &self,
        request: &TileRequest,
    ) -> Result<TileOutcome, TileError> {
        let mode = self.options.fallback_mode;
        match self.tile_in_mode(request, mode, &[mode, FallbackMode::Skip]) {
            Err(e) if e.is_recoverable() => {
                warn!(identifier = %request.identifier, error = %e, "retrying without fallback");
                self.tile_without_fallback(request)
            }
            other => other,
        }
    }

    /// Tile in `fallback_mode`, reusing a committed pyramid whose fingerprint
    /// matches any of the `reusable` modes.
    fn tile_in_mode(
        &self,
        request: &TileRequest,
        fallback_mode: FallbackMode,
        reusable: &[FallbackMode],
    ) -> Result<TileOutcome, TileError> {
        let tile_size = self.options.tile_size;
        if tile_size == 0 {
            return Err(TileError::InvalidTileSize);
        }
        let identifier = &request.identifier;
        let source = &request.image_path;
        let target = self.pyramid_dir(identifier);

        let bytes = std::fs::read(source).map_err(|e| TileError::ImageDecode {
            path: source.clone(),
            reason: e.to_string(),
        })?;
        let source_hash = fingerprint::hash_bytes(&bytes);
        let fingerprint_for = |mode: FallbackMode| {
            let params = self.options.clone().with_fallback_mode(mode);
            Fingerprint::new(source_hash.clone(), params.params_hash())
        };
        let fingerprint = fingerprint_for(fallback_mode);

        let existed = target.is_dir();
        if existed && !request.force {
            let reused = reusable
                .iter()
                .find_map(|&mode| reusable_pyramid(&target, &fingerprint_for(mode)));
            if let Some(info) = reused {
                debug!(identifier = %identifier, "pyramid up to date");
                return Ok(TileOutcome {
                    identifier: identifier.clone(),
                    width: info.width,
                    height: info.height,
                    status: TileStatus::Skipped,
                    fallback: fallback_path(&target, self.options.fallback_format).is_file(),
                });
            }
            debug!(identifier = %identifier, "pyramid out of date");
        }

        let decode_error = |e: BackendError| TileError::ImageDecode {
            path: source.clone(),
            reason: e.to_string(),
        };
        let header = self.backend.identify(source).map_err(decode_error)?;
        if header.width == 0 || header.height == 0 {
            return Err(TileError::ImageDecode {
                path: source.clone(),
                reason: "image has no pixels".to_string(),
            });
        }
        let image = self.backend.decode(source).map_err(decode_error)?;
        let (width, height) = (image.width(), image.height());

        let images_dir = self.output_root.join(IMAGES_DIR);
        create_dir_all(&images_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&images_dir)
            .map_err(fs_error(&images_dir))?;

        let levels = plan_pyramid(width, height, tile_size);
        let tiles = self.write_tiles(&image, &levels, staging.path())?;

        let scale_factors = levels.iter().map(|l| l.scale_factor).collect();
        ImageInfo::new(self.service_id(identifier), width, height, tile_size, scale_factors)
            .save(staging.path())
            .map_err(fs_error(&descriptor_path(staging.path())))?;

        let fallback = self.write_fallback(&image, &bytes, source, staging.path(), fallback_mode)?;

        fingerprint
            .save(staging.path())
            .map_err(fs_error(&fingerprint_path(staging.path())))?;

        commit(staging, &target, &images_dir)?;

        info!(
            identifier = %identifier,
            width,
            height,
            levels = levels.len(),
            tiles,
            fallback,
            "pyramid written"
        );
        Ok(TileOutcome {
            identifier: identifier.clone(),
            width,
            height,
            status: if existed {
                TileStatus::Regenerated
            } else {
                TileStatus::Generated
            },
            fallback,
        })
    }

    /// Write every tile of every level under `root`. Returns the tile count.
    fn write_tiles(
        &self,
        image: &DynamicImage,
        levels: &[Level],
        root: &Path,
    ) -> Result<usize, TileError> {
        let extension = self.options.tile_format.extension();
        let mut level_image: Cow<'_, DynamicImage> = Cow::Borrowed(image);
        let mut written = 0;

        for level in levels {
            if level_image.width() != level.width || level_image.height() != level.height {
                level_image = Cow::Owned(level_image.resize_exact(
                    level.width,
                    level.height,
                    FilterType::Triangle,
                ));
            }
            debug!(
                scale_factor = level.scale_factor,
                columns = level.columns,
                rows = level.rows,
                "writing level"
            );

            for tile in &level.tiles {
                let path = root.join(tile.relative_path(extension));
                if let Some(parent) = path.parent() {
                    create_dir_all(parent)?;
                }
                let view = level_image.crop_imm(tile.x, tile.y, tile.width, tile.height);
                self.backend
                    .encode(
                        &view,
                        &path,
                        self.options.tile_format,
                        self.options.tile_quality,
                    )
                    .map_err(|e| encode_failure(&path, e))?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Write the full-resolution rendition. Returns whether one was written.
    ///
    /// A source already in the fallback encoding is copied byte for byte.
    fn write_fallback(
        &self,
        image: &DynamicImage,
        source_bytes: &[u8],
        source: &Path,
        root: &Path,
        mode: FallbackMode,
    ) -> Result<bool, TileError> {
        let format = self.options.fallback_format;
        let path = fallback_path(root, format);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        if image::guess_format(source_bytes).ok() == Some(format.image_format()) {
            std::fs::write(&path, source_bytes).map_err(fs_error(&path))?;
            debug!(source = %source.display(), "fallback copied from source");
            return Ok(true);
        }

        match self
            .backend
            .encode(image, &path, format, self.options.tile_quality)
        {
            Ok(()) => Ok(true),
            Err(BackendError::Unsupported(reason)) => match mode {
                FallbackMode::Require => Err(TileError::UnsupportedFallbackFormat {
                    path: source.to_path_buf(),
                    format,
                    reason,
                }),
                FallbackMode::Skip => {
                    warn!(
                        source = %source.display(),
                        format = format.extension(),
                        %reason,
                        "fallback not encodable, publishing without it"
                    );
                    let full = root.join("full");
                    if full.exists() {
                        std::fs::remove_dir_all(&full).map_err(fs_error(&full))?;
                    }
                    Ok(false)
                }
            },
            Err(other) => Err(encode_failure(&path, other)),
        }
    }
}

/// The committed descriptor, if `dir` can be reused for `fingerprint`.
fn reusable_pyramid(dir: &Path, fingerprint: &Fingerprint) -> Option<ImageInfo> {
    if Fingerprint::load(dir).as_ref() != Some(fingerprint) {
        return None;
    }
    ImageInfo::load(dir).ok()
}

/// Move a fully written staging directory to `target`.
///
/// An existing pyramid is renamed into a second temporary directory first and
/// removed when that directory is dropped. If the final rename fails, the old
/// pyramid is moved back.
fn commit(staging: TempDir, target: &Path, images_dir: &Path) -> Result<(), TileError> {
    if !target.exists() {
        return std::fs::rename(staging.path(), target).map_err(fs_error(target));
    }

    let replaced = tempfile::Builder::new()
        .prefix(REPLACED_PREFIX)
        .tempdir_in(images_dir)
        .map_err(fs_error(images_dir))?;
    let previous = replaced.path().join("pyramid");
    std::fs::rename(target, &previous).map_err(fs_error(target))?;

    if let Err(source) = std::fs::rename(staging.path(), target) {
        if let Err(restore) = std::fs::rename(&previous, target) {
            warn!(
                target = %target.display(),
                error = %restore,
                "could not restore previous pyramid"
            );
        }
        return Err(TileError::Filesystem {
            path: target.to_path_buf(),
            source,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_jpeg, create_test_png, snapshot_dir};
    use crate::tiling::backend::tests::{MockBackend, RecordedOp};
    use crate::tiling::layout::validate_pyramid;
    use std::fs;
    use tempfile::TempDir;

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    fn options() -> TileOptions {
        TileOptions {
            base_url: "https://example.org".to_string(),
            ..TileOptions::default()
        }
    }

    /// A source file for the mock backend; its bytes only feed the fingerprint.
    fn fake_source(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn mock_generator(tmp: &TempDir, width: u32, height: u32) -> TileGenerator<MockBackend> {
        TileGenerator::with_backend(
            MockBackend::with_dimensions(width, height),
            tmp.path().join("out"),
            options(),
        )
    }

    fn images_dir_entries(tmp: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(tmp.path().join("out/images"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    // =========================================================================
    // First generation
    // =========================================================================

    #[test]
    fn generates_pyramid_with_true_dimensions() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"source one");
        let generator = mock_generator(&tmp, 1000, 800);
        let mut pass = Pass::new();

        let outcome = generator
            .generate_tiles(&mut pass, &TileRequest::new(&source, id("p1")))
            .unwrap();

        assert_eq!((outcome.width, outcome.height), (1000, 800));
        assert_eq!(outcome.status, TileStatus::Generated);
        assert!(outcome.fallback);
        assert_eq!(pass.identifiers(), &[id("p1")]);

        let dir = generator.pyramid_dir(&id("p1"));
        let info = ImageInfo::load(&dir).unwrap();
        assert_eq!(info.id, "https://example.org/images/p1");
        assert_eq!((info.width, info.height), (1000, 800));
        assert_eq!(info.scale_factors(), &[1, 2, 4]);
        assert!(dir.join("full/max/0/default.jpg").is_file());
        assert!(dir.join(".fingerprint.json").is_file());
    }

    #[test]
    fn writes_one_encode_per_tile_plus_fallback() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"source one");
        let generator = mock_generator(&tmp, 1000, 800);

        generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();

        let encodes: Vec<RecordedOp> = generator
            .backend()
            .get_operations()
            .into_iter()
            .filter(|op| matches!(op, RecordedOp::Encode { .. }))
            .collect();
        // 16 + 4 + 1 tiles, then the fallback.
        assert_eq!(encodes.len(), 22);
        assert!(matches!(
            encodes.last().unwrap(),
            RecordedOp::Encode { width: 1000, height: 800, .. }
        ));
        assert_eq!(generator.backend().decode_count(), 1);
    }

    #[test]
    fn boundary_tiles_are_cropped_not_padded() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"source one");
        let generator = mock_generator(&tmp, 1000, 800);

        generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();

        let dir = generator.pyramid_dir(&id("p1"));
        // Mock tiles hold their pixel size as text.
        let read = |rel: &str| fs::read_to_string(dir.join(rel)).unwrap();
        assert_eq!(read("0,0,256,256/256,256/0/default.jpg"), "256x256");
        assert_eq!(read("768,768,232,32/232,32/0/default.jpg"), "232x32");
        assert_eq!(read("512,512,488,288/244,144/0/default.jpg"), "244x144");
        assert_eq!(read("0,0,1000,800/250,200/0/default.jpg"), "250x200");
    }

    #[test]
    fn generated_pyramid_validates() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"source one");
        let generator = mock_generator(&tmp, 1000, 800);
        generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();

        let report = validate_pyramid(
            &generator.pyramid_dir(&id("p1")),
            TileFormat::Jpeg,
            TileFormat::Jpeg,
        )
        .unwrap();
        assert!(report.is_complete(), "{:?}", report.problems);
        assert!(report.has_fallback);
        assert_eq!(report.tiles, 21);
    }

    #[test]
    fn small_image_gets_single_level() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "s.tif", b"small");
        let generator = mock_generator(&tmp, 100, 50);

        generator.tile(&TileRequest::new(&source, id("s"))).unwrap();

        let info = ImageInfo::load(&generator.pyramid_dir(&id("s"))).unwrap();
        assert_eq!(info.scale_factors(), &[1]);
        assert!(
            generator
                .pyramid_dir(&id("s"))
                .join("0,0,100,50/100,50/0/default.jpg")
                .is_file()
        );
    }

    #[test]
    fn leaves_no_staging_directories() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = mock_generator(&tmp, 300, 300);

        generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();
        generator
            .tile(&TileRequest::new(&source, id("p1")).force(true))
            .unwrap();

        assert_eq!(images_dir_entries(&tmp), vec!["p1"]);
    }

    #[test]
    fn stale_work_dirs_are_removed() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = mock_generator(&tmp, 300, 300);
        generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();
        let images = tmp.path().join("out/images");
        fs::create_dir_all(images.join(".staging-x1/0,0,256,256")).unwrap();
        fs::create_dir_all(images.join(".replaced-x2/pyramid")).unwrap();

        assert_eq!(generator.remove_stale_work_dirs(), 2);
        assert_eq!(images_dir_entries(&tmp), vec!["p1"]);
        assert_eq!(generator.remove_stale_work_dirs(), 0);
    }

    // =========================================================================
    // Idempotency
    // =========================================================================

    #[test]
    fn unchanged_source_is_skipped_without_decoding() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = mock_generator(&tmp, 1000, 800);
        generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();
        let before = snapshot_dir(&generator.pyramid_dir(&id("p1")));

        let outcome = generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();

        assert_eq!(outcome.status, TileStatus::Skipped);
        assert_eq!((outcome.width, outcome.height), (1000, 800));
        assert!(outcome.fallback);
        assert_eq!(generator.backend().decode_count(), 1);
        assert_eq!(snapshot_dir(&generator.pyramid_dir(&id("p1"))), before);
    }

    #[test]
    fn force_regenerates() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = mock_generator(&tmp, 300, 300);
        generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();

        let outcome = generator
            .tile(&TileRequest::new(&source, id("p1")).force(true))
            .unwrap();

        assert_eq!(outcome.status, TileStatus::Regenerated);
        assert_eq!(generator.backend().decode_count(), 2);
    }

    #[test]
    fn changed_source_regenerates() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = mock_generator(&tmp, 300, 300);
        generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();

        fs::write(&source, b"two").unwrap();
        let outcome = generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();

        assert_eq!(outcome.status, TileStatus::Regenerated);
        assert_eq!(generator.backend().decode_count(), 2);
    }

    #[test]
    fn changed_tile_size_regenerates_and_drops_old_tiles() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let first = mock_generator(&tmp, 1000, 800);
        first.tile(&TileRequest::new(&source, id("p1"))).unwrap();

        let second = TileGenerator::with_backend(
            MockBackend::with_dimensions(1000, 800),
            tmp.path().join("out"),
            TileOptions {
                tile_size: 512,
                ..options()
            },
        );
        let outcome = second.tile(&TileRequest::new(&source, id("p1"))).unwrap();
        assert_eq!(outcome.status, TileStatus::Regenerated);

        let dir = second.pyramid_dir(&id("p1"));
        assert!(!dir.join("0,0,256,256").exists());
        assert!(dir.join("0,0,512,512/512,512/0/default.jpg").is_file());
        assert_eq!(ImageInfo::load(&dir).unwrap().scale_factors(), &[1, 2]);
    }

    #[test]
    fn corrupt_descriptor_forces_regeneration() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = mock_generator(&tmp, 300, 300);
        generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();
        fs::write(generator.pyramid_dir(&id("p1")).join("info.json"), "{").unwrap();

        let outcome = generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();

        assert_eq!(outcome.status, TileStatus::Regenerated);
        assert!(ImageInfo::load(&generator.pyramid_dir(&id("p1"))).is_ok());
    }

    #[test]
    fn directory_without_fingerprint_is_regenerated() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = mock_generator(&tmp, 300, 300);
        fs::create_dir_all(generator.pyramid_dir(&id("p1"))).unwrap();

        let outcome = generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();

        assert_eq!(outcome.status, TileStatus::Regenerated);
        assert_eq!(generator.backend().decode_count(), 1);
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[test]
    fn duplicate_identifier_rejected_before_decoding() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = mock_generator(&tmp, 300, 300);
        let mut pass = Pass::new();
        generator
            .generate_tiles(&mut pass, &TileRequest::new(&source, id("p1")))
            .unwrap();

        let err = generator
            .generate_tiles(&mut pass, &TileRequest::new(&source, id("p1")).force(true))
            .unwrap_err();

        assert!(matches!(
            err,
            TileError::Pass(PassError::DuplicateIdentifier(ref dup)) if dup.as_str() == "p1"
        ));
        assert_eq!(generator.backend().decode_count(), 1);
        assert_eq!(pass.len(), 1);
    }

    #[test]
    fn undecodable_source_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "broken.tif", b"junk");
        let generator =
            TileGenerator::with_backend(MockBackend::default(), tmp.path().join("out"), options());
        let mut pass = Pass::new();

        let err = generator
            .generate_tiles(&mut pass, &TileRequest::new(&source, id("broken")))
            .unwrap_err();

        assert!(matches!(err, TileError::ImageDecode { .. }));
        assert!(!err.is_recoverable());
        assert!(pass.is_empty());
        assert!(!generator.pyramid_dir(&id("broken")).exists());
    }

    #[test]
    fn missing_source_is_decode_error() {
        let tmp = TempDir::new().unwrap();
        let generator = mock_generator(&tmp, 10, 10);

        let err = generator
            .tile(&TileRequest::new(tmp.path().join("nope.jpg"), id("nope")))
            .unwrap_err();

        assert!(matches!(err, TileError::ImageDecode { .. }));
    }

    #[test]
    fn zero_tile_size_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = TileGenerator::with_backend(
            MockBackend::with_dimensions(10, 10),
            tmp.path().join("out"),
            TileOptions {
                tile_size: 0,
                ..options()
            },
        );

        let err = generator.tile(&TileRequest::new(&source, id("p1"))).unwrap_err();
        assert!(matches!(err, TileError::InvalidTileSize));
        assert_eq!(generator.backend().decode_count(), 0);
    }

    #[test]
    fn failed_regeneration_keeps_previous_pyramid() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = mock_generator(&tmp, 300, 300);
        generator.tile(&TileRequest::new(&source, id("p1"))).unwrap();
        let before = snapshot_dir(&generator.pyramid_dir(&id("p1")));

        fs::write(&source, b"two").unwrap();
        *generator.backend().dimensions.lock().unwrap() = None;
        let err = generator.tile(&TileRequest::new(&source, id("p1"))).unwrap_err();

        assert!(matches!(err, TileError::ImageDecode { .. }));
        assert_eq!(snapshot_dir(&generator.pyramid_dir(&id("p1"))), before);
        assert_eq!(images_dir_entries(&tmp), vec!["p1"]);
    }

    // =========================================================================
    // Fallback rendition
    // =========================================================================

    #[test]
    fn unencodable_fallback_fails_when_required() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = TileGenerator::with_backend(
            MockBackend::with_dimensions(300, 300).rejecting(TileFormat::Png),
            tmp.path().join("out"),
            TileOptions {
                fallback_format: TileFormat::Png,
                ..options()
            },
        );
        let mut pass = Pass::new();

        let err = generator
            .generate_tiles(&mut pass, &TileRequest::new(&source, id("p1")))
            .unwrap_err();

        assert!(matches!(
            err,
            TileError::UnsupportedFallbackFormat { format: TileFormat::Png, .. }
        ));
        assert!(err.is_recoverable());
        assert!(pass.is_empty());
        assert!(!generator.pyramid_dir(&id("p1")).exists());
        assert!(images_dir_entries(&tmp).is_empty());
    }

    #[test]
    fn unencodable_fallback_is_skipped_when_allowed() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = TileGenerator::with_backend(
            MockBackend::with_dimensions(300, 300).rejecting(TileFormat::Png),
            tmp.path().join("out"),
            TileOptions {
                fallback_format: TileFormat::Png,
                ..options()
            }
            .with_fallback_mode(FallbackMode::Skip),
        );
        let mut pass = Pass::new();

        let outcome = generator
            .generate_tiles(&mut pass, &TileRequest::new(&source, id("p1")))
            .unwrap();

        assert!(!outcome.fallback);
        assert_eq!(pass.len(), 1);
        let dir = generator.pyramid_dir(&id("p1"));
        assert!(dir.join("info.json").is_file());
        assert!(!dir.join("full").exists());
    }

    #[test]
    fn recoverable_error_succeeds_without_fallback() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = TileGenerator::with_backend(
            MockBackend::with_dimensions(300, 300).rejecting(TileFormat::Png),
            tmp.path().join("out"),
            TileOptions {
                fallback_format: TileFormat::Png,
                ..options()
            },
        );
        let request = TileRequest::new(&source, id("p1"));

        let err = generator.tile(&request).unwrap_err();
        assert!(err.is_recoverable());
        let outcome = generator.tile_without_fallback(&request).unwrap();

        assert_eq!(outcome.status, TileStatus::Generated);
        assert!(!outcome.fallback);
        // Same request again is up to date only in the mode it was written in.
        assert_eq!(
            generator.tile_without_fallback(&request).unwrap().status,
            TileStatus::Skipped
        );
    }

    #[test]
    fn pyramid_without_fallback_is_reused_when_retrying() {
        let tmp = TempDir::new().unwrap();
        let source = fake_source(tmp.path(), "p1.tif", b"one");
        let generator = TileGenerator::with_backend(
            MockBackend::with_dimensions(300, 300).rejecting(TileFormat::Png),
            tmp.path().join("out"),
            TileOptions {
                fallback_format: TileFormat::Png,
                ..options()
            },
        );
        let request = TileRequest::new(&source, id("p1"));

        let first = generator.tile_allowing_missing_fallback(&request).unwrap();
        assert_eq!(first.status, TileStatus::Generated);
        assert!(!first.fallback);
        assert_eq!(generator.backend().decode_count(), 2);

        let again = generator.tile_allowing_missing_fallback(&request).unwrap();
        assert_eq!(again.status, TileStatus::Skipped);
        assert!(!again.fallback);
        assert_eq!(generator.backend().decode_count(), 2);
    }

    #[test]
    fn jpeg_source_fallback_is_byte_identical() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("photo.jpg");
        create_test_jpeg(&source, 300, 200);
        let generator = TileGenerator::new(tmp.path().join("out"), options());

        let outcome = generator.tile(&TileRequest::new(&source, id("photo"))).unwrap();

        assert!(outcome.fallback);
        let fallback = generator
            .pyramid_dir(&id("photo"))
            .join("full/max/0/default.jpg");
        assert_eq!(fs::read(&fallback).unwrap(), fs::read(&source).unwrap());
    }

    #[test]
    fn png_source_fallback_is_reencoded_as_jpeg() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("plan.png");
        create_test_png(&source, 300, 200);
        let generator = TileGenerator::new(tmp.path().join("out"), options());

        generator.tile(&TileRequest::new(&source, id("plan"))).unwrap();

        let fallback = generator
            .pyramid_dir(&id("plan"))
            .join("full/max/0/default.jpg");
        let bytes = fs::read(&fallback).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
        assert_eq!(image::image_dimensions(&fallback).unwrap(), (300, 200));
    }

    #[test]
    fn source_format_comes_from_content_not_name() {
        let tmp = TempDir::new().unwrap();
        let misnamed = tmp.path().join("actually-png.jpg");
        let bare = tmp.path().join("scan");
        create_test_png(&misnamed, 300, 200);
        create_test_png(&bare, 120, 90);
        let generator = TileGenerator::new(tmp.path().join("out"), options());

        let first = generator.tile(&TileRequest::new(&misnamed, id("misnamed"))).unwrap();
        let second = generator.tile(&TileRequest::new(&bare, id("bare"))).unwrap();

        assert_eq!((first.width, first.height), (300, 200));
        assert_eq!((second.width, second.height), (120, 90));
        assert!(first.fallback && second.fallback);
    }

    #[test]
    fn real_backend_writes_decodable_tiles() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("photo.jpg");
        create_test_jpeg(&source, 600, 300);
        let generator = TileGenerator::new(tmp.path().join("out"), options());

        let outcome = generator.tile(&TileRequest::new(&source, id("photo"))).unwrap();
        assert_eq!((outcome.width, outcome.height), (600, 300));

        let dir = generator.pyramid_dir(&id("photo"));
        assert_eq!(
            image::image_dimensions(dir.join("512,256,88,44/88,44/0/default.jpg")).unwrap(),
            (88, 44)
        );
        assert_eq!(
            image::image_dimensions(dir.join("0,0,600,300/150,75/0/default.jpg")).unwrap(),
            (150, 75)
        );
    }
}
