//! Pass driver: tile a whole collection, then build its manifest.
//!
//! One call to [`run_pass`] is one generation pass. It owns a fresh
//! [`Pass`], so nothing recorded for one collection leaks into the next.
//!
//! ## Steps
//!
//! 1. Reject duplicate identifiers up front. Each pyramid directory then has
//!    exactly one writer, and a pass can't fail halfway through on a
//!    duplicate. Work directories left by an interrupted earlier run are
//!    removed at the same point.
//! 2. Tile every item in parallel with [rayon](https://docs.rs/rayon). The
//!    collect is order-preserving, so results line up with collection order
//!    no matter which worker finishes first.
//! 3. Record successes into the pass in collection order. Canvas order is
//!    therefore collection order.
//! 4. Unless failures abort the pass, build and write the manifest.
//!
//! Progress is reported as [`ProcessEvent`]s on an optional channel, sent
//! from worker threads as images finish.

use crate::collection::Collection;
use crate::config::IiifConfig;
use crate::fingerprint::PassStats;
use crate::identifier::Identifier;
use crate::presentation::canvas::canvas_id;
use crate::presentation::{Manifest, ManifestBuilder, ManifestError, Pass, PassError};
use crate::tiling::descriptor::DescriptorError;
use crate::tiling::layout::pyramid_dir;
use crate::tiling::{
    ImageBackend, PyramidReport, TileError, TileGenerator, TileOutcome, TileRequest, TileStatus,
    stale_work_dirs, validate_pyramid,
};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Pass(#[from] PassError),
    #[error("manifest build failed: {0}")]
    Manifest(#[from] ManifestError),
    #[error("{} image(s) failed, manifest not written ({stats})", failures.len())]
    ImagesFailed {
        stats: PassStats,
        failures: Vec<ImageFailure>,
    },
}

/// What to do with the manifest when some images fail to tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Write no manifest; the pass returns [`ProcessError::ImagesFailed`].
    #[default]
    Abort,
    /// Leave failed images out of the manifest.
    SkipFailed,
}

#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    /// Regenerate every pyramid even if its fingerprint matches.
    pub force: bool,
    pub failure_policy: FailurePolicy,
    /// Retry images whose fallback can't be encoded without a fallback,
    /// instead of counting them as failed.
    pub retry_without_fallback: bool,
}

/// Progress events emitted while a pass runs.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    PassStarted {
        manifest: Identifier,
        images: usize,
    },
    ImageTiled {
        /// 1-based position in the collection.
        index: usize,
        identifier: Identifier,
        status: TileStatus,
        width: u32,
        height: u32,
        fallback: bool,
    },
    ImageFailed {
        index: usize,
        identifier: Identifier,
        reason: String,
    },
    ManifestWritten {
        url: String,
        canvases: usize,
    },
}

/// One image that could not be tiled.
#[derive(Debug)]
pub struct ImageFailure {
    pub identifier: Identifier,
    pub path: PathBuf,
    pub error: TileError,
}

impl fmt::Display for ImageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.identifier, self.error)
    }
}

#[derive(Debug)]
pub struct PassResult {
    /// Successful images, in collection order.
    pub outcomes: Vec<TileOutcome>,
    pub failures: Vec<ImageFailure>,
    pub stats: PassStats,
    pub manifest_url: String,
}

fn emit(progress: Option<&Sender<ProcessEvent>>, event: ProcessEvent) {
    if let Some(tx) = progress {
        // A closed receiver only means nobody is listening.
        tx.send(event).ok();
    }
}

/// Tile every image in `collection` and write its manifest.
pub fn run_pass<B: ImageBackend>(
    generator: &TileGenerator<B>,
    builder: &ManifestBuilder,
    collection: &Collection,
    options: &PassOptions,
    progress: Option<Sender<ProcessEvent>>,
) -> Result<PassResult, ProcessError> {
    let mut seen = HashSet::new();
    for identifier in collection.identifiers() {
        if !seen.insert(identifier) {
            return Err(PassError::DuplicateIdentifier(identifier.clone()).into());
        }
    }

    let swept = generator.remove_stale_work_dirs();
    if swept > 0 {
        warn!(count = swept, "removed leftovers of an interrupted generation");
    }

    emit(
        progress.as_ref(),
        ProcessEvent::PassStarted {
            manifest: collection.id.clone(),
            images: collection.items.len(),
        },
    );

    let results: Vec<Result<TileOutcome, TileError>> = collection
        .items
        .par_iter()
        .enumerate()
        .map(|(i, item)| {
            let request =
                TileRequest::new(&item.image, item.identifier.clone()).force(options.force);
            let result = if options.retry_without_fallback {
                generator.tile_allowing_missing_fallback(&request)
            } else {
                generator.tile(&request)
            };
            let event = match &result {
                Ok(outcome) => ProcessEvent::ImageTiled {
                    index: i + 1,
                    identifier: outcome.identifier.clone(),
                    status: outcome.status,
                    width: outcome.width,
                    height: outcome.height,
                    fallback: outcome.fallback,
                },
                Err(e) => ProcessEvent::ImageFailed {
                    index: i + 1,
                    identifier: item.identifier.clone(),
                    reason: e.to_string(),
                },
            };
            emit(progress.as_ref(), event);
            result
        })
        .collect();

    let mut pass = Pass::new();
    let mut stats = PassStats::default();
    let mut outcomes = Vec::new();
    let mut failures = Vec::new();
    for (item, result) in collection.items.iter().zip(results) {
        match result {
            Ok(outcome) => {
                pass.record(outcome.identifier.clone())?;
                match outcome.status {
                    TileStatus::Generated => stats.generated += 1,
                    TileStatus::Regenerated => stats.regenerated += 1,
                    TileStatus::Skipped => stats.skipped += 1,
                }
                outcomes.push(outcome);
            }
            Err(error) => {
                stats.failed += 1;
                failures.push(ImageFailure {
                    identifier: item.identifier.clone(),
                    path: item.image.clone(),
                    error,
                });
            }
        }
    }
    debug!(manifest = %collection.id, %stats, "tiling finished");

    if !failures.is_empty() && options.failure_policy == FailurePolicy::Abort {
        return Err(ProcessError::ImagesFailed { stats, failures });
    }

    let manifest_url = builder.build(&pass, &collection.id, &collection.label)?;
    emit(
        progress.as_ref(),
        ProcessEvent::ManifestWritten {
            url: manifest_url.clone(),
            canvases: pass.len(),
        },
    );

    Ok(PassResult {
        outcomes,
        failures,
        stats,
        manifest_url,
    })
}

// ============================================================================
// Check
// ============================================================================

/// State of a collection's manifest on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestStatus {
    Missing,
    Invalid(String),
    /// Canvases don't match the collection's identifiers in order.
    OutOfDate,
    Current,
}

#[derive(Debug)]
pub struct PyramidCheck {
    pub identifier: Identifier,
    pub report: Result<PyramidReport, DescriptorError>,
}

impl PyramidCheck {
    pub fn is_ok(&self) -> bool {
        self.report.as_ref().is_ok_and(PyramidReport::is_complete)
    }
}

#[derive(Debug)]
pub struct CheckReport {
    pub pyramids: Vec<PyramidCheck>,
    pub manifest: ManifestStatus,
    /// Work directories left by an interrupted generation.
    pub stale: Vec<PathBuf>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.manifest == ManifestStatus::Current
            && self.stale.is_empty()
            && self.pyramids.iter().all(PyramidCheck::is_ok)
    }
}

/// Validate the published output of a collection without touching it.
pub fn check_collection(
    collection: &Collection,
    output_root: &Path,
    config: &IiifConfig,
) -> CheckReport {
    let pyramids = collection
        .identifiers()
        .map(|identifier| PyramidCheck {
            identifier: identifier.clone(),
            report: validate_pyramid(
                &pyramid_dir(output_root, identifier),
                config.tiles.format,
                config.fallback.format,
            ),
        })
        .collect();

    let builder = ManifestBuilder::from_config(output_root, config);
    CheckReport {
        pyramids,
        manifest: manifest_status(&builder, collection),
        stale: stale_work_dirs(output_root),
    }
}

fn manifest_status(builder: &ManifestBuilder, collection: &Collection) -> ManifestStatus {
    let path = builder.manifest_path(&collection.id);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ManifestStatus::Missing,
        Err(e) => return ManifestStatus::Invalid(e.to_string()),
    };
    let manifest: Manifest = match serde_json::from_str(&content) {
        Ok(m) => m,
        Err(e) => return ManifestStatus::Invalid(e.to_string()),
    };
    let expected = collection
        .identifiers()
        .map(|identifier| canvas_id(builder.base_url(), identifier));
    if manifest.items.iter().map(|c| c.id.clone()).eq(expected) {
        ManifestStatus::Current
    } else {
        ManifestStatus::OutOfDate
    }
}
