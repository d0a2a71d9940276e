//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! coll (3 images)
//!     001 p1
//!         1000x800, generated
//!     002 p2
//!         640x480, unchanged, no fallback
//!     003 p3
//!         FAILED: cannot decode scans/p3.jpg: ...
//! Manifest: https://example.org/coll/manifest.json (2 canvases)
//! Tiles: 1 generated, 0 regenerated, 1 unchanged, 1 failed (3 total)
//! ```
//!
//! Worker threads finish in any order, so image lines may appear out of
//! index order; the index is the image's position in the collection.
//!
//! ## Check
//!
//! ```text
//! 001 p1: ok (21 tiles)
//! 002 p2: 1 problem(s)
//!     missing tile 0,0,256,256/256,256/0/default.jpg
//! Manifest: current
//! Stale: dist/images/.staging-a1b2 (left by an interrupted run)
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::process::{CheckReport, ManifestStatus, PassResult, ProcessEvent};
use crate::tiling::{TileOutcome, TileStatus};

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn status_label(status: TileStatus) -> &'static str {
    match status {
        TileStatus::Generated => "generated",
        TileStatus::Regenerated => "regenerated",
        TileStatus::Skipped => "unchanged",
    }
}

fn outcome_detail(width: u32, height: u32, status: TileStatus, fallback: bool) -> String {
    let mut detail = format!("{}x{}, {}", width, height, status_label(status));
    if !fallback {
        detail.push_str(", no fallback");
    }
    detail
}

// ============================================================================
// Build
// ============================================================================

/// Format a single progress event as display lines.
pub fn format_process_event(event: &ProcessEvent) -> Vec<String> {
    match event {
        ProcessEvent::PassStarted { manifest, images } => {
            vec![format!("{} ({} images)", manifest, images)]
        }
        ProcessEvent::ImageTiled {
            index,
            identifier,
            status,
            width,
            height,
            fallback,
        } => vec![
            format!("{}{} {}", indent(1), format_index(*index), identifier),
            format!(
                "{}{}",
                indent(2),
                outcome_detail(*width, *height, *status, *fallback)
            ),
        ],
        ProcessEvent::ImageFailed {
            index,
            identifier,
            reason,
        } => vec![
            format!("{}{} {}", indent(1), format_index(*index), identifier),
            format!("{}FAILED: {}", indent(2), reason),
        ],
        ProcessEvent::ManifestWritten { url, canvases } => {
            vec![format!("Manifest: {} ({} canvases)", url, canvases)]
        }
    }
}

/// Format the closing summary of a pass.
pub fn format_pass_summary(result: &PassResult) -> Vec<String> {
    let mut lines = vec![format!("Tiles: {}", result.stats)];
    if !result.failures.is_empty() {
        lines.push("Left out of the manifest:".to_string());
        for failure in &result.failures {
            lines.push(format!("{}{}", indent(1), failure));
        }
    }
    lines
}

pub fn print_pass_summary(result: &PassResult) {
    for line in format_pass_summary(result) {
        println!("{}", line);
    }
}

/// Format the result of tiling a single image.
pub fn format_tile_outcome(outcome: &TileOutcome, service_url: &str) -> Vec<String> {
    vec![
        format!(
            "{}: {}",
            outcome.identifier,
            outcome_detail(
                outcome.width,
                outcome.height,
                outcome.status,
                outcome.fallback
            )
        ),
        format!("{}Service: {}/info.json", indent(1), service_url),
    ]
}

pub fn print_tile_outcome(outcome: &TileOutcome, service_url: &str) {
    for line in format_tile_outcome(outcome, service_url) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

pub fn format_check_report(report: &CheckReport) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, check) in report.pyramids.iter().enumerate() {
        let header = format!("{} {}", format_index(i + 1), check.identifier);
        match &check.report {
            Ok(r) if r.is_complete() => {
                let mut line = format!("{}: ok ({} tiles)", header, r.tiles);
                if !r.has_fallback {
                    line.push_str(", no fallback");
                }
                lines.push(line);
            }
            Ok(r) => {
                lines.push(format!("{}: {} problem(s)", header, r.problems.len()));
                for problem in &r.problems {
                    lines.push(format!("{}{}", indent(1), problem));
                }
            }
            Err(e) => lines.push(format!("{}: {}", header, e)),
        }
    }
    let manifest = match &report.manifest {
        ManifestStatus::Missing => "missing".to_string(),
        ManifestStatus::Invalid(reason) => format!("invalid ({})", reason),
        ManifestStatus::OutOfDate => "out of date".to_string(),
        ManifestStatus::Current => "current".to_string(),
    };
    lines.push(format!("Manifest: {}", manifest));
    for dir in &report.stale {
        lines.push(format!("Stale: {} (left by an interrupted run)", dir.display()));
    }
    lines
}

pub fn print_check_report(report: &CheckReport) {
    for line in format_check_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
