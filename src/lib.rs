//! # iiif-static
//!
//! Static IIIF publishing for image collections. Every source image becomes
//! a pre-rendered, zoomable tile pyramid (IIIF Image API 3, level 0) and
//! every collection becomes one IIIF Presentation 3 manifest. The output
//! directory can be dropped on any file server: no image server, no
//! runtime request handling.
//!
//! # Architecture: Two Components, One Pass
//!
//! ```text
//! collection.toml ─┐
//!                  ├─ tile each image ──→ images/<id>/info.json + tiles + fallback
//!    iiif.toml ────┤        (parallel)
//!                  └─ build manifest ───→ <collection>/manifest.json
//! ```
//!
//! The tile generator and the manifest builder share no state. The builder
//! only depends on the on-disk layout the generator commits (`info.json` per
//! identifier) and on a caller-owned [`presentation::Pass`] recording which
//! identifiers were tiled, in order.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`tiling`] | Tile pyramid generation: geometry, descriptor, image backend, staged commit |
//! | [`presentation`] | Pass state, Presentation 3 documents, manifest assembly and writing |
//! | [`fingerprint`] | Content fingerprints that make regeneration idempotent |
//! | [`collection`] | `collection.toml` parsing and directory expansion |
//! | [`process`] | Pass driver: parallel tiling, ordered recording, manifest, checks |
//! | [`config`] | `iiif.toml` loading, merging over defaults, validation |
//! | [`identifier`] | Path- and URL-safe identifiers |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Fingerprints, Not Directory Existence
//!
//! A pyramid is reused only when the SHA-256 of its source and of the
//! parameters that shaped it both match the sidecar written with it. A
//! replaced source under the same identifier, or a changed tile size, is
//! regenerated without needing `--force`.
//!
//! ## Staged Commits
//!
//! Pyramids are written into a hidden sibling directory and renamed into
//! place. An interrupted or failed generation never leaves a half-written
//! pyramid that a later run could mistake for a finished one.
//!
//! ## Explicit Pass State
//!
//! The identifiers that become canvases live in a [`presentation::Pass`]
//! value the caller creates per collection, not in a long-lived builder.
//! Duplicate identifiers within a pass are rejected.

pub mod collection;
pub mod config;
pub mod fingerprint;
pub mod identifier;
pub mod output;
pub mod presentation;
pub mod process;
pub mod tiling;

#[cfg(test)]
pub(crate) mod test_helpers;
