//! The manifest builder: one IIIF Presentation 3 manifest per pass.
//!
//! - **Pass**: the ordered identifiers tiled in one pass, owned by the caller
//! - **Document**: serde types for Manifest → Canvas → AnnotationPage → Annotation
//! - **Canvas**: deterministic ids and canvas construction from `info.json`
//! - **Builder**: [`ManifestBuilder`], assembling in memory and writing atomically

mod builder;
pub mod canvas;
pub mod document;
mod pass;

pub use builder::{ManifestBuilder, ManifestError};
pub use document::{Label, MANIFEST_FILENAME, Manifest, label};
pub use pass::{Pass, PassError};
