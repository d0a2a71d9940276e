//! Image backend trait and shared types.
//!
//! The [`ImageBackend`] trait covers the three operations that touch image
//! files: identify, decode and encode. Pixel work in between (downsampling,
//! cropping) is done on the decoded [`DynamicImage`] directly.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend); tests use a recording
//! mock to check which files were decoded or written.

use super::params::{Quality, TileFormat};
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Unsupported by encoder: {0}")]
    Unsupported(String),
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image backends.
pub trait ImageBackend: Sync {
    /// Read image dimensions without decoding pixel data where possible.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Decode the whole image.
    fn decode(&self, path: &Path) -> Result<DynamicImage, BackendError>;

    /// Encode `image` to `output` in the given format.
    ///
    /// Returns [`BackendError::Unsupported`] when the encoder can't represent
    /// the image, so callers can distinguish it from I/O failures.
    fn encode(
        &self,
        image: &DynamicImage,
        output: &Path,
        format: TileFormat,
        quality: Quality,
    ) -> Result<(), BackendError>;
}
