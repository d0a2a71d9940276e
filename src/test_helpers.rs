//! Shared test utilities: synthetic source images and directory snapshots.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! create_test_jpeg(&tmp.path().join("p1.jpg"), 1000, 800);
//! let before = snapshot_dir(&pyramid);
//! // ... run something that must not write ...
//! assert_eq!(snapshot_dir(&pyramid), before);
//! ```

use image::{ImageEncoder, RgbImage, RgbaImage};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

// =========================================================================
// Synthetic images
// =========================================================================

/// Create a small valid JPEG file with the given dimensions.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::jpeg::JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Create a small valid RGBA PNG file with the given dimensions.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(y % 256) as u8, 64, (x % 256) as u8, 200])
    });
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::png::PngEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .unwrap();
}

// =========================================================================
// Directory snapshots
// =========================================================================

/// Every file under `dir`, keyed by `/`-separated relative path, with its
/// contents. Two equal snapshots mean nothing was written in between.
pub fn snapshot_dir(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (relative, std::fs::read(entry.path()).unwrap())
        })
        .collect()
}
