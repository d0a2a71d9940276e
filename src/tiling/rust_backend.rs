//! Pure Rust image backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `ImageReader::into_dimensions` with content sniffing (header only) |
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` with content sniffing |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → PNG | `image::codecs::png::PngEncoder` |
//!
//! JPEG has no alpha channel and only 8-bit samples, so images are flattened
//! to `L8`/`Rgb8` before JPEG encoding. PNG receives the decoded pixels as-is.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::params::{Quality, TileFormat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader};
use std::borrow::Cow;
use std::path::Path;
use std::sync::LazyLock;

const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Whether `path` has an extension this backend can decode.
pub fn is_supported_input(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| supported_input_extensions().contains(&e.as_str()))
}

/// Pure Rust backend using the `image` crate.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_error(path: &Path, err: ImageError) -> BackendError {
    match err {
        ImageError::IoError(e) => BackendError::Io(e),
        other => BackendError::Decode(format!("{}: {}", path.display(), other)),
    }
}

fn encode_error(err: ImageError) -> BackendError {
    match err {
        ImageError::IoError(e) => BackendError::Io(e),
        ImageError::Unsupported(e) => BackendError::Unsupported(e.to_string()),
        other => BackendError::Encode(other.to_string()),
    }
}

/// Flatten to a colour type the baseline JPEG encoder accepts.
fn jpeg_compatible(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => Cow::Borrowed(image),
        DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_) => Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8())),
        _ => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
    }
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let (width, height) = ImageReader::open(path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| decode_error(path, e))?;
        Ok(Dimensions { width, height })
    }

    fn decode(&self, path: &Path) -> Result<DynamicImage, BackendError> {
        ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| decode_error(path, e))
    }

    fn encode(
        &self,
        image: &DynamicImage,
        output: &Path,
        format: TileFormat,
        quality: Quality,
    ) -> Result<(), BackendError> {
        let file = std::fs::File::create(output)?;
        let writer = std::io::BufWriter::new(file);
        let result = match format {
            TileFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(writer, quality.value() as u8);
                jpeg_compatible(image).write_with_encoder(encoder)
            }
            TileFormat::Png => image.write_with_encoder(PngEncoder::new(writer)),
        };
        result.map_err(encode_error)
    }
}
