//! Tile pyramid generation: source image in, static IIIF level-0 image
//! service out.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` with content sniffing |
//! | **Downsample** | `DynamicImage::resize_exact` (Triangle), one halving per level |
//! | **Cut tiles** | `DynamicImage::crop_imm` |
//! | **Encode** | `JpegEncoder` / `PngEncoder` |
//! | **Stage + commit** | `tempfile::Builder::tempdir_in` + `std::fs::rename` |
//!
//! The module is split into:
//! - **Calculations**: pure pyramid geometry (unit testable)
//! - **Parameters**: tile encodings, fallback policy, quality
//! - **Descriptor**: the `info.json` document
//! - **Layout**: where files live inside a pyramid, and validation of it
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Generator**: [`TileGenerator`], combining all of the above

pub mod backend;
mod calculations;
pub mod descriptor;
pub mod generator;
pub mod layout;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{Level, Region, TileSpec, level_dimensions, plan_level, plan_pyramid, scale_factors};
pub use descriptor::{DescriptorError, ImageInfo};
pub use generator::{TileError, TileGenerator, TileOptions, TileOutcome, TileRequest, TileStatus};
pub use layout::{IMAGES_DIR, PyramidReport, stale_work_dirs, validate_pyramid};
pub use params::{FallbackMode, Quality, TileFormat};
pub use rust_backend::{RustBackend, is_supported_input};
