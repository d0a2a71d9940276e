//! Pure calculation functions for pyramid geometry.
//!
//! All functions here are pure and testable without any I/O or images.
//!
//! A pyramid has one level per scale factor `sf` in `1, 2, 4, …`. Level
//! dimensions are `ceil(width / sf) × ceil(height / sf)` and the level is cut
//! into a grid of `tile_size` squares, the last column and row cropped to
//! whatever pixels remain. Each tile is addressed in IIIF terms by its region
//! in full-resolution coordinates plus the pixel size it is rendered at.

/// A region of the full-resolution image, in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One tile of one pyramid level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSpec {
    pub scale_factor: u32,
    pub column: u32,
    pub row: u32,
    /// Offset within the downsampled level image.
    pub x: u32,
    pub y: u32,
    /// Rendered size, at most `tile_size` in each axis.
    pub width: u32,
    pub height: u32,
    /// Area of the full-resolution image this tile covers.
    pub region: Region,
}

impl TileSpec {
    /// Path of the tile relative to the pyramid root:
    /// `{x},{y},{w},{h}/{tw},{th}/0/default.{ext}`.
    pub fn relative_path(&self, extension: &str) -> String {
        format!(
            "{},{},{},{}/{},{}/0/default.{}",
            self.region.x,
            self.region.y,
            self.region.width,
            self.region.height,
            self.width,
            self.height,
            extension
        )
    }
}

/// One resolution level and its tile grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub scale_factor: u32,
    pub width: u32,
    pub height: u32,
    pub columns: u32,
    pub rows: u32,
    pub tiles: Vec<TileSpec>,
}

/// Scale factors for an image, finest first.
///
/// Stops at the smallest power of two whose level fits in a single tile, so
/// the coarsest level always consists of exactly one tile.
///
/// ```
/// # use iiif_static::tiling::scale_factors;
/// assert_eq!(scale_factors(1000, 800, 256), vec![1, 2, 4]);
/// assert_eq!(scale_factors(200, 100, 256), vec![1]);
/// ```
pub fn scale_factors(width: u32, height: u32, tile_size: u32) -> Vec<u32> {
    debug_assert!(tile_size > 0, "tile_size must be positive");
    let longest = width.max(height);
    let mut factors = vec![1];
    let mut factor = 1u32;
    while longest.div_ceil(factor) > tile_size && factor < (1 << 31) {
        factor *= 2;
        factors.push(factor);
    }
    factors
}

/// Dimensions of the level at `scale_factor` (rounded up, never zero for a
/// non-empty image).
pub fn level_dimensions(width: u32, height: u32, scale_factor: u32) -> (u32, u32) {
    (width.div_ceil(scale_factor), height.div_ceil(scale_factor))
}

/// Plan the tile grid of a single level.
pub fn plan_level(width: u32, height: u32, tile_size: u32, scale_factor: u32) -> Level {
    let (level_w, level_h) = level_dimensions(width, height, scale_factor);
    let columns = level_w.div_ceil(tile_size);
    let rows = level_h.div_ceil(tile_size);
    let span = tile_size.saturating_mul(scale_factor);

    let mut tiles = Vec::with_capacity((columns * rows) as usize);
    for row in 0..rows {
        for column in 0..columns {
            let x = column * tile_size;
            let y = row * tile_size;
            let region_x = column.saturating_mul(span);
            let region_y = row.saturating_mul(span);
            tiles.push(TileSpec {
                scale_factor,
                column,
                row,
                x,
                y,
                width: tile_size.min(level_w - x),
                height: tile_size.min(level_h - y),
                region: Region {
                    x: region_x,
                    y: region_y,
                    width: span.min(width - region_x),
                    height: span.min(height - region_y),
                },
            });
        }
    }

    Level {
        scale_factor,
        width: level_w,
        height: level_h,
        columns,
        rows,
        tiles,
    }
}

/// Plan every level of the pyramid, finest first.
pub fn plan_pyramid(width: u32, height: u32, tile_size: u32) -> Vec<Level> {
    scale_factors(width, height, tile_size)
        .into_iter()
        .map(|sf| plan_level(width, height, tile_size, sf))
        .collect()
}
