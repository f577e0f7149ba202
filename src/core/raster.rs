//! Raster sample grids and tile geometry.
//!
//! A level of a band is divided into rectangular tiles of a fixed size:
//! - Tiles are addressed by a [`TileIndex`] (column, row)
//! - Tiles at the right and bottom edges are clipped to the raster bounds
//! - A [`Raster`] holds the samples of a whole level or of a single tile

use crate::core::error::{ConfigurationError, IndexError};
use crate::core::types::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Address of a tile within a level's tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileIndex {
    /// Tile column (x direction).
    pub column: u32,
    /// Tile row (y direction).
    pub row: u32,
}

impl TileIndex {
    /// Create a new tile index.
    pub fn new(column: u32, row: u32) -> Self {
        Self { column, row }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.column, self.row)
    }
}

/// Represents a rectangular region within a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    /// X offset from the raster origin
    pub x: u32,
    /// Y offset from the raster origin
    pub y: u32,
    /// Width of the region
    pub width: u32,
    /// Height of the region
    pub height: u32,
}

impl Rectangle {
    /// Create a new region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Get the right edge coordinate (exclusive).
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Get the bottom edge coordinate (exclusive).
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Calculate the area of this region in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Check if this region is entirely within the given bounds.
    pub fn is_within_bounds(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }

    /// Intersection with another region, if they overlap.
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right > x && bottom > y {
            Some(Rectangle::new(x, y, right - x, bottom - y))
        } else {
            None
        }
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}x{}]", self.x, self.y, self.width, self.height)
    }
}

/// Fixed-size tiling of one raster level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
}

impl TileGrid {
    /// Create a tile grid. Tile dimensions must be at least one pixel.
    pub fn new(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Result<Self, ConfigurationError> {
        if tile_width == 0 || tile_height == 0 {
            return Err(ConfigurationError::InvalidTileSize {
                width: tile_width,
                height: tile_height,
            });
        }
        Ok(Self {
            width,
            height,
            tile_width,
            tile_height,
        })
    }

    /// Raster width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Raster height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Tile width in pixels.
    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    /// Tile height in pixels.
    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// Number of tile columns, `ceil(width / tile_width)`.
    pub fn columns(&self) -> u32 {
        self.width.div_ceil(self.tile_width)
    }

    /// Number of tile rows, `ceil(height / tile_height)`.
    pub fn rows(&self) -> u32 {
        self.height.div_ceil(self.tile_height)
    }

    /// Total number of tiles.
    pub fn tile_count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    /// Check that a tile index addresses a tile of this grid.
    pub fn check_tile(&self, tile: TileIndex) -> Result<(), IndexError> {
        if tile.column >= self.columns() || tile.row >= self.rows() {
            return Err(IndexError::TileOutOfRange {
                tile,
                columns: self.columns(),
                rows: self.rows(),
            });
        }
        Ok(())
    }

    /// Pixel region covered by a tile, clipped to the raster bounds.
    pub fn tile_rect(&self, tile: TileIndex) -> Result<Rectangle, IndexError> {
        self.check_tile(tile)?;
        let x = tile.column * self.tile_width;
        let y = tile.row * self.tile_height;
        Ok(Rectangle::new(
            x,
            y,
            self.tile_width.min(self.width - x),
            self.tile_height.min(self.height - y),
        ))
    }

    /// Iterate all tile indices in row-major order.
    pub fn tiles(&self) -> TileIterator {
        TileIterator {
            columns: self.columns(),
            rows: self.rows(),
            current: 0,
        }
    }
}

/// Iterator over tile indices of a grid, row by row.
#[derive(Debug, Clone)]
pub struct TileIterator {
    columns: u32,
    rows: u32,
    current: u64,
}

impl Iterator for TileIterator {
    type Item = TileIndex;

    fn next(&mut self) -> Option<Self::Item> {
        if self.columns == 0 || self.current >= self.columns as u64 * self.rows as u64 {
            return None;
        }
        let column = (self.current % self.columns as u64) as u32;
        let row = (self.current / self.columns as u64) as u32;
        self.current += 1;
        Some(TileIndex::new(column, row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let total = self.columns as u64 * self.rows as u64;
        let remaining = total.saturating_sub(self.current) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TileIterator {}

/// A 2-D grid of samples of one data type.
///
/// Samples are stored widened to `f64` and coerced to the data type on write.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    data_type: DataType,
    samples: Vec<f64>,
}

impl Raster {
    /// Create a zero-filled raster.
    pub fn new(width: u32, height: u32, data_type: DataType) -> Self {
        Self::filled(width, height, data_type, 0.0)
    }

    /// Create a raster with every sample set to `value`.
    pub fn filled(width: u32, height: u32, data_type: DataType, value: f64) -> Self {
        Self {
            width,
            height,
            data_type,
            samples: vec![data_type.coerce(value); width as usize * height as usize],
        }
    }

    /// Create a raster from row-major samples.
    pub fn from_samples(
        width: u32,
        height: u32,
        data_type: DataType,
        samples: Vec<f64>,
    ) -> Result<Self, ConfigurationError> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(ConfigurationError::RasterSize {
                expected,
                actual: samples.len(),
            });
        }
        let samples = samples.into_iter().map(|v| data_type.coerce(v)).collect();
        Ok(Self {
            width,
            height,
            data_type,
            samples,
        })
    }

    /// Create a raster by evaluating `f(x, y)` for every pixel.
    pub fn from_fn<F>(width: u32, height: u32, data_type: DataType, f: F) -> Self
    where
        F: Fn(u32, u32) -> f64,
    {
        let mut samples = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                samples.push(data_type.coerce(f(x, y)));
            }
        }
        Self {
            width,
            height,
            data_type,
            samples,
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Sample data type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Bounds of this raster as a region at the origin.
    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(0, 0, self.width, self.height)
    }

    /// All samples in row-major order.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Get a sample, or `None` outside the raster.
    pub fn get(&self, x: u32, y: u32) -> Option<f64> {
        if x < self.width && y < self.height {
            Some(self.samples[self.offset(x, y)])
        } else {
            None
        }
    }

    /// Get a sample.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` lies outside the raster.
    pub fn sample(&self, x: u32, y: u32) -> f64 {
        assert!(x < self.width && y < self.height, "sample ({}, {}) out of bounds", x, y);
        self.samples[self.offset(x, y)]
    }

    /// Set a sample, coercing it to the data type. Out-of-bounds writes are ignored.
    pub fn set_sample(&mut self, x: u32, y: u32, value: f64) {
        if x < self.width && y < self.height {
            let offset = self.offset(x, y);
            self.samples[offset] = self.data_type.coerce(value);
        }
    }

    /// Copy out a region.
    pub fn crop(&self, region: &Rectangle) -> Result<Raster, IndexError> {
        if !region.is_within_bounds(self.width, self.height) {
            return Err(IndexError::RegionOutOfBounds {
                region: *region,
                width: self.width,
                height: self.height,
            });
        }
        let mut samples = Vec::with_capacity(region.area() as usize);
        for y in region.y..region.bottom() {
            let start = self.offset(region.x, y);
            samples.extend_from_slice(&self.samples[start..start + region.width as usize]);
        }
        Ok(Raster {
            width: region.width,
            height: region.height,
            data_type: self.data_type,
            samples,
        })
    }

    /// Copy `tile` into this raster with its origin at `(x, y)`, clipping at the edges.
    pub fn paste(&mut self, x: u32, y: u32, tile: &Raster) {
        let target = Rectangle::new(x, y, tile.width, tile.height);
        let Some(visible) = target.intersection(&self.bounds()) else {
            return;
        };
        for ty in 0..visible.height {
            for tx in 0..visible.width {
                let value = tile.samples[tile.offset(tx, ty)];
                let offset = self.offset(visible.x + tx, visible.y + ty);
                self.samples[offset] = self.data_type.coerce(value);
            }
        }
    }

    /// Apply a function to every sample, producing a raster of `data_type`.
    pub fn map<F>(&self, data_type: DataType, f: F) -> Raster
    where
        F: Fn(f64) -> f64,
    {
        Raster {
            width: self.width,
            height: self.height,
            data_type,
            samples: self.samples.iter().map(|&v| data_type.coerce(f(v))).collect(),
        }
    }

    /// Nearest-neighbour resample to the given size.
    pub fn subsample(&self, width: u32, height: u32) -> Raster {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let sx = self.width as f64 / width.max(1) as f64;
        let sy = self.height as f64 / height.max(1) as f64;
        Raster::from_fn(width, height, self.data_type, |x, y| {
            let src_x = ((x as f64 * sx) as u32).min(self.width.saturating_sub(1));
            let src_y = ((y as f64 * sy) as u32).min(self.height.saturating_sub(1));
            self.samples[self.offset(src_x, src_y)]
        })
    }

    /// Approximate memory size of the pixel payload in bytes.
    pub fn estimated_memory_size(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f64>()
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}
