//! Execution configuration.
//!
//! Settings can be built in code or loaded from a TOML file:
//!
//! ```toml
//! tile_width = 256
//! tile_height = 256
//! parallelism = 4
//! order = "row-column-band"
//! cache_capacity = 4096
//! cache_memory_mb = 256
//! ```

use crate::core::error::{ConfigurationError, TileGraphResult};
use crate::core::raster::DEFAULT_TILE_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Sequence in which the executor visits work items.
///
/// Both orders visit the same (band group, tile) pairs, row by row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionOrder {
    /// Row outer, band group middle, column inner.
    #[default]
    RowBandColumn,
    /// Row outer, column middle, band group inner.
    RowColumnBand,
}

impl ExecutionOrder {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionOrder::RowBandColumn => "row-band-column",
            ExecutionOrder::RowColumnBand => "row-column-band",
        }
    }
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExecutionOrder {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "row-band-column" => Ok(ExecutionOrder::RowBandColumn),
            "row-column-band" => Ok(ExecutionOrder::RowColumnBand),
            other => Err(ConfigurationError::Other(format!(
                "Unknown execution order '{}', expected row-band-column or row-column-band",
                other
            ))),
        }
    }
}

/// Settings for operator execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Tile width; falls back to the product's preferred size.
    pub tile_width: Option<u32>,
    /// Tile height; falls back to the product's preferred size.
    pub tile_height: Option<u32>,
    /// Worker threads for tile realization (0 = use all available).
    pub parallelism: usize,
    /// Default work item order.
    pub order: ExecutionOrder,
    /// Maximum number of cached tile sets.
    pub cache_capacity: usize,
    /// Memory budget of the tile cache in megabytes.
    pub cache_memory_mb: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            tile_width: None,
            tile_height: None,
            parallelism: 0,
            order: ExecutionOrder::default(),
            cache_capacity: 4096,
            cache_memory_mb: 512,
        }
    }
}

impl ExecutionConfig {
    /// Create a new config builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tile size.
    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = Some(width);
        self.tile_height = Some(height);
        self
    }

    /// Set the number of worker threads.
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = threads;
        self
    }

    /// Set the default execution order.
    pub fn with_order(mut self, order: ExecutionOrder) -> Self {
        self.order = order;
        self
    }

    /// Set the tile cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the tile cache memory budget in megabytes.
    pub fn with_cache_memory_mb(mut self, mb: usize) -> Self {
        self.cache_memory_mb = mb;
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> TileGraphResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> TileGraphResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Resolve the tile size for a `width` x `height` product.
    ///
    /// Explicit settings win, then the product's preferred tile size, then
    /// [`DEFAULT_TILE_SIZE`] clamped to the product size.
    pub fn resolve_tile_size(&self, width: u32, height: u32, preferred: Option<(u32, u32)>) -> (u32, u32) {
        let fallback = |size: u32, preferred: Option<u32>| preferred.unwrap_or(DEFAULT_TILE_SIZE.min(size.max(1)));
        (
            self.tile_width
                .unwrap_or_else(|| fallback(width, preferred.map(|p| p.0))),
            self.tile_height
                .unwrap_or_else(|| fallback(height, preferred.map(|p| p.1))),
        )
    }
}
