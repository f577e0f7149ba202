//! Error types for tilegraph.
//!
//! Uses thiserror for structured errors with context. Errors are designed to:
//! - Carry enough context (band, tile index, level) to diagnose a failure
//! - Include actionable information (which operator, what to fix)
//! - Convert into the crate-wide [`TileGraphError`]

use crate::core::raster::{Rectangle, TileIndex};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an operator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorId(pub Uuid);

impl OperatorId {
    /// Create a new random operator ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperatorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Top-level error type for tilegraph.
#[derive(Error, Debug)]
pub enum TileGraphError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error(transparent)]
    TileComputation(#[from] TileComputationError),

    #[error("Execution cancelled after {completed}/{total} batches")]
    Cancelled { completed: usize, total: usize },

    #[error("Illegal state: cannot {operation}: {reason}")]
    IllegalState { operation: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Invalid or missing operator configuration, product structure problems.
///
/// Configuration errors are raised before any tile work starts.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigurationError {
    #[error("Invalid value for parameter '{parameter}' of operator '{operator}': {error}")]
    InvalidParameter {
        operator: String,
        parameter: String,
        error: String,
    },

    #[error("Missing required parameter '{parameter}' for operator '{operator}'")]
    MissingParameter { operator: String, parameter: String },

    #[error("Missing required source '{source_name}' for operator '{operator}'")]
    MissingSource { operator: String, source_name: String },

    #[error("Band '{band}' not found in product '{product}'")]
    UnknownBand { product: String, band: String },

    #[error("Product '{product}' already contains a band named '{band}'")]
    DuplicateBand { product: String, band: String },

    #[error("Product '{product}' already contains a mask named '{mask}'")]
    DuplicateMask { product: String, mask: String },

    #[error("Band '{band}' is still referenced by: {}", referenced_by.join(", "))]
    BandReferenced { band: String, referenced_by: Vec<String> },

    #[error("Band '{band}' is {width}x{height}, product is {product_width}x{product_height}")]
    BandSizeMismatch {
        band: String,
        width: u32,
        height: u32,
        product_width: u32,
        product_height: u32,
    },

    #[error("Band '{band}' has no source image")]
    NoSourceImage { band: String },

    #[error("Source {index} does not share the multi-level model of source 0: {reason}")]
    ModelMismatch { index: usize, reason: String },

    #[error("At least one source is required")]
    EmptySources,

    #[error("Invalid tile size {width}x{height}")]
    InvalidTileSize { width: u32, height: u32 },

    #[error("Invalid level count {0}, at least one level is required")]
    InvalidLevelCount(usize),

    #[error("Raster sample count mismatch: expected {expected}, got {actual}")]
    RasterSize { expected: usize, actual: usize },

    #[error("Invalid interval '{0}'")]
    InvalidInterval(String),

    #[error("Operator '{0}' is not registered")]
    UnknownOperator(String),

    #[error("{0}")]
    Other(String),
}

/// Out-of-range level, tile index or raster region.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexError {
    #[error("Level {level} is outside [0, {level_count})")]
    LevelOutOfRange { level: usize, level_count: usize },

    #[error("Tile {tile} is outside the {columns}x{rows} tile grid")]
    TileOutOfRange { tile: TileIndex, columns: u32, rows: u32 },

    #[error("Region {region} exceeds raster bounds {width}x{height}")]
    RegionOutOfBounds {
        region: Rectangle,
        width: u32,
        height: u32,
    },
}

/// A tile failed to compute.
///
/// Aborts the current executor run. Tiles cached before the failure stay valid.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Failed to compute tile {tile} of band '{band}' at level {level}: {error}")]
pub struct TileComputationError {
    /// Band (or band group label) whose tile failed.
    pub band: String,
    /// Tile index within the level's grid.
    pub tile: TileIndex,
    /// Resolution level.
    pub level: usize,
    /// Underlying failure.
    pub error: String,
}

// ============================================================================
// Error Utilities
// ============================================================================

impl TileGraphError {
    /// Build an illegal-state error.
    pub fn illegal_state(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        TileGraphError::IllegalState {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error reports a cancelled run.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TileGraphError::Cancelled { .. })
    }

    /// Whether this error reports a reused or uninitialized component.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, TileGraphError::IllegalState { .. })
    }

    /// The failing tile, if this is a tile computation error.
    pub fn tile_error(&self) -> Option<&TileComputationError> {
        match self {
            TileGraphError::TileComputation(e) => Some(e),
            _ => None,
        }
    }
}

impl ConfigurationError {
    /// Get suggestion for fixing this error.
    pub fn suggested_fix(&self) -> Option<String> {
        match self {
            ConfigurationError::MissingParameter { parameter, .. } => {
                Some(format!("Set a value for parameter '{}'", parameter))
            }
            ConfigurationError::MissingSource { source_name, .. } => {
                Some(format!("Bind a source product to '{}'", source_name))
            }
            ConfigurationError::InvalidParameter { parameter, error, .. } => {
                Some(format!("Adjust '{}': {}", parameter, error))
            }
            ConfigurationError::DuplicateBand { band, .. } => {
                Some(format!("Rename the band '{}' or remove the existing one", band))
            }
            ConfigurationError::BandReferenced { referenced_by, .. } => Some(format!(
                "Remove or edit the referencing nodes first: {}",
                referenced_by.join(", ")
            )),
            ConfigurationError::InvalidTileSize { .. } => {
                Some("Use a tile width and height of at least 1".to_string())
            }
            _ => None,
        }
    }
}

impl TileComputationError {
    /// Create a new tile computation error.
    pub fn new(band: impl Into<String>, tile: TileIndex, level: usize, error: impl fmt::Display) -> Self {
        Self {
            band: band.into(),
            tile,
            level,
            error: error.to_string(),
        }
    }
}

/// Result type alias for tilegraph operations.
pub type TileGraphResult<T> = Result<T, TileGraphError>;

/// Result type alias for configuration checks.
pub type ConfigurationResult<T> = Result<T, ConfigurationError>;
