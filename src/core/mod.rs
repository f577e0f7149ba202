//! Core types and traits of the tilegraph raster engine.
//!
//! This module contains the foundational pieces shared by every layer:
//! - Sample data types and parameter values
//! - Rasters, tile indices and tile grids
//! - Operator traits, metadata and parameter schemas
//! - Error types

pub mod error;
pub mod operator;
pub mod parameter;
pub mod raster;
pub mod types;

// Re-export commonly used types
pub use error::{ConfigurationError, IndexError, TileComputationError, TileGraphError, TileGraphResult};
pub use operator::{
    Operator, OperatorKind, OperatorMetadata, OperatorNode, OperatorState, PerTileOperator, StackOperator, TileRequest,
};
pub use parameter::{Interval, ParameterDefinition, ParameterSchema, ParameterSet, SourceDefinition, SourceProducts};
pub use raster::{Raster, Rectangle, TileGrid, TileIndex};
pub use types::{DataType, Value, ValueType};
