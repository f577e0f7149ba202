//! # tilegraph - Lazy, tiled, multi-resolution raster processing
//!
//! tilegraph models raster products made of named bands, each backed by a
//! lazily computed image pyramid. Operators derive new bands from source
//! bands one tile at a time; an executor realizes every tile of an
//! operator's target product.
//!
//! ## Features
//!
//! - **Image pyramids**: per-level renderings computed on first access and
//!   cached until reset, from in-memory rasters, files or derived sources
//! - **Tiled operators**: per-tile operators compute bands independently,
//!   stack operators produce several bands from one shared computation
//! - **Deterministic scheduling**: work is issued in row batches, in one of
//!   two configurable orders, exactly once per band group and tile
//! - **Parallel realization**: tiles of a batch are computed on a rayon pool
//! - **Cancellation and progress**: cooperative, checked between batches
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tilegraph::prelude::*;
//! use std::sync::Arc;
//!
//! let mut source = RasterProduct::new("scene", "DEMO", 1024, 1024);
//! source.add_band(Band::from_raster("red", red_raster, 3)?)?;
//! source.add_band(Band::from_raster("nir", nir_raster, 3)?)?;
//!
//! let registry = OperatorRegistry::with_builtins();
//! let operator = registry.create(
//!     "NormalizedDifference",
//!     OperatorConfig::new().with_source("source", Arc::new(source)),
//! )?;
//!
//! let mut node = OperatorNode::new(operator)
//!     .with_config(ExecutionConfig::default().with_tile_size(256, 256));
//! let executor = OperatorExecutor::create(&mut node)?;
//! executor.run(&NullProgressMonitor)?;
//!
//! let nd = node.target_product()?.band("nd").unwrap().read_level(0)?;
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: Rasters, tile grids, parameters, operator traits and errors
//! - [`level`]: Multi-level models, sources and the level cache
//! - [`product`]: Bands, products, masks and metadata
//! - [`execution`]: Tile cache, scheduler, executor and progress reporting
//! - [`operators`]: Operator registry and built-in operators

#![warn(clippy::all)]

pub mod core;
pub mod execution;
pub mod level;
pub mod operators;
pub mod product;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use tilegraph::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{DataType, Value, ValueType};
    pub use crate::core::raster::{Raster, Rectangle, TileGrid, TileIndex, DEFAULT_TILE_SIZE};

    // Operators
    pub use crate::core::operator::{
        Operator, OperatorKind, OperatorMetadata, OperatorNode, OperatorState, PerTileOperator, StackOperator,
        TileRequest,
    };
    pub use crate::core::parameter::{
        Interval, ParameterDefinition, ParameterSchema, ParameterSet, SourceDefinition, SourceProducts,
    };

    // Errors
    pub use crate::core::error::{
        ConfigurationError, ConfigurationResult, IndexError, OperatorId, TileComputationError, TileGraphError,
        TileGraphResult,
    };

    // Pyramids
    pub use crate::level::{
        AffineTransform, DerivedMultiLevelSource, FileMultiLevelSource, ModelBounds, MultiLevelImage,
        MultiLevelModel, MultiLevelSource, RasterMultiLevelSource,
    };

    // Products
    pub use crate::product::{Band, Mask, MetadataAttribute, MetadataElement, RasterProduct};

    // Execution
    pub use crate::execution::{
        BandGroup, BandGroupKind, CancelHandle, ChannelProgressMonitor, ExecutionConfig, ExecutionOrder,
        ExecutionStats, ExecutorState, NullProgressMonitor, OperatorExecutor, ProgressMonitor, ProgressTracker,
        ProgressUpdate, TileScheduler,
    };

    // Registry
    pub use crate::operators::{OperatorConfig, OperatorRegistry, OperatorSpi, RegistryBuilder};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
