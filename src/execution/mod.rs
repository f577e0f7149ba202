//! Execution module.
//!
//! This module turns initialized operators into computed bands: tile
//! layout and caching, the row-batch scheduler and the operator executor.

pub mod cache;
pub mod config;
pub mod context;
pub mod executor;
pub mod progress;
pub mod scheduler;

pub use cache::{CacheStats, TileCache, TileKey, TileSet};
pub use config::{ExecutionConfig, ExecutionOrder};
pub use context::{OperatorContext, TileLayout};
pub use executor::{ExecutionStats, ExecutorState, OperatorExecutor, RowBatch, WorkItem};
pub use progress::{
    CancelHandle, ChannelProgressMonitor, NullProgressMonitor, ProgressCallback, ProgressMonitor, ProgressTracker,
    ProgressUpdate,
};
pub use scheduler::{BandGroup, BandGroupKind, ParallelTileScheduler, TileScheduler};
