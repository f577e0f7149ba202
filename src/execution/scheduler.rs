//! Tile realization.
//!
//! The executor hands work to a [`TileScheduler`] one row batch at a time.
//! The default [`ParallelTileScheduler`] realizes the columns of a batch on a
//! rayon pool; tests substitute a recording scheduler.

use crate::core::error::{ConfigurationError, TileComputationError};
use crate::core::raster::TileIndex;
use crate::execution::context::OperatorContext;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How the bands of a group obtain their pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandGroupKind {
    /// One band computed by a per-tile operator.
    PerTile,
    /// All bands computed jointly by a stack operator.
    Stack,
    /// One band backed by its own source image.
    Source,
}

/// Bands that are realized together, the unit of scheduling besides the tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandGroup {
    /// Position in the executor's group list.
    pub index: usize,
    pub kind: BandGroupKind,
    /// Band names in product order.
    pub bands: Vec<String>,
}

impl BandGroup {
    /// Band names joined by `+`.
    pub fn label(&self) -> String {
        self.bands.join("+")
    }

    pub fn contains(&self, band: &str) -> bool {
        self.bands.iter().any(|b| b == band)
    }
}

impl fmt::Display for BandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:?}]", self.label(), self.kind)
    }
}

/// Realizes the tiles of one row of one band group.
pub trait TileScheduler: Send + Sync {
    /// Realize tiles `(column, row)` for every column in `columns`.
    ///
    /// Returns once all of them are computed, or with the first failure.
    fn schedule_row_batch(&self, group: &BandGroup, row: u32, columns: &[u32]) -> Result<(), TileComputationError>;
}

/// Scheduler realizing a batch's tiles in parallel.
pub struct ParallelTileScheduler {
    context: Arc<OperatorContext>,
    level: usize,
    pool: Option<rayon::ThreadPool>,
}

impl ParallelTileScheduler {
    /// Create a scheduler for `context`.
    ///
    /// `parallelism` 0 uses rayon's global pool, otherwise a dedicated pool
    /// with that many threads is created.
    pub fn new(context: Arc<OperatorContext>, parallelism: usize) -> Result<Self, ConfigurationError> {
        let pool = if parallelism == 0 {
            None
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(parallelism)
                .thread_name(|i| format!("tilegraph-worker-{}", i))
                .build()
                .map_err(|e| ConfigurationError::Other(format!("Cannot create worker pool: {}", e)))?;
            Some(pool)
        };
        Ok(Self {
            context,
            level: 0,
            pool,
        })
    }

    /// Realize tiles of `level` instead of full resolution.
    pub fn with_level(mut self, level: usize) -> Self {
        self.level = level;
        self
    }

    /// Worker threads used for a batch.
    pub fn parallelism(&self) -> usize {
        self.pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |pool| pool.current_num_threads())
    }
}

impl TileScheduler for ParallelTileScheduler {
    fn schedule_row_batch(&self, group: &BandGroup, row: u32, columns: &[u32]) -> Result<(), TileComputationError> {
        let run = || {
            columns
                .par_iter()
                .try_for_each(|&column| self.context.realize(group.index, self.level, TileIndex::new(column, row)))
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

impl fmt::Debug for ParallelTileScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelTileScheduler")
            .field("level", &self.level)
            .field("parallelism", &self.parallelism())
            .finish()
    }
}
