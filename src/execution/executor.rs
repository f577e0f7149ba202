//! Operator executor.
//!
//! Realizes every target band of an initialized operator at full resolution.
//! The executor plans work as (band group, tile) items, issues them to a
//! [`TileScheduler`] as row batches in the configured [`ExecutionOrder`] and
//! blocks until all batches have completed.

use crate::core::error::{TileGraphError, TileGraphResult};
use crate::core::operator::OperatorNode;
use crate::core::raster::{TileGrid, TileIndex};
use crate::execution::config::ExecutionOrder;
use crate::execution::context::OperatorContext;
use crate::execution::progress::ProgressMonitor;
use crate::execution::scheduler::{BandGroup, ParallelTileScheduler, TileScheduler};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    Created,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Created => "created",
            ExecutorState::Ready => "ready",
            ExecutorState::Running => "running",
            ExecutorState::Completed => "completed",
            ExecutorState::Failed => "failed",
            ExecutorState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One schedulable unit: a tile of a band group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItem {
    pub group: usize,
    pub tile: TileIndex,
}

/// Tiles of one row of one band group, handed to the scheduler in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBatch {
    pub group: usize,
    pub row: u32,
    pub columns: Vec<u32>,
    /// Whether finishing this batch completes a (row, band group) progress unit.
    pub completes_unit: bool,
}

/// Statistics of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub order: ExecutionOrder,
    pub rows: u32,
    pub columns: u32,
    pub band_groups: usize,
    pub batches: usize,
    pub work_items: usize,
    pub duration: Duration,
}

impl ExecutionStats {
    /// Tiles realized per second.
    pub fn tiles_per_second(&self) -> f64 {
        let seconds = self.duration.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.work_items as f64 / seconds
    }
}

/// Runs an initialized operator to completion, exactly once.
pub struct OperatorExecutor {
    alias: String,
    groups: Vec<BandGroup>,
    grid: TileGrid,
    order: ExecutionOrder,
    scheduler: Arc<dyn TileScheduler>,
    state: Mutex<ExecutorState>,
}

impl OperatorExecutor {
    /// Create an executor realizing tiles on a rayon pool.
    ///
    /// Initializes the node if necessary; configuration errors surface here.
    pub fn create(node: &mut OperatorNode) -> TileGraphResult<Self> {
        node.initialize()?;
        let context = Arc::clone(node.context()?);
        let scheduler = ParallelTileScheduler::new(Arc::clone(&context), node.config().parallelism)?;
        log::debug!(
            "Executor for '{}' uses {} worker threads",
            node.alias(),
            scheduler.parallelism()
        );
        Ok(Self::from_context(&context, node.config().order, Arc::new(scheduler)))
    }

    /// Create an executor issuing batches to `scheduler`.
    pub fn with_scheduler(node: &mut OperatorNode, scheduler: Arc<dyn TileScheduler>) -> TileGraphResult<Self> {
        node.initialize()?;
        let order = node.config().order;
        Ok(Self::from_context(node.context()?, order, scheduler))
    }

    fn from_context(context: &OperatorContext, order: ExecutionOrder, scheduler: Arc<dyn TileScheduler>) -> Self {
        let executor = Self {
            alias: context.alias().to_string(),
            groups: context.groups().to_vec(),
            grid: *context.layout().base_grid(),
            order,
            scheduler,
            state: Mutex::new(ExecutorState::Created),
        };
        executor.transition(ExecutorState::Ready);
        executor
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.lock()
    }

    /// Configured enumeration order.
    pub fn order(&self) -> ExecutionOrder {
        self.order
    }

    pub fn groups(&self) -> &[BandGroup] {
        &self.groups
    }

    /// Level-0 tile grid.
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Batches issued by a run in `order`.
    pub fn batches(&self, order: ExecutionOrder) -> Vec<RowBatch> {
        let columns = self.grid.columns();
        let mut batches = Vec::new();
        for row in 0..self.grid.rows() {
            match order {
                ExecutionOrder::RowBandColumn => {
                    for group in &self.groups {
                        batches.push(RowBatch {
                            group: group.index,
                            row,
                            columns: (0..columns).collect(),
                            completes_unit: true,
                        });
                    }
                }
                ExecutionOrder::RowColumnBand => {
                    for column in 0..columns {
                        for group in &self.groups {
                            batches.push(RowBatch {
                                group: group.index,
                                row,
                                columns: vec![column],
                                completes_unit: column + 1 == columns,
                            });
                        }
                    }
                }
            }
        }
        batches
    }

    /// Work items of a run in `order`, in issuance sequence.
    pub fn work_items(&self, order: ExecutionOrder) -> Vec<WorkItem> {
        self.batches(order)
            .into_iter()
            .flat_map(|batch| {
                let row = batch.row;
                let group = batch.group;
                batch.columns.into_iter().map(move |column| WorkItem {
                    group,
                    tile: TileIndex::new(column, row),
                })
            })
            .collect()
    }

    /// Run with the configured order.
    pub fn run(&self, progress: &dyn ProgressMonitor) -> TileGraphResult<ExecutionStats> {
        self.execute(self.order, progress)
    }

    /// Realize every tile of every band group, blocking until done.
    ///
    /// Progress is reported once per (row, band group). Cancellation is
    /// honoured between batches. Only one call per executor is allowed.
    pub fn execute(&self, order: ExecutionOrder, progress: &dyn ProgressMonitor) -> TileGraphResult<ExecutionStats> {
        {
            let mut state = self.state.lock();
            if *state != ExecutorState::Ready {
                return Err(TileGraphError::illegal_state(
                    "execute",
                    format!("executor for '{}' is {}", self.alias, *state),
                ));
            }
            *state = ExecutorState::Running;
        }

        let batches = self.batches(order);
        let work_items: usize = batches.iter().map(|b| b.columns.len()).sum();
        let units = self.grid.rows() as usize * self.groups.len();
        log::info!(
            "Executing '{}': {}x{} tiles, {} band groups, {} batches in {} order",
            self.alias,
            self.grid.columns(),
            self.grid.rows(),
            self.groups.len(),
            batches.len(),
            order
        );

        let start = Instant::now();
        progress.begin(&format!("Computing '{}'", self.alias), units);
        let result = self.issue(&batches, progress);
        progress.done();

        match result {
            Ok(()) => {
                self.transition(ExecutorState::Completed);
                let stats = ExecutionStats {
                    order,
                    rows: self.grid.rows(),
                    columns: self.grid.columns(),
                    band_groups: self.groups.len(),
                    batches: batches.len(),
                    work_items,
                    duration: start.elapsed(),
                };
                log::info!(
                    "Executed '{}' in {:.2?} ({:.1} tiles/s)",
                    self.alias,
                    stats.duration,
                    stats.tiles_per_second()
                );
                Ok(stats)
            }
            Err(e) => {
                let state = if e.is_cancellation() {
                    ExecutorState::Cancelled
                } else {
                    ExecutorState::Failed
                };
                self.transition(state);
                log::warn!("Execution of '{}' {}: {}", self.alias, state, e);
                Err(e)
            }
        }
    }

    fn issue(&self, batches: &[RowBatch], progress: &dyn ProgressMonitor) -> TileGraphResult<()> {
        for (issued, batch) in batches.iter().enumerate() {
            if progress.is_cancelled() {
                return Err(TileGraphError::Cancelled {
                    completed: issued,
                    total: batches.len(),
                });
            }
            let group = &self.groups[batch.group];
            log::trace!("Batch {}: {} row {} columns {:?}", issued, group, batch.row, batch.columns);
            self.scheduler.schedule_row_batch(group, batch.row, &batch.columns)?;
            if batch.completes_unit {
                progress.worked(1);
            }
        }
        Ok(())
    }

    fn transition(&self, next: ExecutorState) {
        let mut state = self.state.lock();
        log::debug!("Executor for '{}': {} -> {}", self.alias, *state, next);
        *state = next;
    }
}

impl fmt::Debug for OperatorExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorExecutor")
            .field("alias", &self.alias)
            .field("state", &self.state())
            .field("groups", &self.groups.len())
            .field("grid", &self.grid)
            .field("order", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{ConfigurationResult, TileComputationError};
    use crate::core::operator::{
        Operator, OperatorKind, OperatorMetadata, PerTileOperator, StackOperator, TileRequest,
    };
    use crate::core::raster::Raster;
    use crate::core::types::DataType;
    use crate::execution::config::ExecutionConfig;
    use crate::execution::progress::{CancelHandle, NullProgressMonitor, ProgressTracker};
    use crate::product::{Band, RasterProduct};
    use indexmap::IndexMap;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Synthetic {
        width: u32,
        height: u32,
        bands: usize,
        computed: Arc<AtomicUsize>,
    }

    impl Synthetic {
        fn new(width: u32, height: u32, bands: usize) -> Self {
            Self {
                width,
                height,
                bands,
                computed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Operator for Synthetic {
        fn metadata(&self) -> OperatorMetadata {
            OperatorMetadata::builder("Synthetic").category("Test").build()
        }

        fn initialize(&mut self) -> ConfigurationResult<RasterProduct> {
            let mut product = RasterProduct::new("synthetic", "test", self.width, self.height);
            for i in 0..self.bands {
                product.add_band(Band::new(format!("b{}", i + 1), DataType::Float32, self.width, self.height))?;
            }
            Ok(product)
        }
    }

    impl PerTileOperator for Synthetic {
        fn compute_tile(&self, band: &Band, request: &TileRequest) -> TileGraphResult<Raster> {
            self.computed.fetch_add(1, Ordering::SeqCst);
            let rect = request.rect;
            Ok(Raster::from_fn(rect.width, rect.height, band.data_type(), |x, y| {
                (rect.x + x + rect.y + y) as f64
            }))
        }
    }

    impl StackOperator for Synthetic {
        fn compute_tile_stack(
            &self,
            bands: &[Arc<Band>],
            request: &TileRequest,
        ) -> TileGraphResult<IndexMap<String, Raster>> {
            self.computed.fetch_add(1, Ordering::SeqCst);
            Ok(bands
                .iter()
                .enumerate()
                .map(|(i, b)| {
                    let raster = Raster::filled(request.rect.width, request.rect.height, b.data_type(), i as f64);
                    (b.name().to_string(), raster)
                })
                .collect())
        }
    }

    /// Records every batch instead of computing tiles.
    #[derive(Default)]
    struct RecordingScheduler {
        calls: Mutex<Vec<(usize, u32, Vec<u32>)>>,
        cancel_after: Option<(usize, CancelHandle)>,
        fail_at: Option<usize>,
    }

    impl RecordingScheduler {
        fn items(&self) -> Vec<WorkItem> {
            self.calls
                .lock()
                .iter()
                .flat_map(|(group, row, columns)| {
                    columns.iter().map(move |&c| WorkItem {
                        group: *group,
                        tile: TileIndex::new(c, *row),
                    })
                })
                .collect()
        }
    }

    impl TileScheduler for RecordingScheduler {
        fn schedule_row_batch(&self, group: &BandGroup, row: u32, columns: &[u32]) -> Result<(), TileComputationError> {
            let mut calls = self.calls.lock();
            if self.fail_at == Some(calls.len()) {
                return Err(TileComputationError::new(group.label(), TileIndex::new(columns[0], row), 0, "boom"));
            }
            calls.push((group.index, row, columns.to_vec()));
            if let Some((after, handle)) = &self.cancel_after {
                if calls.len() == *after {
                    handle.cancel();
                }
            }
            Ok(())
        }
    }

    fn node(op: Synthetic, stack: bool, tile: u32) -> OperatorNode {
        let kind = if stack {
            OperatorKind::Stack(Box::new(op))
        } else {
            OperatorKind::PerTile(Box::new(op))
        };
        OperatorNode::new(kind).with_config(ExecutionConfig::default().with_tile_size(tile, tile))
    }

    fn recorded(op: Synthetic, stack: bool, tile: u32, order: ExecutionOrder) -> Vec<WorkItem> {
        let scheduler = Arc::new(RecordingScheduler::default());
        let executor = OperatorExecutor::with_scheduler(&mut node(op, stack, tile), scheduler.clone()).unwrap();
        executor.execute(order, &NullProgressMonitor).unwrap();
        assert_eq!(executor.state(), ExecutorState::Completed);
        scheduler.items()
    }

    fn item(group: usize, column: u32, row: u32) -> WorkItem {
        WorkItem {
            group,
            tile: TileIndex::new(column, row),
        }
    }

    #[test]
    fn test_single_tile() {
        let items = recorded(Synthetic::new(100, 100, 1), false, 100, ExecutionOrder::RowBandColumn);
        assert_eq!(items, vec![item(0, 0, 0)]);
    }

    #[test]
    fn test_four_tiles_row_major() {
        for order in [ExecutionOrder::RowBandColumn, ExecutionOrder::RowColumnBand] {
            let items = recorded(Synthetic::new(100, 100, 1), false, 50, order);
            assert_eq!(items, vec![item(0, 0, 0), item(0, 1, 0), item(0, 0, 1), item(0, 1, 1)]);
        }
    }

    #[test]
    fn test_per_tile_bands_are_separate_groups() {
        let items = recorded(Synthetic::new(100, 100, 2), false, 50, ExecutionOrder::RowBandColumn);
        assert_eq!(items.len(), 8);
        assert_eq!(items.iter().collect::<HashSet<_>>().len(), 8);
        assert_eq!(
            &items[..4],
            &[item(0, 0, 0), item(0, 1, 0), item(1, 0, 0), item(1, 1, 0)]
        );
    }

    #[test]
    fn test_stack_bands_share_one_group() {
        let items = recorded(Synthetic::new(100, 100, 2), true, 50, ExecutionOrder::RowBandColumn);
        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|i| i.group == 0));
    }

    #[test]
    fn test_orders_cover_same_items() {
        let mut a = recorded(Synthetic::new(100, 100, 2), false, 50, ExecutionOrder::RowBandColumn);
        let mut b = recorded(Synthetic::new(100, 100, 2), false, 50, ExecutionOrder::RowColumnBand);
        assert_ne!(a, b);
        assert_eq!(&b[..4], &[item(0, 0, 0), item(1, 0, 0), item(0, 1, 0), item(1, 1, 0)]);
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn test_progress_one_unit_per_row_and_group() {
        for order in [ExecutionOrder::RowBandColumn, ExecutionOrder::RowColumnBand] {
            let executor = OperatorExecutor::with_scheduler(
                &mut node(Synthetic::new(100, 100, 2), false, 25),
                Arc::new(RecordingScheduler::default()),
            )
            .unwrap();
            let tracker = ProgressTracker::new();
            executor.execute(order, &tracker).unwrap();
            assert_eq!(tracker.total(), 8);
            assert_eq!(tracker.completed(), 8);
        }
    }

    #[test]
    fn test_cancel_stops_issuing_batches() {
        let tracker = ProgressTracker::new();
        let scheduler = Arc::new(RecordingScheduler {
            cancel_after: Some((2, tracker.cancel_handle())),
            ..Default::default()
        });
        let executor =
            OperatorExecutor::with_scheduler(&mut node(Synthetic::new(100, 100, 1), false, 25), scheduler.clone())
                .unwrap();

        let err = executor.execute(ExecutionOrder::RowBandColumn, &tracker).unwrap_err();
        assert!(matches!(err, TileGraphError::Cancelled { completed: 2, total: 4 }));
        assert_eq!(scheduler.calls.lock().len(), 2);
        assert_eq!(executor.state(), ExecutorState::Cancelled);
    }

    #[test]
    fn test_batch_failure_aborts_run() {
        let scheduler = Arc::new(RecordingScheduler {
            fail_at: Some(1),
            ..Default::default()
        });
        let executor =
            OperatorExecutor::with_scheduler(&mut node(Synthetic::new(100, 100, 1), false, 50), scheduler.clone())
                .unwrap();

        let err = executor.execute(ExecutionOrder::RowBandColumn, &NullProgressMonitor).unwrap_err();
        let tile_error = err.tile_error().unwrap();
        assert_eq!(tile_error.band, "b1");
        assert_eq!(tile_error.tile, TileIndex::new(0, 1));
        assert_eq!(scheduler.calls.lock().len(), 1);
        assert_eq!(executor.state(), ExecutorState::Failed);
    }

    #[test]
    fn test_second_execute_is_illegal() {
        let executor = OperatorExecutor::with_scheduler(
            &mut node(Synthetic::new(10, 10, 1), false, 10),
            Arc::new(RecordingScheduler::default()),
        )
        .unwrap();
        assert_eq!(executor.state(), ExecutorState::Ready);
        executor.run(&NullProgressMonitor).unwrap();
        let err = executor.run(&NullProgressMonitor).unwrap_err();
        assert!(err.is_illegal_state());
        assert_eq!(executor.state(), ExecutorState::Completed);
    }

    #[test]
    fn test_parallel_execution_realizes_every_tile_once() {
        let op = Synthetic::new(100, 70, 2);
        let computed = Arc::clone(&op.computed);
        let mut node = OperatorNode::new(OperatorKind::PerTile(Box::new(op)))
            .with_config(ExecutionConfig::default().with_tile_size(32, 32).with_parallelism(3));
        let executor = OperatorExecutor::create(&mut node).unwrap();

        let stats = executor.run(&NullProgressMonitor).unwrap();
        assert_eq!((stats.columns, stats.rows, stats.band_groups), (4, 3, 2));
        assert_eq!(stats.work_items, 24);
        assert_eq!(computed.load(Ordering::SeqCst), 24);

        let product = node.target_product().unwrap();
        let b2 = product.band("b2").unwrap().read_level(0).unwrap();
        assert_eq!(b2.sample(99, 69), 168.0);
        assert_eq!(computed.load(Ordering::SeqCst), 24);
    }

    #[test]
    fn test_parallel_stack_execution() {
        let op = Synthetic::new(64, 64, 3);
        let computed = Arc::clone(&op.computed);
        let mut node = node(op, true, 16);
        let executor = OperatorExecutor::create(&mut node).unwrap();
        executor.run(&NullProgressMonitor).unwrap();
        assert_eq!(computed.load(Ordering::SeqCst), 16);

        let product = node.target_product().unwrap();
        assert_eq!(product.band("b3").unwrap().read_level(0).unwrap().sample(63, 0), 2.0);
    }

    proptest! {
        #[test]
        fn prop_work_items_cover_grid_exactly_once(
            width in 1u32..200,
            height in 1u32..200,
            tile in 8u32..96,
            bands in 1usize..4,
            stack in any::<bool>(),
        ) {
            let executor = OperatorExecutor::with_scheduler(
                &mut node(Synthetic::new(width, height, bands), stack, tile),
                Arc::new(RecordingScheduler::default()),
            )
            .unwrap();
            let groups = if stack { 1 } else { bands };
            let expected = (width.div_ceil(tile) * height.div_ceil(tile)) as usize * groups;

            let mut a = executor.work_items(ExecutionOrder::RowBandColumn);
            let mut b = executor.work_items(ExecutionOrder::RowColumnBand);
            prop_assert_eq!(a.len(), expected);
            prop_assert_eq!(a.iter().collect::<HashSet<_>>().len(), expected);
            a.sort();
            b.sort();
            prop_assert_eq!(a, b);
        }
    }
}
