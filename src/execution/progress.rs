//! Progress reporting and cancellation for executor runs.
//!
//! The executor reports one unit of work per (row, band group) pair and polls
//! [`ProgressMonitor::is_cancelled`] between batches. Monitors must not block.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Receives coarse progress from the executor.
pub trait ProgressMonitor: Send + Sync {
    /// A task with `total_work` units starts.
    fn begin(&self, task: &str, total_work: usize);

    /// `units` more units are done.
    fn worked(&self, units: usize);

    /// The task ended, successfully or not.
    fn done(&self);

    /// Whether the caller asked to stop.
    fn is_cancelled(&self) -> bool;
}

/// Monitor that ignores progress and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgressMonitor;

impl ProgressMonitor for NullProgressMonitor {
    fn begin(&self, _task: &str, _total_work: usize) {}

    fn worked(&self, _units: usize) {}

    fn done(&self) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A progress update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// A task has started.
    Started { task: String, total_work: usize },
    /// Overall progress.
    Progress {
        completed: usize,
        total: usize,
        percent: f32,
        elapsed_ms: u64,
    },
    /// The task ended.
    Done { completed: usize, total: usize, elapsed_ms: u64 },
    /// Cancellation was requested.
    Cancelled,
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Requests cancellation of a run from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Tracks progress, forwards updates to an optional callback and allows cancellation.
pub struct ProgressTracker {
    total: AtomicU64,
    completed: AtomicU64,
    cancel: CancelHandle,
    start_time: parking_lot::Mutex<Option<Instant>>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            cancel: CancelHandle::default(),
            start_time: parking_lot::Mutex::new(None),
            callback: None,
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// A handle that cancels the run this tracker observes.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.send_update(ProgressUpdate::Cancelled);
    }

    /// Units completed so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed) as usize
    }

    /// Total units of the current task.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed) as usize
    }

    /// Get current progress percentage.
    pub fn progress_percent(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        (self.completed() as f32 / total as f32) * 100.0
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time
            .lock()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressMonitor for ProgressTracker {
    fn begin(&self, task: &str, total_work: usize) {
        self.total.store(total_work as u64, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        *self.start_time.lock() = Some(Instant::now());
        self.send_update(ProgressUpdate::Started {
            task: task.to_string(),
            total_work,
        });
    }

    fn worked(&self, units: usize) {
        let completed = self.completed.fetch_add(units as u64, Ordering::Relaxed) as usize + units;
        self.send_update(ProgressUpdate::Progress {
            completed,
            total: self.total(),
            percent: self.progress_percent(),
            elapsed_ms: self.elapsed_ms(),
        });
    }

    fn done(&self) {
        self.send_update(ProgressUpdate::Done {
            completed: self.completed(),
            total: self.total(),
            elapsed_ms: self.elapsed_ms(),
        });
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Monitor publishing updates on a bounded channel.
///
/// Updates that do not fit into the channel are dropped so that a slow
/// consumer never stalls tile computation.
pub struct ChannelProgressMonitor {
    sender: Sender<ProgressUpdate>,
    tracker: ProgressTracker,
}

impl ChannelProgressMonitor {
    /// Create a monitor and the receiving end of its channel.
    pub fn bounded(capacity: usize) -> (Self, Receiver<ProgressUpdate>) {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        (
            Self {
                sender,
                tracker: ProgressTracker::new(),
            },
            receiver,
        )
    }

    /// A handle that cancels the observed run.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.tracker.cancel_handle()
    }

    fn publish(&self, update: ProgressUpdate) {
        match self.sender.try_send(update) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => log::trace!("Progress channel full, dropping update"),
        }
    }
}

impl ProgressMonitor for ChannelProgressMonitor {
    fn begin(&self, task: &str, total_work: usize) {
        self.tracker.begin(task, total_work);
        self.publish(ProgressUpdate::Started {
            task: task.to_string(),
            total_work,
        });
    }

    fn worked(&self, units: usize) {
        self.tracker.worked(units);
        self.publish(ProgressUpdate::Progress {
            completed: self.tracker.completed(),
            total: self.tracker.total(),
            percent: self.tracker.progress_percent(),
            elapsed_ms: self.tracker.elapsed_ms(),
        });
    }

    fn done(&self) {
        self.publish(ProgressUpdate::Done {
            completed: self.tracker.completed(),
            total: self.tracker.total(),
            elapsed_ms: self.tracker.elapsed_ms(),
        });
    }

    fn is_cancelled(&self) -> bool {
        self.tracker.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_progress_calculation() {
        let tracker = ProgressTracker::new();
        tracker.begin("test", 10);
        assert_eq!(tracker.progress_percent(), 0.0);
        tracker.worked(5);
        assert_eq!(tracker.progress_percent(), 50.0);
        tracker.worked(5);
        assert_eq!(tracker.progress_percent(), 100.0);
    }

    #[test]
    fn test_cancellation() {
        let tracker = ProgressTracker::new();
        let handle = tracker.cancel_handle();
        assert!(!tracker.is_cancelled());

        handle.cancel();
        assert!(tracker.is_cancelled());
        assert!(!NullProgressMonitor.is_cancelled());
    }

    #[test]
    fn test_callback_invoked() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let tracker = ProgressTracker::new().with_callback(Box::new(move |_| {
            call_count_clone.fetch_add(1, Ordering::Relaxed);
        }));

        tracker.begin("test", 2);
        tracker.worked(1);
        tracker.done();

        // Started, Progress, Done
        assert_eq!(call_count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_channel_monitor_drops_when_full() {
        let (monitor, receiver) = ChannelProgressMonitor::bounded(2);
        monitor.begin("test", 3);
        monitor.worked(1);
        monitor.worked(1);
        monitor.done();

        let updates: Vec<_> = receiver.try_iter().collect();
        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[0], ProgressUpdate::Started { total_work: 3, .. }));

        monitor.cancel_handle().cancel();
        assert!(monitor.is_cancelled());
    }
}
