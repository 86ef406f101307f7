//! Periodic operational status reporting.
//!
//! Aggregates pool, balancer, tracker, queue, and worker state into one
//! report for the admin surface, and logs it on a fixed cadence.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::core::chain::{BlockTracker, ChainStats};
use crate::core::jobs::{JobProcessor, JobQueue, QueueStats, WorkerStats};
use crate::core::stream::{StreamManager, StreamStatus};

/// One operational status report.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub stream: StreamStatus,
    pub chain: ChainStats,
    pub queue: QueueStats,
    pub workers: Vec<WorkerStats>,
}

pub struct StatusReporter {
    manager: Arc<StreamManager>,
    tracker: Arc<BlockTracker>,
    queue: Arc<JobQueue>,
    processor: Arc<JobProcessor>,
    interval: Duration,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StatusReporter {
    pub fn new(
        manager: Arc<StreamManager>,
        tracker: Arc<BlockTracker>,
        queue: Arc<JobQueue>,
        processor: Arc<JobProcessor>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            tracker,
            queue,
            processor,
            interval,
            task: Mutex::new(None),
        })
    }

    /// Snapshot of the whole system.
    pub fn report(&self) -> StatusReport {
        StatusReport {
            stream: self.manager.status(),
            chain: self.tracker.stats(),
            queue: self.queue.stats(),
            workers: self.processor.worker_stats(),
        }
    }

    pub fn start(self: &Arc<Self>) {
        let reporter = Arc::clone(self);
        *self.task.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reporter.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = reporter.report();
                info!(
                    groups = report.stream.groups.len(),
                    subscriptions_in_window = report.stream.subscriptions_in_window,
                    connections = report.stream.pool.total,
                    unhealthy = report.stream.pool.unhealthy,
                    current_slot = reporter.tracker.current_slot(),
                    gaps = report.chain.gaps,
                    jobs_waiting = report.queue.waiting,
                    jobs_completed = report.queue.completed,
                    jobs_failed = report.queue.failed,
                    "Status"
                );
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
