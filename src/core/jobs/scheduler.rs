//! Recurring-job driver on top of the queue.
//!
//! Each scheduled entry arms a periodic tick when enabled. On tick either
//! the entry's job source picks inputs dynamically (e.g. the mints due for
//! refresh) or the fixed payload is enqueued directly. `last_run` updates
//! on every tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::queue::{JobOptions, JobPayload, JobQueue};

/// Produces the payloads for one tick of a scheduled job.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn jobs(&self) -> Vec<(JobPayload, JobOptions)>;
}

/// Definition of one recurring job.
pub struct ScheduledJob {
    pub id: String,
    pub every: Duration,
    /// Fixed payload, enqueued when no source is set.
    pub payload: Option<JobPayload>,
    pub options: JobOptions,
    pub enabled: bool,
    /// Dynamic input selection, overriding `payload`.
    pub source: Option<Arc<dyn JobSource>>,
}

struct Entry {
    job: ScheduledJob,
    last_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Drives recurring work into the queue.
pub struct JobScheduler {
    queue: Arc<JobQueue>,
    entries: Mutex<Vec<Entry>>,
}

impl JobScheduler {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a recurring job. Takes effect at the next `start`.
    pub fn register(&self, job: ScheduledJob) {
        self.entries.lock().push(Entry {
            job,
            last_run: Arc::new(Mutex::new(None)),
            task: None,
        });
    }

    /// Arm a periodic tick for every enabled job.
    pub fn start(&self) {
        let mut entries = self.entries.lock();
        let mut armed = 0;
        for entry in entries.iter_mut() {
            if !entry.job.enabled || entry.task.is_some() {
                continue;
            }
            armed += 1;

            let queue = Arc::clone(&self.queue);
            let last_run = Arc::clone(&entry.last_run);
            let every = entry.job.every;
            let id = entry.job.id.clone();
            let payload = entry.job.payload.clone();
            let options = entry.job.options.clone();
            let source = entry.job.source.clone();

            entry.task = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // Skip the immediate tick; the first run lands after one period.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    *last_run.lock() = Some(Utc::now());

                    let batch: Vec<(JobPayload, JobOptions)> = match &source {
                        Some(source) => source.jobs().await,
                        None => payload
                            .clone()
                            .map(|p| vec![(p, options.clone())])
                            .unwrap_or_default(),
                    };
                    debug!(schedule = %id, jobs = batch.len(), "Schedule tick");
                    for (payload, options) in batch {
                        queue.add(payload, options);
                    }
                }
            }));
        }
        info!(armed, "Job scheduler started");
    }

    /// Last tick time of one schedule.
    pub fn last_run(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.job.id == id)
            .and_then(|e| *e.last_run.lock())
    }

    /// Stop all ticks.
    pub fn stop(&self) {
        for entry in self.entries.lock().iter_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{AnalysisOptions, MintAddress};
    use tokio::time::sleep;

    fn payload(mint: &str) -> JobPayload {
        JobPayload::TrendUpdate {
            mint: MintAddress::from(mint),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enabled_jobs_enqueue_on_tick() {
        let queue = Arc::new(JobQueue::new(3));
        let scheduler = JobScheduler::new(queue.clone());
        scheduler.register(ScheduledJob {
            id: "trend".into(),
            every: Duration::from_secs(10),
            payload: Some(payload("mint")),
            options: JobOptions::default(),
            enabled: true,
            source: None,
        });
        scheduler.start();

        sleep(Duration::from_secs(25)).await;
        scheduler.stop();

        assert!(queue.stats().waiting >= 2);
        assert!(scheduler.last_run("trend").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_jobs_never_tick() {
        let queue = Arc::new(JobQueue::new(3));
        let scheduler = JobScheduler::new(queue.clone());
        scheduler.register(ScheduledJob {
            id: "off".into(),
            every: Duration::from_secs(1),
            payload: Some(payload("mint")),
            options: JobOptions::default(),
            enabled: false,
            source: None,
        });
        scheduler.start();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(queue.stats().waiting, 0);
        assert!(scheduler.last_run("off").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn source_selects_inputs_dynamically() {
        struct TwoMints;

        #[async_trait]
        impl JobSource for TwoMints {
            async fn jobs(&self) -> Vec<(JobPayload, JobOptions)> {
                vec![
                    (
                        JobPayload::SingleAnalysis {
                            mint: MintAddress::from("a"),
                            options: AnalysisOptions::default(),
                        },
                        JobOptions::default(),
                    ),
                    (
                        JobPayload::SingleAnalysis {
                            mint: MintAddress::from("b"),
                            options: AnalysisOptions::default(),
                        },
                        JobOptions::default(),
                    ),
                ]
            }
        }

        let queue = Arc::new(JobQueue::new(3));
        let scheduler = JobScheduler::new(queue.clone());
        scheduler.register(ScheduledJob {
            id: "dynamic".into(),
            every: Duration::from_secs(10),
            payload: None,
            options: JobOptions::default(),
            enabled: true,
            source: Some(Arc::new(TwoMints)),
        });
        scheduler.start();

        sleep(Duration::from_secs(11)).await;
        scheduler.stop();
        assert_eq!(queue.stats().waiting, 2);
    }
}
