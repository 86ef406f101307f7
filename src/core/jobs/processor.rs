//! Worker pool draining the job queue.
//!
//! Each worker loops `next → process → complete|fail`. Processing is
//! dispatched on the payload kind; batch jobs pace their per-mint calls to
//! respect the external rate limiters and emit progress after each step.
//! Recurring analyses force a refresh and compare against the previous
//! snapshot for significant movement. A failing job never kills its
//! worker loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::queue::{Job, JobPayload, JobQueue};
use crate::app::JobsConfig;
use crate::core::analysis::{AnalysisOutcome, HolderAnalysisOrchestrator};
use crate::core::bus::{BusEvent, EventBus};
use crate::core::domain::{AnalysisOptions, MintAddress};
use crate::error::Result;

/// Significance thresholds for recurring analyses.
const SIGNIFICANT_SCORE_DELTA: f64 = 20.0;
const SIGNIFICANT_HOLDER_DELTA: i64 = 50;
const SIGNIFICANT_CONCENTRATION_DELTA: f64 = 10.0;

const IDLE_POLL: Duration = Duration::from_millis(200);

/// Analysis seam; the orchestrator is the production implementation.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        mint: &MintAddress,
        options: &AnalysisOptions,
    ) -> Result<AnalysisOutcome>;
}

#[async_trait]
impl Analyzer for HolderAnalysisOrchestrator {
    async fn analyze(
        &self,
        mint: &MintAddress,
        options: &AnalysisOptions,
    ) -> Result<AnalysisOutcome> {
        HolderAnalysisOrchestrator::analyze(self, mint, options).await
    }
}

/// Worker activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Busy,
}

/// Per-worker counters.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub status: WorkerStatus,
    pub current_job: Option<Uuid>,
    pub jobs_processed: u64,
    pub errors: u64,
    pub average_processing_ms: f64,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            status: WorkerStatus::Idle,
            current_job: None,
            jobs_processed: 0,
            errors: 0,
            average_processing_ms: 0.0,
        }
    }
}

/// Fixed-size worker pool over the job queue.
pub struct JobProcessor {
    queue: Arc<JobQueue>,
    analyzer: Arc<dyn Analyzer>,
    bus: Arc<EventBus>,
    config: JobsConfig,
    stats: Vec<Arc<Mutex<WorkerStats>>>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl JobProcessor {
    pub fn new(
        queue: Arc<JobQueue>,
        analyzer: Arc<dyn Analyzer>,
        bus: Arc<EventBus>,
        config: JobsConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let stats = (0..config.max_workers)
            .map(|_| Arc::new(Mutex::new(WorkerStats::default())))
            .collect();
        Arc::new(Self {
            queue,
            analyzer,
            bus,
            config,
            stats,
            shutdown,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the worker tasks.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for worker_id in 0..self.config.max_workers {
            let processor = Arc::clone(self);
            let stats = Arc::clone(&self.stats[worker_id]);
            let mut shutdown = self.shutdown.subscribe();
            workers.push(tokio::spawn(async move {
                debug!(worker_id, "Worker starting");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    let Some(job) = processor.queue.next() else {
                        tokio::select! {
                            _ = sleep(IDLE_POLL) => {}
                            _ = shutdown.changed() => {}
                        }
                        continue;
                    };
                    processor.run_job(job, &stats).await;
                }
                debug!(worker_id, "Worker stopped");
            }));
        }
        info!(workers = self.config.max_workers, "Job processor started");
    }

    async fn run_job(&self, job: Job, stats: &Arc<Mutex<WorkerStats>>) {
        {
            let mut s = stats.lock();
            s.status = WorkerStatus::Busy;
            s.current_job = Some(job.id);
        }
        let started = Instant::now();
        let result = self.process(&job).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.complete(job.id) {
                    warn!(job_id = %job.id, error = %e, "Complete failed");
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, kind = job.payload.kind(), error = %e, "Job failed");
                stats.lock().errors += 1;
                if let Err(e) = self.queue.fail(job.id, &e.to_string()) {
                    warn!(job_id = %job.id, error = %e, "Fail bookkeeping failed");
                }
            }
        }

        let mut s = stats.lock();
        s.status = WorkerStatus::Idle;
        s.current_job = None;
        s.jobs_processed += 1;
        // Running mean over processed jobs.
        let n = s.jobs_processed as f64;
        s.average_processing_ms = s.average_processing_ms + (elapsed_ms - s.average_processing_ms) / n;
    }

    async fn process(&self, job: &Job) -> Result<()> {
        match &job.payload {
            JobPayload::SingleAnalysis { mint, options } => {
                self.analyzer.analyze(mint, options).await?;
                Ok(())
            }
            JobPayload::BatchAnalysis { mints, options } => {
                let total = mints.len();
                let delay = Duration::from_millis(self.config.batch_delay_ms);
                let mut shutdown = self.shutdown.subscribe();
                for (index, mint) in mints.iter().enumerate() {
                    if *shutdown.borrow_and_update() {
                        return Err(crate::error::Error::ShuttingDown);
                    }
                    if let Err(e) = self.analyzer.analyze(mint, options).await {
                        warn!(mint = %mint, error = %e, "Batch entry failed");
                    }
                    self.bus.publish(&BusEvent::AnalysisProgress {
                        completed: index + 1,
                        total,
                    });
                    if index + 1 < total {
                        // Pace calls so the external limiters stay clear.
                        sleep(delay).await;
                    }
                }
                Ok(())
            }
            JobPayload::RecurringAnalysis { mint, options } => {
                let options = AnalysisOptions {
                    force_refresh: true,
                    ..options.clone()
                };
                let outcome = self.analyzer.analyze(mint, &options).await?;
                self.emit_significance(mint, &outcome);
                Ok(())
            }
            JobPayload::TrendUpdate { mint } => {
                // Lighter-weight path: no classification, no snapshot row.
                let options = AnalysisOptions {
                    classify_wallets: false,
                    save_snapshot: false,
                    ..AnalysisOptions::default()
                };
                self.analyzer.analyze(mint, &options).await?;
                Ok(())
            }
        }
    }

    fn emit_significance(&self, mint: &MintAddress, outcome: &AnalysisOutcome) {
        let Some(previous) = &outcome.previous else {
            return;
        };
        let score_delta = outcome.snapshot.score.total - previous.score.total;
        let holder_delta = outcome.snapshot.total_holders as i64 - previous.total_holders as i64;
        let concentration_delta =
            outcome.snapshot.metrics.top10_pct - previous.metrics.top10_pct;

        if score_delta.abs() >= SIGNIFICANT_SCORE_DELTA
            || holder_delta.abs() >= SIGNIFICANT_HOLDER_DELTA
            || concentration_delta.abs() >= SIGNIFICANT_CONCENTRATION_DELTA
        {
            info!(
                mint = %mint,
                score_delta,
                holder_delta,
                concentration_delta,
                "Significant holder changes"
            );
            self.bus.publish(&BusEvent::SignificantChanges {
                mint: mint.clone(),
                score_delta,
                holder_delta,
                concentration_delta,
            });
        }
    }

    /// Per-worker statistics.
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.stats.iter().map(|s| s.lock().clone()).collect()
    }

    /// Signal workers to stop and wait for busy ones to finish.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        let _ = self.shutdown.send(true);
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if timeout(drain_timeout, worker).await.is_err() {
                warn!("Worker did not drain in time");
            }
        }
        info!("Job processor shut down");
    }
}
