//! Priority job queue with delays, retries, and dedup keys.
//!
//! Jobs are ordered by `(priority rank, enqueue sequence)` — strict
//! priority, FIFO within a rank. Delayed jobs sit in a min-heap keyed by
//! their due time and are promoted on access. A failed job with remaining
//! attempts re-enters the queue after exponential backoff. The queue is
//! not concurrency-aware; the processor limits in-flight jobs.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::core::domain::{AnalysisOptions, MintAddress};
use crate::core::retry::exponential_backoff;
use crate::error::{Error, Result};

const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(60);

/// Terminal jobs retained for inspection before eviction.
const TERMINAL_RETENTION: usize = 1_000;

/// Work item payloads, dispatched by kind in the processor.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    SingleAnalysis {
        mint: MintAddress,
        options: AnalysisOptions,
    },
    BatchAnalysis {
        mints: Vec<MintAddress>,
        options: AnalysisOptions,
    },
    RecurringAnalysis {
        mint: MintAddress,
        options: AnalysisOptions,
    },
    TrendUpdate {
        mint: MintAddress,
    },
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SingleAnalysis { .. } => "single_analysis",
            Self::BatchAnalysis { .. } => "batch_analysis",
            Self::RecurringAnalysis { .. } => "recurring_analysis",
            Self::TrendUpdate { .. } => "trend_update",
        }
    }
}

/// Job priority; lower rank runs first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

/// Job lifecycle state.
///
/// Transitions only along `waiting → (delayed) → active → completed|failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// One queued job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    pub priority: JobPriority,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: JobState,
    pub delay_until: Option<Instant>,
    pub last_error: Option<String>,
    pub dedup_key: Option<String>,
}

/// Options for `add`.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: JobPriority,
    pub max_attempts: Option<u32>,
    pub delay: Option<Duration>,
    pub dedup_key: Option<String>,
}

/// Aggregate queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct QueueInner {
    ready: BTreeMap<(u8, u64), Uuid>,
    delayed: BinaryHeap<Reverse<(Instant, u64, Uuid)>>,
    jobs: HashMap<Uuid, Job>,
    dedup: HashMap<String, Uuid>,
    terminal: VecDeque<Uuid>,
    seq: u64,
    completed: u64,
    failed: u64,
}

impl QueueInner {
    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse((due, seq, id))) = self.delayed.peek().copied() {
            if due > now {
                break;
            }
            self.delayed.pop();
            if let Some(job) = self.jobs.get_mut(&id) {
                if job.state == JobState::Delayed {
                    job.state = JobState::Waiting;
                    job.delay_until = None;
                    self.ready.insert((job.priority.rank(), seq), id);
                }
            }
        }
    }

    fn evict_terminal(&mut self) {
        while self.terminal.len() > TERMINAL_RETENTION {
            if let Some(id) = self.terminal.pop_front() {
                if let Some(job) = self.jobs.remove(&id) {
                    if let Some(key) = job.dedup_key {
                        if self.dedup.get(&key) == Some(&id) {
                            self.dedup.remove(&key);
                        }
                    }
                }
            }
        }
    }
}

/// Shared priority queue; all operations are atomic under one lock.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    default_max_attempts: u32,
}

impl JobQueue {
    pub fn new(default_max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            default_max_attempts,
        }
    }

    /// Enqueue a job. A duplicate dedup key returns the existing
    /// non-terminal job instead of adding a new one.
    pub fn add(&self, payload: JobPayload, options: JobOptions) -> Job {
        let mut inner = self.inner.lock();

        if let Some(key) = &options.dedup_key {
            if let Some(existing_id) = inner.dedup.get(key).copied() {
                if let Some(existing) = inner.jobs.get(&existing_id) {
                    if !matches!(existing.state, JobState::Completed | JobState::Failed) {
                        debug!(job_id = %existing_id, key = %key, "Deduplicated job add");
                        return existing.clone();
                    }
                }
            }
        }

        inner.seq += 1;
        let seq = inner.seq;
        let id = Uuid::new_v4();
        let now = Instant::now();
        let mut job = Job {
            id,
            payload,
            priority: options.priority,
            attempts: 0,
            max_attempts: options.max_attempts.unwrap_or(self.default_max_attempts).max(1),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            state: JobState::Waiting,
            delay_until: None,
            last_error: None,
            dedup_key: options.dedup_key.clone(),
        };

        match options.delay {
            Some(delay) if !delay.is_zero() => {
                let due = now + delay;
                job.state = JobState::Delayed;
                job.delay_until = Some(due);
                inner.delayed.push(Reverse((due, seq, id)));
            }
            _ => {
                inner.ready.insert((job.priority.rank(), seq), id);
            }
        }

        if let Some(key) = options.dedup_key {
            inner.dedup.insert(key, id);
        }
        let job_clone = job.clone();
        inner.jobs.insert(id, job);
        debug!(job_id = %id, kind = job_clone.payload.kind(), "Job added");
        job_clone
    }

    /// Pop the highest-priority due job, marking it active.
    pub fn next(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        inner.promote_due(Instant::now());

        let (&key, &id) = inner.ready.iter().next()?;
        inner.ready.remove(&key);

        let job = inner.jobs.get_mut(&id)?;
        job.state = JobState::Active;
        job.attempts += 1;
        job.started_at = Some(Utc::now());
        Some(job.clone())
    }

    /// Mark an active job completed.
    pub fn complete(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::Job(format!("unknown job {id}")))?;
        if job.state != JobState::Active {
            return Err(Error::Job(format!("job {id} is not active")));
        }
        job.state = JobState::Completed;
        job.finished_at = Some(Utc::now());
        inner.completed += 1;
        inner.terminal.push_back(id);
        inner.evict_terminal();
        Ok(())
    }

    /// Mark an active job failed; retries with backoff while attempts
    /// remain, otherwise terminal.
    pub fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::Job(format!("unknown job {id}")))?;
        if job.state != JobState::Active {
            return Err(Error::Job(format!("job {id} is not active")));
        }
        job.last_error = Some(error.to_string());

        if job.attempts < job.max_attempts {
            let delay = exponential_backoff(RETRY_BASE, RETRY_CAP, job.attempts);
            let due = Instant::now() + delay;
            job.state = JobState::Delayed;
            job.delay_until = Some(due);
            let id = job.id;
            debug!(job_id = %id, attempt = job.attempts, delay_ms = delay.as_millis() as u64, "Job retry scheduled");
            inner.delayed.push(Reverse((due, seq, id)));
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(Utc::now());
            inner.failed += 1;
            inner.terminal.push_back(id);
            inner.evict_terminal();
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.inner.lock().jobs.get(&id).cloned()
    }

    pub fn stats(&self) -> QueueStats {
        let mut inner = self.inner.lock();
        inner.promote_due(Instant::now());
        let active = inner
            .jobs
            .values()
            .filter(|j| j.state == JobState::Active)
            .count();
        let delayed = inner
            .jobs
            .values()
            .filter(|j| j.state == JobState::Delayed)
            .count();
        QueueStats {
            waiting: inner.ready.len(),
            delayed,
            active,
            completed: inner.completed,
            failed: inner.failed,
        }
    }

    /// Waiting + delayed + active.
    pub fn pending(&self) -> usize {
        let stats = self.stats();
        stats.waiting + stats.delayed + stats.active
    }
}
