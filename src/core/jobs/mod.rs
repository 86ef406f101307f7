//! Background job system: priority queue, worker pool, scheduler.

mod processor;
mod queue;
mod scheduler;

pub use processor::{Analyzer, JobProcessor, WorkerStats, WorkerStatus};
pub use queue::{Job, JobOptions, JobPayload, JobPriority, JobQueue, JobState, QueueStats};
pub use scheduler::{JobScheduler, JobSource, ScheduledJob};
