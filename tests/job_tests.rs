//! Job retry behavior through the queue and worker pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use mintstream::app::JobsConfig;
use mintstream::core::analysis::AnalysisOutcome;
use mintstream::core::bus::EventBus;
use mintstream::core::domain::{
    AnalysisOptions, DistributionMetrics, HolderScore, HolderSnapshot, HolderSource, MintAddress,
};
use mintstream::core::jobs::{
    Analyzer, JobOptions, JobPayload, JobProcessor, JobQueue, JobState,
};
use mintstream::error::{Error, Result};

fn snapshot(mint: &str) -> HolderSnapshot {
    HolderSnapshot {
        mint: MintAddress::from(mint),
        taken_at: Utc::now(),
        total_holders: 10,
        holders_hash: "h".into(),
        source: HolderSource::Rpc,
        metrics: DistributionMetrics {
            gini: 0.4,
            hhi: 0.1,
            top10_pct: 30.0,
            top25_pct: 40.0,
            top100_pct: 100.0,
            mean_holding_hours: None,
            median_holding_hours: None,
        },
        score: HolderScore::default(),
        class_counts: Vec::new(),
    }
}

/// Fails the first two calls, then succeeds, recording call times.
struct FlakyAnalyzer {
    calls: Mutex<Vec<tokio::time::Instant>>,
}

#[async_trait]
impl Analyzer for FlakyAnalyzer {
    async fn analyze(
        &self,
        mint: &MintAddress,
        _options: &AnalysisOptions,
    ) -> Result<AnalysisOutcome> {
        let mut calls = self.calls.lock();
        calls.push(tokio::time::Instant::now());
        if calls.len() <= 2 {
            return Err(Error::HolderData("transient upstream failure".into()));
        }
        Ok(AnalysisOutcome {
            snapshot: snapshot(mint.as_str()),
            previous: None,
            reused: false,
            persisted: true,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn failed_job_retries_with_backoff_then_completes() {
    let queue = Arc::new(JobQueue::new(3));
    let analyzer = Arc::new(FlakyAnalyzer {
        calls: Mutex::new(Vec::new()),
    });
    let processor = JobProcessor::new(
        Arc::clone(&queue),
        analyzer.clone(),
        Arc::new(EventBus::new()),
        JobsConfig {
            max_workers: 1,
            worker_idle_timeout_ms: 300_000,
            batch_size: 10,
            batch_delay_ms: 1,
            shutdown_drain_ms: 2_000,
        },
    );

    let added = queue.add(
        JobPayload::SingleAnalysis {
            mint: MintAddress::from("mintA"),
            options: AnalysisOptions::default(),
        },
        JobOptions {
            max_attempts: Some(3),
            ..JobOptions::default()
        },
    );
    processor.start();

    for _ in 0..600 {
        if queue.stats().completed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let job = queue.get(added.id).unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 3);

    // Backoffs roughly double: ~1s after the first failure, ~2s after the
    // second.
    let calls = analyzer.calls.lock();
    assert_eq!(calls.len(), 3);
    let first_gap = calls[1].duration_since(calls[0]);
    let second_gap = calls[2].duration_since(calls[1]);
    assert!(
        first_gap >= Duration::from_millis(950) && first_gap < Duration::from_millis(1_500),
        "first backoff {first_gap:?}"
    );
    assert!(
        second_gap >= Duration::from_millis(1_950) && second_gap < Duration::from_millis(2_500),
        "second backoff {second_gap:?}"
    );
    drop(calls);

    processor.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn exhausted_attempts_end_terminally_failed() {
    struct AlwaysFails;

    #[async_trait]
    impl Analyzer for AlwaysFails {
        async fn analyze(&self, _: &MintAddress, _: &AnalysisOptions) -> Result<AnalysisOutcome> {
            Err(Error::HolderData("permanent failure".into()))
        }
    }

    let queue = Arc::new(JobQueue::new(2));
    let processor = JobProcessor::new(
        Arc::clone(&queue),
        Arc::new(AlwaysFails),
        Arc::new(EventBus::new()),
        JobsConfig {
            max_workers: 1,
            worker_idle_timeout_ms: 300_000,
            batch_size: 10,
            batch_delay_ms: 1,
            shutdown_drain_ms: 2_000,
        },
    );

    let added = queue.add(
        JobPayload::SingleAnalysis {
            mint: MintAddress::from("mintA"),
            options: AnalysisOptions::default(),
        },
        JobOptions {
            max_attempts: Some(2),
            ..JobOptions::default()
        },
    );
    processor.start();

    for _ in 0..300 {
        if queue.stats().failed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let job = queue.get(added.id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 2);
    assert!(job.last_error.as_deref().unwrap_or_default().contains("permanent"));

    processor.shutdown(Duration::from_secs(1)).await;
}

/// The same dedup key returns the same job while it is still live.
#[tokio::test]
async fn dedup_key_collapses_duplicate_adds() {
    let queue = JobQueue::new(3);
    let options = JobOptions {
        dedup_key: Some("analysis:mintA".into()),
        ..JobOptions::default()
    };
    let payload = JobPayload::SingleAnalysis {
        mint: MintAddress::from("mintA"),
        options: AnalysisOptions::default(),
    };

    let first = queue.add(payload.clone(), options.clone());
    let size_after_first = queue.pending();
    let second = queue.add(payload, options);

    assert_eq!(first.id, second.id);
    assert_eq!(queue.pending(), size_after_first);
}

#[tokio::test]
async fn queue_waits_gracefully_when_empty() {
    let queue = Arc::new(JobQueue::new(3));
    let processor = JobProcessor::new(
        Arc::clone(&queue),
        Arc::new(FlakyAnalyzer { calls: Mutex::new(Vec::new()) }),
        Arc::new(EventBus::new()),
        JobsConfig {
            max_workers: 2,
            worker_idle_timeout_ms: 300_000,
            batch_size: 10,
            batch_delay_ms: 1,
            shutdown_drain_ms: 2_000,
        },
    );
    processor.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Nothing processed, workers idle, shutdown clean.
    assert_eq!(queue.stats().completed, 0);
    processor.shutdown(Duration::from_secs(1)).await;
}
