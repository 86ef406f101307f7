//! Historical slot recovery.
//!
//! Gaps recorded by the block tracker are backfilled from an archival
//! block source under the per-endpoint rate limiter. Recovered records go
//! straight to the slot store; they must not re-enter the tracker, whose
//! gap inference only makes sense for live, in-order progression.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::analysis::ApiRateLimiter;
use crate::core::chain::BlockTracker;
use crate::core::domain::{SlotRecord, SlotStatus};
use crate::core::store::SlotStore;
use crate::error::{Error, Result};

/// Archival block lookup. `None` means the slot was skipped on-chain.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    async fn fetch_slot(&self, slot: u64) -> Result<Option<SlotRecord>>;
}

#[derive(Debug, Deserialize)]
struct RpcBlockResponse {
    result: Option<RpcBlock>,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    #[serde(rename = "parentSlot")]
    parent_slot: u64,
    blockhash: String,
    #[serde(rename = "blockHeight")]
    block_height: Option<u64>,
    #[serde(rename = "blockTime")]
    block_time: Option<i64>,
}

/// JSON-RPC `getBlock` backed fetcher.
pub struct RpcBlockFetcher {
    http: reqwest::Client,
    url: Url,
    call_timeout: Duration,
}

impl RpcBlockFetcher {
    pub fn new(http: reqwest::Client, url: Url, call_timeout: Duration) -> Self {
        Self { http, url, call_timeout }
    }
}

#[async_trait]
impl BlockFetcher for RpcBlockFetcher {
    async fn fetch_slot(&self, slot: u64) -> Result<Option<SlotRecord>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBlock",
            "params": [slot, {"transactionDetails": "none", "rewards": false}],
        });
        let request = self.http.post(self.url.clone()).json(&body).send();
        let response = tokio::time::timeout(self.call_timeout, request)
            .await
            .map_err(|_| Error::Timeout(self.call_timeout))??;
        let parsed: RpcBlockResponse = response.error_for_status()?.json().await?;

        Ok(parsed.result.map(|block| {
            let mut record = SlotRecord::new(slot, block.parent_slot, SlotStatus::Finalized);
            record.hash = Some(block.blockhash);
            record.block_height = block.block_height;
            record.block_time = block
                .block_time
                .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0));
            record
        }))
    }
}

/// Backfills gap ranges into the slot store.
pub struct SlotRecoveryService {
    tracker: Arc<BlockTracker>,
    slots: Arc<dyn SlotStore>,
    fetcher: Arc<dyn BlockFetcher>,
    limiter: Arc<ApiRateLimiter>,
    interval: Duration,
    /// Slots recovered per pass, to bound catch-up work.
    max_slots_per_run: usize,
    processed: Mutex<HashSet<(u64, u64)>>,
    /// Next slot to fetch for gaps that ran out of budget mid-pass.
    progress: Mutex<std::collections::HashMap<(u64, u64), u64>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SlotRecoveryService {
    pub fn new(
        tracker: Arc<BlockTracker>,
        slots: Arc<dyn SlotStore>,
        fetcher: Arc<dyn BlockFetcher>,
        limiter: Arc<ApiRateLimiter>,
        interval: Duration,
        max_slots_per_run: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            slots,
            fetcher,
            limiter,
            interval,
            max_slots_per_run,
            processed: Mutex::new(HashSet::new()),
            progress: Mutex::new(std::collections::HashMap::new()),
            task: Mutex::new(None),
        })
    }

    /// One recovery pass. Returns the number of slots backfilled.
    pub async fn run_once(&self) -> usize {
        let gaps: Vec<_> = {
            let processed = self.processed.lock();
            self.tracker
                .gaps()
                .into_iter()
                .filter(|g| !processed.contains(&(g.start_slot, g.end_slot)))
                .collect()
        };
        if gaps.is_empty() {
            return 0;
        }

        let mut recovered = 0;
        let mut budget = self.max_slots_per_run;
        for gap in gaps {
            if budget == 0 {
                break;
            }
            let key = (gap.start_slot, gap.end_slot);
            let resume_from = self.progress.lock().get(&key).copied().unwrap_or(gap.start_slot);
            debug!(start = gap.start_slot, end = gap.end_slot, resume_from, "Backfilling gap");

            let mut next = resume_from;
            let mut clean = true;
            while next <= gap.end_slot {
                if budget == 0 {
                    break;
                }
                budget -= 1;
                self.limiter.acquire().await;
                match self.fetcher.fetch_slot(next).await {
                    Ok(Some(record)) => {
                        if let Err(e) = self.slots.upsert_slot(&record).await {
                            warn!(slot = next, error = %e, "Backfill persist failed");
                            clean = false;
                            break;
                        }
                        recovered += 1;
                    }
                    // Slot skipped on-chain; nothing to store.
                    Ok(None) => {}
                    Err(e) => {
                        warn!(slot = next, error = %e, "Backfill fetch failed");
                        clean = false;
                        break;
                    }
                }
                next += 1;
            }

            if clean && next > gap.end_slot {
                self.progress.lock().remove(&key);
                self.processed.lock().insert(key);
                info!(start = gap.start_slot, end = gap.end_slot, "Gap backfilled");
            } else if clean {
                // Out of budget mid-gap; resume here next pass.
                self.progress.lock().insert(key, next);
            }
        }
        recovered
    }

    pub fn start(self: &Arc<Self>) {
        let service = Arc::clone(self);
        *self.task.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.run_once().await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for SlotRecoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bus::EventBus;
    use crate::core::chain::BlockTrackerConfig;
    use crate::core::domain::{CommitmentLevel, SlotStatusUpdate};
    use crate::core::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBlockFetcher {
        skipped: HashSet<u64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BlockFetcher for ScriptedBlockFetcher {
        async fn fetch_slot(&self, slot: u64) -> Result<Option<SlotRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.skipped.contains(&slot) {
                return Ok(None);
            }
            Ok(Some(SlotRecord::new(slot, slot - 1, SlotStatus::Finalized)))
        }
    }

    fn tracker_with_gap() -> Arc<BlockTracker> {
        let tracker = Arc::new(BlockTracker::new(
            BlockTrackerConfig::default(),
            Arc::new(EventBus::new()),
        ));
        for slot in [1000, 1001, 1002, 1010] {
            tracker.handle_slot(SlotStatusUpdate {
                slot,
                parent_slot: if slot == 1010 { 1002 } else { slot - 1 },
                status: CommitmentLevel::Processed,
                block_height: None,
            });
        }
        tracker
    }

    #[tokio::test]
    async fn backfills_missed_slots_once() {
        let tracker = tracker_with_gap();
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedBlockFetcher {
            skipped: HashSet::from([1005]),
            calls: AtomicUsize::new(0),
        });
        let service = SlotRecoveryService::new(
            tracker,
            store.clone(),
            fetcher.clone(),
            Arc::new(ApiRateLimiter::per_second(1_000)),
            Duration::from_secs(60),
            100,
        );

        // Gap is 1003..=1009: seven lookups, one on-chain skip.
        assert_eq!(service.run_once().await, 6);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 7);

        // Processed gaps are not re-fetched.
        assert_eq!(service.run_once().await, 0);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn budget_bounds_each_pass() {
        let tracker = tracker_with_gap();
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedBlockFetcher {
            skipped: HashSet::new(),
            calls: AtomicUsize::new(0),
        });
        let service = SlotRecoveryService::new(
            tracker,
            store,
            fetcher.clone(),
            Arc::new(ApiRateLimiter::per_second(1_000)),
            Duration::from_secs(60),
            3,
        );

        assert_eq!(service.run_once().await, 3);
        // Incomplete gap stays queued for the next pass.
        assert_eq!(service.run_once().await, 3);
        assert_eq!(service.run_once().await, 1);
    }
}
