//! Slot progression tracking with gap and fork detection.
//!
//! Records are keyed by slot so out-of-order arrivals merge instead of
//! clobbering. Gap and fork inference always compares against the highest
//! slot observed so far. Confirmation status only ever moves forward along
//! processed ≺ confirmed ≺ finalized.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::bus::{BusEvent, EventBus};
use crate::core::domain::{
    BlockMetaUpdate, GapReason, SlotGap, SlotRecord, SlotStatus, SlotStatusUpdate,
};

/// Window used for rolling chain statistics.
const STATS_WINDOW: usize = 100;

#[derive(Debug, Clone)]
pub struct BlockTrackerConfig {
    /// Records older than this are evicted.
    pub retention: Duration,
    /// Cadence of the statistics task.
    pub stats_interval: Duration,
    /// Cadence of the eviction task.
    pub eviction_interval: Duration,
    /// Warn when the observed slot coverage drops below this rate.
    pub min_success_rate: f64,
}

impl Default for BlockTrackerConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3_600),
            stats_interval: Duration::from_secs(30),
            eviction_interval: Duration::from_secs(60),
            min_success_rate: 0.95,
        }
    }
}

/// Rolling statistics over the most recent records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChainStats {
    pub avg_block_time_ms: f64,
    pub avg_transactions_per_block: f64,
    /// Fraction of the recent slot range actually observed.
    pub slot_success_rate: f64,
    pub tracked_slots: usize,
    pub gaps: usize,
    pub forks: usize,
}

#[derive(Default)]
struct TrackerState {
    records: BTreeMap<u64, SlotRecord>,
    gaps: Vec<SlotGap>,
    current_slot: u64,
    last_processed: u64,
    last_confirmed: u64,
    last_finalized: u64,
    forks: usize,
}

/// Tracks slot progression for one upstream endpoint.
pub struct BlockTracker {
    config: BlockTrackerConfig,
    bus: Arc<EventBus>,
    state: Mutex<TrackerState>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl BlockTracker {
    pub fn new(config: BlockTrackerConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            bus,
            state: Mutex::new(TrackerState::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Apply a slot progression update.
    pub fn handle_slot(&self, update: SlotStatusUpdate) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            let status = SlotStatus::from(update.status);
            let slot = update.slot;
            let parent = update.parent_slot;
            let is_new = !state.records.contains_key(&slot);

            // Gap and fork inference only applies to tip-advancing
            // arrivals; late out-of-order slots merge silently by key.
            if is_new && state.last_processed > 0 && slot > state.last_processed {
                // Gap: the stream skipped slots.
                if slot > state.last_processed + 1 {
                    let reason = if parent != state.last_processed {
                        GapReason::Fork
                    } else {
                        GapReason::LeaderSkip
                    };
                    let gap = SlotGap {
                        start_slot: state.last_processed + 1,
                        end_slot: slot - 1,
                        detected_at: Utc::now(),
                        reason,
                    };
                    warn!(
                        start = gap.start_slot,
                        end = gap.end_slot,
                        reason = reason.as_str(),
                        "Slot gap detected"
                    );
                    events.push(BusEvent::SlotGapDetected(gap.clone()));
                    state.gaps.push(gap);
                } else if parent != state.last_processed && parent < state.last_processed {
                    // Contiguous arrival whose parent is not our head: fork.
                    let fork_point = parent;
                    state.forks += 1;
                    for record in state
                        .records
                        .range_mut(fork_point + 1..slot)
                        .map(|(_, r)| r)
                    {
                        record.fork_detected = true;
                    }
                    warn!(slot, parent_slot = parent, fork_point, "Fork detected");
                    events.push(BusEvent::ForkAlert {
                        slot,
                        parent_slot: parent,
                        fork_point,
                    });
                    events.push(BusEvent::AlertCreated {
                        kind: "chain:fork".into(),
                        detail: format!("fork at slot {slot}, fork point {fork_point}"),
                    });
                }
            }

            let record = state
                .records
                .entry(slot)
                .or_insert_with(|| SlotRecord::new(slot, parent, status));
            if let Some(height) = update.block_height {
                record.block_height = Some(height);
            }
            // Status is monotonic; never downgrade.
            if status.rank() > record.status.rank() {
                record.status = status;
            } else if status.rank() < record.status.rank() {
                debug!(slot, "Ignoring status downgrade");
            }

            if is_new && slot > state.current_slot {
                state.current_slot = slot;
            }
            if is_new && slot > state.last_processed {
                state.last_processed = slot;
            }
            match status {
                SlotStatus::Confirmed if slot > state.last_confirmed => {
                    state.last_confirmed = slot;
                }
                SlotStatus::Finalized => {
                    if slot > state.last_finalized {
                        state.last_finalized = slot;
                        if slot > state.last_confirmed {
                            state.last_confirmed = slot;
                        }
                        events.push(BusEvent::BlockFinalized { slot });
                    }
                }
                _ => {}
            }
        }
        for event in &events {
            self.bus.publish(event);
        }
    }

    /// Merge block metadata into the slot's record.
    pub fn handle_block_meta(&self, meta: &BlockMetaUpdate) {
        let mut state = self.state.lock();
        let record = state
            .records
            .entry(meta.slot)
            .or_insert_with(|| SlotRecord::new(meta.slot, meta.parent_slot, SlotStatus::Processed));
        record.block_height = meta.block_height.or(record.block_height);
        record.block_time = meta.block_time.or(record.block_time);
        record.tx_count = meta.transaction_count;
        record.fail_count = meta.failed_transaction_count;
        record.success_count = meta
            .transaction_count
            .saturating_sub(meta.failed_transaction_count);
        record.fee_rewards = meta.fee_rewards;
        record.leader = meta.leader.clone().or(record.leader.take());
        record.hash = Some(meta.blockhash.clone());
    }

    /// Statistics over the most recent records.
    pub fn stats(&self) -> ChainStats {
        let state = self.state.lock();
        let recent: Vec<&SlotRecord> = state.records.values().rev().take(STATS_WINDOW).collect();
        if recent.is_empty() {
            return ChainStats::default();
        }

        let mut block_time_deltas = Vec::new();
        let mut prev: Option<chrono::DateTime<chrono::Utc>> = None;
        for record in recent.iter().rev() {
            if let (Some(prev_time), Some(time)) = (prev, record.block_time) {
                let delta = (time - prev_time).num_milliseconds();
                if delta > 0 {
                    block_time_deltas.push(delta as f64);
                }
            }
            prev = record.block_time.or(prev);
        }
        let avg_block_time_ms = if block_time_deltas.is_empty() {
            0.0
        } else {
            block_time_deltas.iter().sum::<f64>() / block_time_deltas.len() as f64
        };

        let avg_transactions_per_block =
            recent.iter().map(|r| r.tx_count as f64).sum::<f64>() / recent.len() as f64;

        let newest = recent.first().map(|r| r.slot).unwrap_or(0);
        let oldest = recent.last().map(|r| r.slot).unwrap_or(0);
        let span = newest.saturating_sub(oldest) + 1;
        let slot_success_rate = recent.len() as f64 / span as f64;

        ChainStats {
            avg_block_time_ms,
            avg_transactions_per_block,
            slot_success_rate,
            tracked_slots: state.records.len(),
            gaps: state.gaps.len(),
            forks: state.forks,
        }
    }

    /// All recorded gaps. Append-only.
    pub fn gaps(&self) -> Vec<SlotGap> {
        self.state.lock().gaps.clone()
    }

    /// Highest slot observed.
    pub fn current_slot(&self) -> u64 {
        self.state.lock().current_slot
    }

    /// Highest finalized slot observed.
    pub fn last_finalized(&self) -> u64 {
        self.state.lock().last_finalized
    }

    /// Snapshot of one slot's record.
    pub fn record(&self, slot: u64) -> Option<SlotRecord> {
        self.state.lock().records.get(&slot).cloned()
    }

    /// Drop records older than the retention window.
    pub fn evict_expired(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::hours(1));
        let mut state = self.state.lock();
        let before = state.records.len();
        state.records.retain(|_, r| r.seen_at > cutoff);
        let evicted = before - state.records.len();
        if evicted > 0 {
            debug!(evicted, remaining = state.records.len(), "Evicted slot records");
        }
    }

    /// Start the statistics and eviction tasks.
    pub fn start(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        let stats_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.config.stats_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The immediate first tick would publish empty stats.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = tracker.stats();
                if stats.tracked_slots == 0 {
                    continue;
                }
                if stats.slot_success_rate < tracker.config.min_success_rate {
                    warn!(
                        rate = stats.slot_success_rate,
                        "Slot success rate below threshold"
                    );
                }
                tracker.bus.publish(&BusEvent::ChainStatsUpdated {
                    avg_block_time_ms: stats.avg_block_time_ms,
                    avg_transactions_per_block: stats.avg_transactions_per_block,
                    slot_success_rate: stats.slot_success_rate,
                });
            }
        });

        let tracker = Arc::clone(self);
        let evict_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.config.eviction_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracker.evict_expired();
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.push(stats_task);
        tasks.push(evict_task);
        info!("Block tracker started");
    }

    /// Stop background tasks.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for BlockTracker {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
