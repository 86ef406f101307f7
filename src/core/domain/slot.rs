//! Slot progression records and gap bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::CommitmentLevel;

/// Confirmation status of a tracked slot.
///
/// Status is monotonic: `Processed` ≺ `Confirmed` ≺ `Finalized`. A record
/// never moves backwards along this lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Processed,
    Confirmed,
    Finalized,
}

impl SlotStatus {
    /// Lattice rank, higher is further confirmed.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Processed => 0,
            Self::Confirmed => 1,
            Self::Finalized => 2,
        }
    }

    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl From<CommitmentLevel> for SlotStatus {
    fn from(level: CommitmentLevel) -> Self {
        match level {
            CommitmentLevel::Processed => Self::Processed,
            CommitmentLevel::Confirmed => Self::Confirmed,
            CommitmentLevel::Finalized => Self::Finalized,
        }
    }
}

/// One tracked slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub slot: u64,
    pub parent_slot: u64,
    pub block_height: Option<u64>,
    pub block_time: Option<DateTime<Utc>>,
    pub status: SlotStatus,
    pub tx_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub fee_rewards: u64,
    pub leader: Option<String>,
    pub hash: Option<String>,
    pub fork_detected: bool,
    /// When the record was first observed locally.
    pub seen_at: DateTime<Utc>,
}

impl SlotRecord {
    /// A minimal record for a freshly observed slot.
    pub fn new(slot: u64, parent_slot: u64, status: SlotStatus) -> Self {
        Self {
            slot,
            parent_slot,
            block_height: None,
            block_time: None,
            status,
            tx_count: 0,
            success_count: 0,
            fail_count: 0,
            fee_rewards: 0,
            leader: None,
            hash: None,
            fork_detected: false,
            seen_at: Utc::now(),
        }
    }
}

/// Why a run of slots went missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    Fork,
    LeaderSkip,
    NetworkIssue,
}

impl GapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fork => "fork",
            Self::LeaderSkip => "leader_skip",
            Self::NetworkIssue => "network_issue",
        }
    }
}

/// A detected discontinuity in the observed slot stream.
///
/// Gaps are append-only; once recorded they are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotGap {
    pub start_slot: u64,
    pub end_slot: u64,
    pub detected_at: DateTime<Utc>,
    pub reason: GapReason,
}

impl SlotGap {
    /// Number of slots missing from the stream.
    pub fn missed_slots(&self) -> u64 {
        self.end_slot.saturating_sub(self.start_slot) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lattice_ordering() {
        assert!(SlotStatus::Processed.rank() < SlotStatus::Confirmed.rank());
        assert!(SlotStatus::Confirmed.rank() < SlotStatus::Finalized.rank());
    }

    #[test]
    fn gap_missed_slot_count() {
        let gap = SlotGap {
            start_slot: 1003,
            end_slot: 1009,
            detected_at: Utc::now(),
            reason: GapReason::LeaderSkip,
        };
        assert_eq!(gap.missed_slots(), 7);
    }
}
