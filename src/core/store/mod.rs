//! Persistence layer with pluggable storage backends.
//!
//! The core depends on these traits only; the memory backend serves tests
//! and the sqlite backend production. Trades are unique by
//! `(signature, slot)`, snapshots dedup on their holder-set hash, and slot
//! gaps are append-only.

pub mod db;
pub mod model;
pub mod schema;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::domain::{HolderSnapshot, MintAddress, SlotGap, SlotRecord, Token, Trade};
use crate::error::Result;

/// Aggregate of a mint's pool-venue trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTradeSummary {
    pub count: u64,
    pub first_trade_at: Option<DateTime<Utc>>,
}

/// Storage operations for derived tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Save a token, replacing if it exists.
    async fn upsert_token(&self, token: &Token) -> Result<()>;

    /// Get a token by mint.
    async fn token(&self, mint: &MintAddress) -> Result<Option<Token>>;

    /// List all tokens.
    async fn all_tokens(&self) -> Result<Vec<Token>>;

    /// Flip the graduation flag. Returns `false` when already graduated.
    async fn mark_graduated(&self, mint: &MintAddress, at: DateTime<Utc>) -> Result<bool>;

    /// Set or clear the staleness flag.
    async fn set_stale(&self, mint: &MintAddress, stale: bool) -> Result<()>;
}

/// Storage operations for trades.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Record a trade. Returns `false` when `(signature, slot)` already
    /// exists.
    async fn record_trade(&self, trade: &Trade) -> Result<bool>;

    /// All trades for one mint.
    async fn trades_for_mint(&self, mint: &MintAddress) -> Result<Vec<Trade>>;

    /// Count and first time of a mint's pool-venue trades.
    async fn pool_trade_summary(&self, mint: &MintAddress) -> Result<Option<PoolTradeSummary>>;
}

/// Storage operations for slot progression.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Save a slot record, replacing if it exists.
    async fn upsert_slot(&self, record: &SlotRecord) -> Result<()>;

    /// Append a gap. Gaps are never mutated.
    async fn append_gap(&self, gap: &SlotGap) -> Result<()>;

    /// All recorded gaps.
    async fn gaps(&self) -> Result<Vec<SlotGap>>;
}

/// Storage operations for holder snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest snapshot for a mint.
    async fn latest_snapshot(&self, mint: &MintAddress) -> Result<Option<HolderSnapshot>>;

    /// Persist a snapshot unless the latest one has the same holder-set
    /// hash. Returns whether a row was written.
    async fn save_snapshot(&self, snapshot: &HolderSnapshot) -> Result<bool>;
}
