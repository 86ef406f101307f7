//! In-memory store implementation for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{PoolTradeSummary, SlotStore, SnapshotStore, TokenStore, TradeStore};
use crate::core::domain::{
    HolderSnapshot, MintAddress, SlotGap, SlotRecord, Token, Trade, TxSignature,
};
use crate::error::Result;

/// In-memory store for testing purposes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tokens: RwLock<HashMap<MintAddress, Token>>,
    trades: RwLock<HashMap<(TxSignature, u64), Trade>>,
    slots: RwLock<HashMap<u64, SlotRecord>>,
    gaps: RwLock<Vec<SlotGap>>,
    snapshots: RwLock<HashMap<MintAddress, Vec<HolderSnapshot>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn upsert_token(&self, token: &Token) -> Result<()> {
        self.tokens.write().insert(token.mint.clone(), token.clone());
        Ok(())
    }

    async fn token(&self, mint: &MintAddress) -> Result<Option<Token>> {
        Ok(self.tokens.read().get(mint).cloned())
    }

    async fn all_tokens(&self) -> Result<Vec<Token>> {
        Ok(self.tokens.read().values().cloned().collect())
    }

    async fn mark_graduated(&self, mint: &MintAddress, at: DateTime<Utc>) -> Result<bool> {
        let mut tokens = self.tokens.write();
        let Some(token) = tokens.get_mut(mint) else {
            return Ok(false);
        };
        if token.graduated_to_pool {
            return Ok(false);
        }
        token.graduated_to_pool = true;
        token.graduation_at = Some(at);
        token.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_stale(&self, mint: &MintAddress, stale: bool) -> Result<()> {
        if let Some(token) = self.tokens.write().get_mut(mint) {
            token.stale = stale;
            token.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn record_trade(&self, trade: &Trade) -> Result<bool> {
        let mut trades = self.trades.write();
        let key = trade.dedup_key();
        if trades.contains_key(&key) {
            return Ok(false);
        }
        trades.insert(key, trade.clone());
        Ok(true)
    }

    async fn trades_for_mint(&self, mint: &MintAddress) -> Result<Vec<Trade>> {
        let mut trades: Vec<Trade> = self
            .trades
            .read()
            .values()
            .filter(|t| &t.mint == mint)
            .cloned()
            .collect();
        trades.sort_by_key(|t| t.slot);
        Ok(trades)
    }

    async fn pool_trade_summary(&self, mint: &MintAddress) -> Result<Option<PoolTradeSummary>> {
        let trades = self.trades.read();
        let pool_trades: Vec<&Trade> = trades
            .values()
            .filter(|t| &t.mint == mint && t.venue.is_pool())
            .collect();
        if pool_trades.is_empty() {
            return Ok(None);
        }
        Ok(Some(PoolTradeSummary {
            count: pool_trades.len() as u64,
            first_trade_at: pool_trades.iter().filter_map(|t| t.block_time).min(),
        }))
    }
}

#[async_trait]
impl SlotStore for MemoryStore {
    async fn upsert_slot(&self, record: &SlotRecord) -> Result<()> {
        self.slots.write().insert(record.slot, record.clone());
        Ok(())
    }

    async fn append_gap(&self, gap: &SlotGap) -> Result<()> {
        self.gaps.write().push(gap.clone());
        Ok(())
    }

    async fn gaps(&self) -> Result<Vec<SlotGap>> {
        Ok(self.gaps.read().clone())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn latest_snapshot(&self, mint: &MintAddress) -> Result<Option<HolderSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .get(mint)
            .and_then(|list| list.last().cloned()))
    }

    async fn save_snapshot(&self, snapshot: &HolderSnapshot) -> Result<bool> {
        let mut snapshots = self.snapshots.write();
        let list = snapshots.entry(snapshot.mint.clone()).or_default();
        if list
            .last()
            .is_some_and(|prev| prev.holders_hash == snapshot.holders_hash)
        {
            return Ok(false);
        }
        list.push(snapshot.clone());
        Ok(true)
    }
}
