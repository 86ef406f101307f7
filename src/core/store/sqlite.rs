//! SQLite store implementation using Diesel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::db::DbPool;
use super::model::{
    HolderSnapshotRow, NewHolderSnapshotRow, NewSlotGapRow, SlotGapRow, SlotRow, TokenRow, TradeRow,
};
use super::schema::{holder_snapshots, slot_gaps, slots, tokens, trades};
use super::{PoolTradeSummary, SlotStore, SnapshotStore, TokenStore, TradeStore};
#[allow(unused_imports)]
use crate::core::domain::{
    GapReason, HolderSnapshot, HolderSource, MintAddress, SlotGap, SlotRecord, SlotStatus, Token,
    Trade, TradeSide, TradeVenue, TxSignature, WalletAddress,
};
use crate::error::{Error, Result};

/// SQLite-backed store for tokens, trades, slots, and snapshots.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(
        &self,
    ) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<SqliteConnection>>>
    {
        self.pool.get().map_err(|e| Error::Connection(e.to_string()))
    }

    fn parse_time(value: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::Parse(e.to_string()))
    }

    fn parse_opt_time(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
        value.as_deref().map(Self::parse_time).transpose()
    }

    fn parse_decimal(value: &str) -> Result<Decimal> {
        Decimal::from_str(value).map_err(|e| Error::Parse(e.to_string()))
    }

    fn token_to_row(token: &Token) -> TokenRow {
        TokenRow {
            mint: token.mint.to_string(),
            symbol: token.symbol.clone(),
            name: token.name.clone(),
            creator: token.creator.as_ref().map(ToString::to_string),
            first_seen_slot: token.first_seen_slot as i64,
            first_seen_at: token.first_seen_at.to_rfc3339(),
            market_cap_sol: token.market_cap_sol.to_string(),
            graduated_to_pool: i32::from(token.graduated_to_pool),
            graduation_at: token.graduation_at.map(|t| t.to_rfc3339()),
            last_trade_at: token.last_trade_at.map(|t| t.to_rfc3339()),
            bonding_curve_trades: token.bonding_curve_trades as i64,
            pool_trades: token.pool_trades as i64,
            stale: i32::from(token.stale),
            updated_at: token.updated_at.to_rfc3339(),
        }
    }

    fn token_from_row(row: TokenRow) -> Result<Token> {
        Ok(Token {
            mint: MintAddress::from(row.mint),
            symbol: row.symbol,
            name: row.name,
            creator: row.creator.map(WalletAddress::from),
            first_seen_slot: row.first_seen_slot as u64,
            first_seen_at: Self::parse_time(&row.first_seen_at)?,
            market_cap_sol: Self::parse_decimal(&row.market_cap_sol)?,
            graduated_to_pool: row.graduated_to_pool != 0,
            graduation_at: Self::parse_opt_time(row.graduation_at)?,
            last_trade_at: Self::parse_opt_time(row.last_trade_at)?,
            bonding_curve_trades: row.bonding_curve_trades as u64,
            pool_trades: row.pool_trades as u64,
            stale: row.stale != 0,
            updated_at: Self::parse_time(&row.updated_at)?,
        })
    }

    fn trade_to_row(trade: &Trade) -> TradeRow {
        TradeRow {
            signature: trade.signature.to_string(),
            slot: trade.slot as i64,
            mint: trade.mint.to_string(),
            trader: trade.trader.to_string(),
            side: match trade.side {
                TradeSide::Buy => "buy".into(),
                TradeSide::Sell => "sell".into(),
            },
            venue: trade.venue.as_str().to_string(),
            sol_amount: trade.sol_amount.to_string(),
            token_amount: trade.token_amount.to_string(),
            price_sol: trade.price_sol.to_string(),
            block_time: trade.block_time.map(|t| t.to_rfc3339()),
        }
    }

    fn trade_from_row(row: TradeRow) -> Result<Trade> {
        Ok(Trade {
            signature: TxSignature::from(row.signature),
            slot: row.slot as u64,
            mint: MintAddress::from(row.mint),
            trader: WalletAddress::from(row.trader),
            side: match row.side.as_str() {
                "buy" => TradeSide::Buy,
                "sell" => TradeSide::Sell,
                other => return Err(Error::Parse(format!("unknown trade side {other}"))),
            },
            venue: match row.venue.as_str() {
                "bonding_curve" => TradeVenue::BondingCurve,
                "amm_pool" => TradeVenue::AmmPool,
                "external_amm" => TradeVenue::ExternalAmm,
                other => return Err(Error::Parse(format!("unknown venue {other}"))),
            },
            sol_amount: Self::parse_decimal(&row.sol_amount)?,
            token_amount: Self::parse_decimal(&row.token_amount)?,
            price_sol: Self::parse_decimal(&row.price_sol)?,
            block_time: Self::parse_opt_time(row.block_time)?,
        })
    }

    fn slot_to_row(record: &SlotRecord) -> SlotRow {
        SlotRow {
            slot: record.slot as i64,
            parent_slot: record.parent_slot as i64,
            block_height: record.block_height.map(|h| h as i64),
            block_time: record.block_time.map(|t| t.to_rfc3339()),
            status: record.status.as_str().to_string(),
            tx_count: record.tx_count as i64,
            success_count: record.success_count as i64,
            fail_count: record.fail_count as i64,
            fee_rewards: record.fee_rewards as i64,
            leader: record.leader.clone(),
            hash: record.hash.clone(),
            fork_detected: i32::from(record.fork_detected),
            seen_at: record.seen_at.to_rfc3339(),
        }
    }

    fn snapshot_to_row(snapshot: &HolderSnapshot) -> Result<NewHolderSnapshotRow> {
        Ok(NewHolderSnapshotRow {
            mint: snapshot.mint.to_string(),
            taken_at: snapshot.taken_at.to_rfc3339(),
            total_holders: snapshot.total_holders as i64,
            holders_hash: snapshot.holders_hash.clone(),
            source: serde_json::to_string(&snapshot.source)?
                .trim_matches('"')
                .to_string(),
            metrics_json: serde_json::to_string(&snapshot.metrics)?,
            score_json: serde_json::to_string(&snapshot.score)?,
            class_counts_json: serde_json::to_string(&snapshot.class_counts)?,
        })
    }

    fn snapshot_from_row(row: HolderSnapshotRow) -> Result<HolderSnapshot> {
        let source: HolderSource = serde_json::from_str(&format!("\"{}\"", row.source))?;
        Ok(HolderSnapshot {
            mint: MintAddress::from(row.mint),
            taken_at: Self::parse_time(&row.taken_at)?,
            total_holders: row.total_holders as usize,
            holders_hash: row.holders_hash,
            source,
            metrics: serde_json::from_str(&row.metrics_json)?,
            score: serde_json::from_str(&row.score_json)?,
            class_counts: serde_json::from_str(&row.class_counts_json)?,
        })
    }
}

#[async_trait]
impl TokenStore for SqliteStore {
    async fn upsert_token(&self, token: &Token) -> Result<()> {
        let row = Self::token_to_row(token);
        let mut conn = self.conn()?;
        diesel::replace_into(tokens::table).values(&row).execute(&mut conn)?;
        Ok(())
    }

    async fn token(&self, mint: &MintAddress) -> Result<Option<Token>> {
        let mut conn = self.conn()?;
        let row: Option<TokenRow> = tokens::table
            .find(mint.to_string())
            .first(&mut conn)
            .optional()?;
        row.map(Self::token_from_row).transpose()
    }

    async fn all_tokens(&self) -> Result<Vec<Token>> {
        let mut conn = self.conn()?;
        let rows: Vec<TokenRow> = tokens::table.load(&mut conn)?;
        rows.into_iter().map(Self::token_from_row).collect()
    }

    async fn mark_graduated(&self, mint: &MintAddress, at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn()?;
        let updated = diesel::update(
            tokens::table
                .find(mint.to_string())
                .filter(tokens::graduated_to_pool.eq(0)),
        )
        .set((
            tokens::graduated_to_pool.eq(1),
            tokens::graduation_at.eq(Some(at.to_rfc3339())),
            tokens::updated_at.eq(Utc::now().to_rfc3339()),
        ))
        .execute(&mut conn)?;
        Ok(updated > 0)
    }

    async fn set_stale(&self, mint: &MintAddress, stale: bool) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(tokens::table.find(mint.to_string()))
            .set((
                tokens::stale.eq(i32::from(stale)),
                tokens::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)?;
        Ok(())
    }
}

#[async_trait]
impl TradeStore for SqliteStore {
    async fn record_trade(&self, trade: &Trade) -> Result<bool> {
        let row = Self::trade_to_row(trade);
        let mut conn = self.conn()?;
        let inserted = diesel::insert_or_ignore_into(trades::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(inserted > 0)
    }

    async fn trades_for_mint(&self, mint: &MintAddress) -> Result<Vec<Trade>> {
        let mut conn = self.conn()?;
        let rows: Vec<TradeRow> = trades::table
            .filter(trades::mint.eq(mint.to_string()))
            .order(trades::slot.asc())
            .load(&mut conn)?;
        rows.into_iter().map(Self::trade_from_row).collect()
    }

    async fn pool_trade_summary(&self, mint: &MintAddress) -> Result<Option<PoolTradeSummary>> {
        let mut conn = self.conn()?;
        let rows: Vec<TradeRow> = trades::table
            .filter(trades::mint.eq(mint.to_string()))
            .filter(trades::venue.ne(TradeVenue::BondingCurve.as_str()))
            .load(&mut conn)?;
        if rows.is_empty() {
            return Ok(None);
        }
        let count = rows.len() as u64;
        let first_trade_at = rows
            .into_iter()
            .filter_map(|r| Self::parse_opt_time(r.block_time).transpose())
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .min();
        Ok(Some(PoolTradeSummary { count, first_trade_at }))
    }
}

#[async_trait]
impl SlotStore for SqliteStore {
    async fn upsert_slot(&self, record: &SlotRecord) -> Result<()> {
        let row = Self::slot_to_row(record);
        let mut conn = self.conn()?;
        diesel::replace_into(slots::table).values(&row).execute(&mut conn)?;
        Ok(())
    }

    async fn append_gap(&self, gap: &SlotGap) -> Result<()> {
        let row = NewSlotGapRow {
            start_slot: gap.start_slot as i64,
            end_slot: gap.end_slot as i64,
            detected_at: gap.detected_at.to_rfc3339(),
            reason: gap.reason.as_str().to_string(),
        };
        let mut conn = self.conn()?;
        diesel::insert_into(slot_gaps::table).values(&row).execute(&mut conn)?;
        Ok(())
    }

    async fn gaps(&self) -> Result<Vec<SlotGap>> {
        let mut conn = self.conn()?;
        let rows: Vec<SlotGapRow> = slot_gaps::table.order(slot_gaps::id.asc()).load(&mut conn)?;
        rows.into_iter()
            .map(|row| {
                Ok(SlotGap {
                    start_slot: row.start_slot as u64,
                    end_slot: row.end_slot as u64,
                    detected_at: Self::parse_time(&row.detected_at)?,
                    reason: match row.reason.as_str() {
                        "fork" => GapReason::Fork,
                        "leader_skip" => GapReason::LeaderSkip,
                        "network_issue" => GapReason::NetworkIssue,
                        other => return Err(Error::Parse(format!("unknown gap reason {other}"))),
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn latest_snapshot(&self, mint: &MintAddress) -> Result<Option<HolderSnapshot>> {
        let mut conn = self.conn()?;
        let row: Option<HolderSnapshotRow> = holder_snapshots::table
            .filter(holder_snapshots::mint.eq(mint.to_string()))
            .order(holder_snapshots::id.desc())
            .first(&mut conn)
            .optional()?;
        row.map(Self::snapshot_from_row).transpose()
    }

    async fn save_snapshot(&self, snapshot: &HolderSnapshot) -> Result<bool> {
        if let Some(latest) = self.latest_snapshot(&snapshot.mint).await? {
            if latest.holders_hash == snapshot.holders_hash {
                return Ok(false);
            }
        }
        let row = Self::snapshot_to_row(snapshot)?;
        let mut conn = self.conn()?;
        diesel::insert_into(holder_snapshots::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{DistributionMetrics, HolderScore};
    use crate::core::store::db::{create_pool, run_migrations};
    use rust_decimal_macros::dec;

    fn setup_store() -> SqliteStore {
        let pool = create_pool(":memory:").expect("Failed to create pool");
        run_migrations(&pool).expect("Failed to run migrations");
        SqliteStore::new(pool)
    }

    fn sample_token() -> Token {
        Token::new(MintAddress::from("mintA"), "SYM".into(), "Name".into(), 1000)
    }

    fn sample_trade(sig: &str, slot: u64, venue: TradeVenue) -> Trade {
        Trade {
            signature: TxSignature::from(sig),
            slot,
            mint: MintAddress::from("mintA"),
            trader: WalletAddress::from("wallet"),
            side: TradeSide::Buy,
            venue,
            sol_amount: dec!(1.25),
            token_amount: dec!(500),
            price_sol: dec!(0.0025),
            block_time: Some(Utc::now()),
        }
    }

    fn sample_snapshot(hash: &str) -> HolderSnapshot {
        HolderSnapshot {
            mint: MintAddress::from("mintA"),
            taken_at: Utc::now(),
            total_holders: 12,
            holders_hash: hash.into(),
            source: HolderSource::Complete,
            metrics: DistributionMetrics {
                gini: 0.42,
                hhi: 0.08,
                top10_pct: 35.0,
                top25_pct: 55.0,
                top100_pct: 100.0,
                mean_holding_hours: Some(6.5),
                median_holding_hours: Some(4.0),
            },
            score: HolderScore::default(),
            class_counts: vec![(crate::core::domain::WalletClass::Normal, 8)],
        }
    }

    #[tokio::test]
    async fn token_roundtrip() {
        let store = setup_store();
        let mut token = sample_token();
        token.market_cap_sol = dec!(123.456);
        store.upsert_token(&token).await.unwrap();

        let loaded = store.token(&token.mint).await.unwrap().unwrap();
        assert_eq!(loaded.mint, token.mint);
        assert_eq!(loaded.market_cap_sol, dec!(123.456));
        assert!(!loaded.graduated_to_pool);
    }

    #[tokio::test]
    async fn trade_dedup_on_signature_slot() {
        let store = setup_store();
        assert!(store.record_trade(&sample_trade("s1", 10, TradeVenue::BondingCurve)).await.unwrap());
        assert!(!store.record_trade(&sample_trade("s1", 10, TradeVenue::BondingCurve)).await.unwrap());

        let trades = store.trades_for_mint(&MintAddress::from("mintA")).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].sol_amount, dec!(1.25));
    }

    #[tokio::test]
    async fn graduation_flips_once() {
        let store = setup_store();
        store.upsert_token(&sample_token()).await.unwrap();
        let mint = MintAddress::from("mintA");

        assert!(store.mark_graduated(&mint, Utc::now()).await.unwrap());
        assert!(!store.mark_graduated(&mint, Utc::now()).await.unwrap());

        let token = store.token(&mint).await.unwrap().unwrap();
        assert!(token.graduated_to_pool);
        assert!(token.graduation_at.is_some());
    }

    #[tokio::test]
    async fn pool_summary_counts_pool_venues_only() {
        let store = setup_store();
        store.record_trade(&sample_trade("c1", 1, TradeVenue::BondingCurve)).await.unwrap();
        store.record_trade(&sample_trade("p1", 2, TradeVenue::AmmPool)).await.unwrap();
        store.record_trade(&sample_trade("p2", 3, TradeVenue::ExternalAmm)).await.unwrap();

        let summary = store
            .pool_trade_summary(&MintAddress::from("mintA"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.count, 2);
    }

    #[tokio::test]
    async fn slot_and_gap_roundtrip() {
        let store = setup_store();
        let record = SlotRecord::new(1000, 999, SlotStatus::Confirmed);
        store.upsert_slot(&record).await.unwrap();

        let gap = SlotGap {
            start_slot: 1003,
            end_slot: 1009,
            detected_at: Utc::now(),
            reason: GapReason::LeaderSkip,
        };
        store.append_gap(&gap).await.unwrap();

        let gaps = store.gaps().await.unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start_slot, 1003);
        assert_eq!(gaps[0].reason, GapReason::LeaderSkip);
    }

    #[tokio::test]
    async fn snapshot_hash_dedup() {
        let store = setup_store();
        assert!(store.save_snapshot(&sample_snapshot("h1")).await.unwrap());
        assert!(!store.save_snapshot(&sample_snapshot("h1")).await.unwrap());
        assert!(store.save_snapshot(&sample_snapshot("h2")).await.unwrap());

        let latest = store
            .latest_snapshot(&MintAddress::from("mintA"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.holders_hash, "h2");
        assert_eq!(latest.total_holders, 12);
        assert_eq!(latest.source, HolderSource::Complete);
    }
}
