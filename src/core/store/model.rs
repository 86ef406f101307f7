//! Database row types for the sqlite backend.

use diesel::prelude::*;

use super::schema::{holder_snapshots, slot_gaps, slots, tokens, trades};

/// Database row for a token.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = tokens)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TokenRow {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub creator: Option<String>,
    pub first_seen_slot: i64,
    pub first_seen_at: String,
    pub market_cap_sol: String,
    pub graduated_to_pool: i32,
    pub graduation_at: Option<String>,
    pub last_trade_at: Option<String>,
    pub bonding_curve_trades: i64,
    pub pool_trades: i64,
    pub stale: i32,
    pub updated_at: String,
}

/// Database row for a trade.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = trades)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TradeRow {
    pub signature: String,
    pub slot: i64,
    pub mint: String,
    pub trader: String,
    pub side: String,
    pub venue: String,
    pub sol_amount: String,
    pub token_amount: String,
    pub price_sol: String,
    pub block_time: Option<String>,
}

/// Database row for a slot record.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = slots)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SlotRow {
    pub slot: i64,
    pub parent_slot: i64,
    pub block_height: Option<i64>,
    pub block_time: Option<String>,
    pub status: String,
    pub tx_count: i64,
    pub success_count: i64,
    pub fail_count: i64,
    pub fee_rewards: i64,
    pub leader: Option<String>,
    pub hash: Option<String>,
    pub fork_detected: i32,
    pub seen_at: String,
}

/// Database row for a slot gap (insertable).
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = slot_gaps)]
pub struct NewSlotGapRow {
    pub start_slot: i64,
    pub end_slot: i64,
    pub detected_at: String,
    pub reason: String,
}

/// Database row for a slot gap (queryable).
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = slot_gaps)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SlotGapRow {
    pub id: Option<i32>,
    pub start_slot: i64,
    pub end_slot: i64,
    pub detected_at: String,
    pub reason: String,
}

/// Database row for a holder snapshot (insertable).
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = holder_snapshots)]
pub struct NewHolderSnapshotRow {
    pub mint: String,
    pub taken_at: String,
    pub total_holders: i64,
    pub holders_hash: String,
    pub source: String,
    pub metrics_json: String,
    pub score_json: String,
    pub class_counts_json: String,
}

/// Database row for a holder snapshot (queryable).
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = holder_snapshots)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct HolderSnapshotRow {
    pub id: Option<i32>,
    pub mint: String,
    pub taken_at: String,
    pub total_holders: i64,
    pub holders_hash: String,
    pub source: String,
    pub metrics_json: String,
    pub score_json: String,
    pub class_counts_json: String,
}
