//! Derived token state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{MintAddress, WalletAddress};

/// Derived view of a launched token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub mint: MintAddress,
    pub symbol: String,
    pub name: String,
    pub creator: Option<WalletAddress>,
    pub first_seen_slot: u64,
    pub first_seen_at: DateTime<Utc>,
    /// Latest observed market cap in SOL.
    pub market_cap_sol: Decimal,
    pub graduated_to_pool: bool,
    /// Time of the first pool trade, set at graduation.
    pub graduation_at: Option<DateTime<Utc>>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub bonding_curve_trades: u64,
    pub pool_trades: u64,
    pub stale: bool,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    /// A token first observed via its creation event.
    pub fn new(mint: MintAddress, symbol: String, name: String, first_seen_slot: u64) -> Self {
        let now = Utc::now();
        Self {
            mint,
            symbol,
            name,
            creator: None,
            first_seen_slot,
            first_seen_at: now,
            market_cap_sol: Decimal::ZERO,
            graduated_to_pool: false,
            graduation_at: None,
            last_trade_at: None,
            bonding_curve_trades: 0,
            pool_trades: 0,
            stale: false,
            updated_at: now,
        }
    }
}
