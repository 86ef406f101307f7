//! Normalized trade and token-creation events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{MintAddress, TxSignature, WalletAddress};

/// Direction of a trade from the trader's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Venue a trade executed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeVenue {
    BondingCurve,
    AmmPool,
    ExternalAmm,
}

impl TradeVenue {
    /// Stable string form used in logs and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BondingCurve => "bonding_curve",
            Self::AmmPool => "amm_pool",
            Self::ExternalAmm => "external_amm",
        }
    }

    /// Whether this venue implies the token has graduated off its curve.
    pub fn is_pool(&self) -> bool {
        matches!(self, Self::AmmPool | Self::ExternalAmm)
    }
}

/// A normalized trade parsed from an upstream transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub signature: TxSignature,
    pub slot: u64,
    pub mint: MintAddress,
    pub trader: WalletAddress,
    pub side: TradeSide,
    pub venue: TradeVenue,
    /// SOL notional of the trade.
    pub sol_amount: Decimal,
    /// Token amount, UI units.
    pub token_amount: Decimal,
    /// Price in SOL per token, zero when the token amount is zero.
    pub price_sol: Decimal,
    pub block_time: Option<DateTime<Utc>>,
}

impl Trade {
    /// Deduplication key. Trades are unique by `(signature, slot)`.
    pub fn dedup_key(&self) -> (TxSignature, u64) {
        (self.signature.clone(), self.slot)
    }
}

/// A token mint creation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCreation {
    pub mint: MintAddress,
    pub symbol: String,
    pub name: String,
    pub creator: WalletAddress,
    pub slot: u64,
    pub signature: TxSignature,
    pub block_time: Option<DateTime<Utc>>,
}

/// Output of a parser strategy: zero or more domain events per transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParsedEvent {
    Trade(Trade),
    TokenCreated(TokenCreation),
}

impl ParsedEvent {
    /// Mint the event concerns.
    pub fn mint(&self) -> &MintAddress {
        match self {
            Self::Trade(t) => &t.mint,
            Self::TokenCreated(c) => &c.mint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn venue_strings_are_stable() {
        assert_eq!(TradeVenue::BondingCurve.as_str(), "bonding_curve");
        assert_eq!(TradeVenue::AmmPool.as_str(), "amm_pool");
        assert_eq!(TradeVenue::ExternalAmm.as_str(), "external_amm");
    }

    #[test]
    fn pool_venues_imply_graduation() {
        assert!(!TradeVenue::BondingCurve.is_pool());
        assert!(TradeVenue::AmmPool.is_pool());
        assert!(TradeVenue::ExternalAmm.is_pool());
    }

    #[test]
    fn dedup_key_is_signature_and_slot() {
        let trade = Trade {
            signature: TxSignature::from("sig"),
            slot: 42,
            mint: MintAddress::from("mint"),
            trader: WalletAddress::from("wallet"),
            side: TradeSide::Buy,
            venue: TradeVenue::BondingCurve,
            sol_amount: dec!(1.5),
            token_amount: dec!(1000),
            price_sol: dec!(0.0015),
            block_time: None,
        };
        assert_eq!(trade.dedup_key(), (TxSignature::from("sig"), 42));
    }
}
