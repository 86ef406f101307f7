//! Transaction parser strategies.
//!
//! Each strategy answers `can_parse` and decodes a transaction into zero
//! or more domain events. Dispatch walks the registered strategies in
//! order and uses the first match. Strategies are pure: no I/O, identical
//! input bytes always decode to identical events. A failure inside a
//! strategy is logged, counted, and produces zero events for that
//! transaction — it never stops the stream.

mod amm_pool;
mod bonding_curve;
mod external_amm;
mod token_creation;

pub use amm_pool::AmmPoolParser;
pub use bonding_curve::BondingCurveParser;
pub use external_amm::ExternalAmmParser;
pub use token_creation::TokenCreationParser;

use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::core::domain::{ParsedEvent, TradeSide, TransactionUpdate};
use crate::error::{Error, Result};

/// Lamports per SOL.
const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// One decoding strategy.
pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap predicate deciding whether this strategy applies.
    fn can_parse(&self, tx: &TransactionUpdate) -> bool;

    /// Decode the transaction. Errors are counted by the registry and
    /// yield zero events.
    fn parse(&self, tx: &TransactionUpdate) -> Result<Vec<ParsedEvent>>;
}

/// Ordered strategy dispatch with error accounting.
pub struct ParserRegistry {
    strategies: Vec<Box<dyn ParseStrategy>>,
    parsed: AtomicU64,
    errors: AtomicU64,
    unmatched: AtomicU64,
}

impl ParserRegistry {
    pub fn new(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self {
            strategies,
            parsed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
        }
    }

    /// Decode a transaction via the first matching strategy.
    pub fn parse(&self, tx: &TransactionUpdate) -> Vec<ParsedEvent> {
        for strategy in &self.strategies {
            if !strategy.can_parse(tx) {
                continue;
            }
            match strategy.parse(tx) {
                Ok(events) => {
                    self.parsed.fetch_add(1, Ordering::Relaxed);
                    return events;
                }
                Err(e) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        strategy = strategy.name(),
                        signature = %tx.signature,
                        error = %e,
                        "Parse failure"
                    );
                    return Vec::new();
                }
            }
        }
        self.unmatched.fetch_add(1, Ordering::Relaxed);
        debug!(signature = %tx.signature, "No strategy matched");
        Vec::new()
    }

    pub fn parsed_count(&self) -> u64 {
        self.parsed.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn unmatched_count(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }
}

/// Convert lamports to SOL.
pub(crate) fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

/// Convert a raw token amount to UI units.
pub(crate) fn token_ui_amount(amount: u64, decimals: u8) -> Decimal {
    let mut value = Decimal::from(amount);
    value.set_scale(decimals as u32).unwrap_or_default();
    value.normalize()
}

/// Net token movement for accounts owned by `owner`:
/// `(mint, signed ui delta, decimals)`.
pub(crate) fn token_delta_for_owner(
    tx: &TransactionUpdate,
    owner: &str,
) -> Option<(String, Decimal, u8)> {
    let mut by_mint: std::collections::HashMap<&str, (Decimal, u8)> =
        std::collections::HashMap::new();

    for post in &tx.meta.post_token_balances {
        if post.owner.as_deref() != Some(owner) {
            continue;
        }
        let entry = by_mint.entry(post.mint.as_str()).or_insert((Decimal::ZERO, post.decimals));
        entry.0 += token_ui_amount(post.amount, post.decimals);
    }
    for pre in &tx.meta.pre_token_balances {
        if pre.owner.as_deref() != Some(owner) {
            continue;
        }
        let entry = by_mint.entry(pre.mint.as_str()).or_insert((Decimal::ZERO, pre.decimals));
        entry.0 -= token_ui_amount(pre.amount, pre.decimals);
    }

    by_mint
        .into_iter()
        .filter(|(_, (delta, _))| !delta.is_zero())
        .max_by_key(|(_, (delta, _))| delta.abs())
        .map(|(mint, (delta, decimals))| (mint.to_string(), delta, decimals))
}

/// Decode the fee payer's trade from balance deltas.
///
/// Shared by every trade strategy: the fee payer's token delta gives mint,
/// side, and size; the fee payer's lamport delta (fee excluded) gives the
/// SOL notional.
pub(crate) fn trade_from_balances(
    tx: &TransactionUpdate,
) -> Result<(String, TradeSide, Decimal, Decimal)> {
    let trader = tx
        .account_keys
        .first()
        .ok_or_else(|| Error::Stream("transaction without account keys".into()))?;

    let (mint, token_delta, _decimals) = token_delta_for_owner(tx, trader)
        .ok_or_else(|| Error::Stream(format!("no token delta for fee payer {trader}")))?;

    let pre = *tx
        .meta
        .pre_balances
        .first()
        .ok_or_else(|| Error::Stream("missing pre balances".into()))?;
    let post = *tx
        .meta
        .post_balances
        .first()
        .ok_or_else(|| Error::Stream("missing post balances".into()))?;
    let fee = tx.meta.fee;

    let side = if token_delta > Decimal::ZERO {
        TradeSide::Buy
    } else {
        TradeSide::Sell
    };
    let lamports = match side {
        // post = pre - spent - fee
        TradeSide::Buy => pre.saturating_sub(post).saturating_sub(fee),
        // post = pre + received - fee
        TradeSide::Sell => post.saturating_add(fee).saturating_sub(pre),
    };

    Ok((mint, side, lamports_to_sol(lamports), token_delta.abs()))
}


#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_fixtures::trade_tx;

    #[test]
    fn lamports_conversion() {
        assert_eq!(lamports_to_sol(1_500_000_000), dec!(1.5));
        assert_eq!(lamports_to_sol(0), Decimal::ZERO);
    }

    #[test]
    fn ui_amount_applies_decimals() {
        assert_eq!(token_ui_amount(1_000_000, 6), dec!(1));
        assert_eq!(token_ui_amount(2_500_000, 6), dec!(2.5));
    }

    #[test]
    fn buy_decodes_from_balance_deltas() {
        // 1 SOL spent + 5000 lamport fee, 1M raw tokens received.
        let tx = trade_tx(
            "prog", "mintA", "sig",
            0, 1_000_000,
            2_000_000_000, 999_995_000,
        );
        let (mint, side, sol, tokens) = trade_from_balances(&tx).unwrap();
        assert_eq!(mint, "mintA");
        assert_eq!(side, TradeSide::Buy);
        assert_eq!(sol, dec!(1));
        assert_eq!(tokens, dec!(1));
    }

    #[test]
    fn sell_decodes_from_balance_deltas() {
        let tx = trade_tx(
            "prog", "mintA", "sig",
            1_000_000, 0,
            1_000_000_000, 1_499_995_000,
        );
        let (_, side, sol, tokens) = trade_from_balances(&tx).unwrap();
        assert_eq!(side, TradeSide::Sell);
        assert_eq!(sol, dec!(0.5));
        assert_eq!(tokens, dec!(1));
    }

    #[test]
    fn missing_token_delta_is_an_error() {
        let mut tx = trade_tx("prog", "mintA", "sig", 0, 1_000_000, 10, 5);
        tx.meta.pre_token_balances.clear();
        tx.meta.post_token_balances.clear();
        assert!(trade_from_balances(&tx).is_err());
    }

    #[test]
    fn parse_is_deterministic() {
        let registry = ParserRegistry::new(vec![Box::new(BondingCurveParser::new("prog"))]);
        let tx = trade_tx("prog", "mintA", "sig", 0, 1_000_000, 2_000_000_000, 999_995_000);
        assert_eq!(registry.parse(&tx), registry.parse(&tx));
    }

    #[test]
    fn registry_counts_errors_without_stopping() {
        let registry = ParserRegistry::new(vec![Box::new(BondingCurveParser::new("prog"))]);
        let mut tx = trade_tx("prog", "mintA", "sig", 0, 1_000_000, 2_000_000_000, 999_995_000);
        tx.meta.pre_token_balances.clear();
        tx.meta.post_token_balances.clear();

        assert!(registry.parse(&tx).is_empty());
        assert_eq!(registry.error_count(), 1);
        assert_eq!(registry.parsed_count(), 0);
    }

    #[test]
    fn unmatched_transactions_are_counted() {
        let registry = ParserRegistry::new(vec![Box::new(BondingCurveParser::new("prog"))]);
        let tx = trade_tx("other", "mintA", "sig", 0, 1, 10, 5);
        assert!(registry.parse(&tx).is_empty());
        assert_eq!(registry.unmatched_count(), 1);
    }
}
