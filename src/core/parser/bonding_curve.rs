//! Bonding-curve trade decoding.

use rust_decimal::Decimal;

use super::{trade_from_balances, ParseStrategy};
use crate::core::domain::{
    MintAddress, ParsedEvent, Trade, TradeVenue, TransactionUpdate, WalletAddress,
};
use crate::error::Result;

/// Decodes buys and sells against the bonding-curve program.
pub struct BondingCurveParser {
    program_id: String,
}

impl BondingCurveParser {
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
        }
    }
}

impl ParseStrategy for BondingCurveParser {
    fn name(&self) -> &'static str {
        "bonding_curve"
    }

    fn can_parse(&self, tx: &TransactionUpdate) -> bool {
        !tx.is_vote && !tx.is_failed() && tx.touches_program(&self.program_id)
    }

    fn parse(&self, tx: &TransactionUpdate) -> Result<Vec<ParsedEvent>> {
        let (mint, side, sol_amount, token_amount) = trade_from_balances(tx)?;
        let trader = tx.account_keys[0].clone();
        let price_sol = if token_amount.is_zero() {
            Decimal::ZERO
        } else {
            sol_amount / token_amount
        };

        Ok(vec![ParsedEvent::Trade(Trade {
            signature: tx.signature.clone(),
            slot: tx.slot,
            mint: MintAddress::from(mint),
            trader: WalletAddress::from(trader),
            side,
            venue: TradeVenue::BondingCurve,
            sol_amount,
            token_amount,
            price_sol,
            block_time: tx.block_time,
        })])
    }
}
