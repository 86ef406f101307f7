//! AMM pool trade decoding.

use rust_decimal::Decimal;

use super::{trade_from_balances, ParseStrategy};
use crate::core::domain::{
    MintAddress, ParsedEvent, Trade, TradeVenue, TransactionUpdate, WalletAddress,
};
use crate::error::Result;

/// Decodes swaps against the graduation pool program.
pub struct AmmPoolParser {
    program_id: String,
}

impl AmmPoolParser {
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
        }
    }
}

impl ParseStrategy for AmmPoolParser {
    fn name(&self) -> &'static str {
        "amm_pool"
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
            venue: TradeVenue::AmmPool,
            sol_amount,
            token_amount,
            price_sol,
            block_time: tx.block_time,
        })])
    }
}
