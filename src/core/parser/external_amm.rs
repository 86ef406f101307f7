//! External AMM trade decoding.
//!
//! Graduated tokens also trade on third-party pools; a single strategy
//! covers the configured set of external programs.

use rust_decimal::Decimal;

use super::{trade_from_balances, ParseStrategy};
use crate::core::domain::{
    MintAddress, ParsedEvent, Trade, TradeVenue, TransactionUpdate, WalletAddress,
};
use crate::error::Result;

/// Decodes swaps against any of the configured external pool programs.
pub struct ExternalAmmParser {
    program_ids: Vec<String>,
}

impl ExternalAmmParser {
    pub fn new(program_ids: Vec<String>) -> Self {
        Self { program_ids }
    }
}

impl ParseStrategy for ExternalAmmParser {
    fn name(&self) -> &'static str {
        "external_amm"
    }

    fn can_parse(&self, tx: &TransactionUpdate) -> bool {
        !tx.is_vote
            && !tx.is_failed()
            && self.program_ids.iter().any(|p| tx.touches_program(p))
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
            venue: TradeVenue::ExternalAmm,
            sol_amount,
            token_amount,
            price_sol,
            block_time: tx.block_time,
        })])
    }
}
