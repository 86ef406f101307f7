//! Token creation decoding.
//!
//! Creations are recognized from the launch program's `Create` instruction
//! log. Name and symbol ride in a follow-up program log when the launch
//! program emits one; otherwise they stay empty and are enriched later by
//! the metadata API.

use super::ParseStrategy;
use crate::core::domain::{
    MintAddress, ParsedEvent, TokenCreation, TransactionUpdate, WalletAddress,
};
use crate::error::{Error, Result};

const CREATE_LOG: &str = "Instruction: Create";

/// Decodes token mint creations on the launch program.
pub struct TokenCreationParser {
    program_id: String,
}

impl TokenCreationParser {
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
        }
    }

    /// Pull `name: X symbol: Y` out of the program logs when present.
    fn metadata_from_logs(logs: &[String]) -> (String, String) {
        for log in logs {
            let Some(name_at) = log.find("name:") else { continue };
            let Some(symbol_at) = log.find("symbol:") else { continue };
            let name = log[name_at + 5..symbol_at]
                .trim()
                .trim_end_matches(',')
                .trim()
                .to_string();
            let symbol = log[symbol_at + 7..]
                .trim()
                .trim_end_matches(',')
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            return (name, symbol);
        }
        (String::new(), String::new())
    }
}

impl ParseStrategy for TokenCreationParser {
    fn name(&self) -> &'static str {
        "token_creation"
    }

    fn can_parse(&self, tx: &TransactionUpdate) -> bool {
        !tx.is_vote
            && !tx.is_failed()
            && tx.touches_program(&self.program_id)
            && tx.meta.log_messages.iter().any(|l| l.contains(CREATE_LOG))
    }

    fn parse(&self, tx: &TransactionUpdate) -> Result<Vec<ParsedEvent>> {
        let mint = tx
            .meta
            .post_token_balances
            .first()
            .map(|b| b.mint.clone())
            .ok_or_else(|| Error::Stream("creation without minted balance".into()))?;
        let creator = tx
            .account_keys
            .first()
            .cloned()
            .ok_or_else(|| Error::Stream("transaction without account keys".into()))?;
        let (name, symbol) = Self::metadata_from_logs(&tx.meta.log_messages);

        Ok(vec![ParsedEvent::TokenCreated(TokenCreation {
            mint: MintAddress::from(mint),
            symbol,
            name,
            creator: WalletAddress::from(creator),
            slot: tx.slot,
            signature: tx.signature.clone(),
            block_time: tx.block_time,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::test_fixtures::trade_tx;

    fn creation_tx() -> TransactionUpdate {
        let mut tx = trade_tx("launch", "newMint", "sig-create", 0, 1_000_000, 10, 5);
        tx.meta.log_messages = vec![
            "Program launch invoke [1]".into(),
            "Program log: Instruction: Create".into(),
            "Program log: name: Moon Cat, symbol: MCAT".into(),
        ];
        tx
    }

    #[test]
    fn matches_only_create_instructions() {
        let parser = TokenCreationParser::new("launch");
        assert!(parser.can_parse(&creation_tx()));

        let plain = trade_tx("launch", "newMint", "sig", 0, 1_000_000, 10, 5);
        assert!(!parser.can_parse(&plain));
    }

    #[test]
    fn extracts_mint_creator_and_metadata() {
        let parser = TokenCreationParser::new("launch");
        let events = parser.parse(&creation_tx()).unwrap();
        let ParsedEvent::TokenCreated(creation) = &events[0] else {
            panic!("expected creation");
        };
        assert_eq!(creation.mint.as_str(), "newMint");
        assert_eq!(creation.creator.as_str(), "trader1111");
        assert_eq!(creation.name, "Moon Cat");
        assert_eq!(creation.symbol, "MCAT");
    }

    #[test]
    fn missing_metadata_logs_leave_names_empty() {
        let parser = TokenCreationParser::new("launch");
        let mut tx = creation_tx();
        tx.meta.log_messages = vec!["Program log: Instruction: Create".into()];
        let events = parser.parse(&tx).unwrap();
        let ParsedEvent::TokenCreated(creation) = &events[0] else {
            panic!("expected creation");
        };
        assert!(creation.name.is_empty());
        assert!(creation.symbol.is_empty());
    }
}
