//! Upstream stream message variants.
//!
//! The upstream endpoint delivers JSON frames tagged by kind. Each frame is
//! decoded into a [`StreamMessage`] before demultiplexing; the `filters`
//! field names the subscription groups a transaction matched, which is how
//! the stream manager routes messages to per-group channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TxSignature;

/// Commitment level requested for a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentLevel {
    #[default]
    Processed,
    Confirmed,
    Finalized,
}

/// A single decoded instruction within a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Program the instruction targets.
    pub program_id: String,
    /// Account addresses referenced by the instruction.
    #[serde(default)]
    pub accounts: Vec<String>,
    /// Raw instruction data, base58.
    #[serde(default)]
    pub data: String,
}

/// A token balance entry from transaction metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Index of the account in `account_keys`.
    pub account_index: usize,
    /// Mint the balance is denominated in.
    pub mint: String,
    /// Owning wallet, when the upstream resolves it.
    #[serde(default)]
    pub owner: Option<String>,
    /// Raw token amount.
    pub amount: u64,
    /// Token decimals.
    pub decimals: u8,
}

/// Transaction metadata attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    /// Error string for failed transactions, `None` on success.
    #[serde(default)]
    pub err: Option<String>,
    /// Fee paid, lamports.
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<TokenBalance>,
    /// Lamport balances before execution, indexed like `account_keys`.
    #[serde(default)]
    pub pre_balances: Vec<u64>,
    /// Lamport balances after execution, indexed like `account_keys`.
    #[serde(default)]
    pub post_balances: Vec<u64>,
    #[serde(default)]
    pub log_messages: Vec<String>,
}

/// A transaction notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionUpdate {
    pub slot: u64,
    pub signature: TxSignature,
    /// Whether this transaction was a vote.
    #[serde(default)]
    pub is_vote: bool,
    /// All account addresses referenced by the transaction message.
    pub account_keys: Vec<String>,
    pub instructions: Vec<Instruction>,
    pub meta: TransactionMeta,
    /// Block time, when the upstream attaches one.
    #[serde(default)]
    pub block_time: Option<DateTime<Utc>>,
    /// Names of the subscription groups whose filters matched.
    #[serde(default)]
    pub filters: Vec<String>,
}

impl TransactionUpdate {
    /// Whether the transaction failed.
    pub fn is_failed(&self) -> bool {
        self.meta.err.is_some()
    }

    /// Whether any instruction targets the given program.
    pub fn touches_program(&self, program_id: &str) -> bool {
        self.instructions.iter().any(|ix| ix.program_id == program_id)
            || self.account_keys.iter().any(|k| k == program_id)
    }
}

/// A slot progression notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatusUpdate {
    pub slot: u64,
    pub parent_slot: u64,
    pub status: CommitmentLevel,
    #[serde(default)]
    pub block_height: Option<u64>,
}

/// Block metadata delivered once a block is assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetaUpdate {
    pub slot: u64,
    pub parent_slot: u64,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub block_time: Option<DateTime<Utc>>,
    pub blockhash: String,
    #[serde(default)]
    pub leader: Option<String>,
    #[serde(default)]
    pub transaction_count: u64,
    #[serde(default)]
    pub failed_transaction_count: u64,
    #[serde(default)]
    pub fee_rewards: u64,
}

/// One decoded upstream frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamMessage {
    Transaction(TransactionUpdate),
    Slot(SlotStatusUpdate),
    BlockMeta(BlockMetaUpdate),
    Ping { id: u64 },
}

impl StreamMessage {
    /// Slot the message refers to, if any.
    pub fn slot(&self) -> Option<u64> {
        match self {
            Self::Transaction(tx) => Some(tx.slot),
            Self::Slot(s) => Some(s.slot),
            Self::BlockMeta(b) => Some(b.slot),
            Self::Ping { .. } => None,
        }
    }

    /// Approximate wire size used for load accounting.
    pub fn approx_bytes(&self) -> usize {
        match self {
            Self::Transaction(tx) => {
                256 + tx.account_keys.len() * 44
                    + tx.instructions.iter().map(|i| 64 + i.data.len()).sum::<usize>()
            }
            Self::Slot(_) => 64,
            Self::BlockMeta(_) => 192,
            Self::Ping { .. } => 16,
        }
    }
}
