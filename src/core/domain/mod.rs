//! Core domain types for mintstream.
//!
//! ## Stream Types
//!
//! - [`StreamMessage`] - Tagged upstream message variants
//! - [`TransactionUpdate`] - A transaction notification with metadata
//! - [`CommitmentLevel`] - Upstream commitment level for subscriptions
//!
//! ## Trade Types
//!
//! - [`Trade`] - A normalized domain trade
//! - [`TradeVenue`] - Where the trade executed (bonding curve, AMM pool, external AMM)
//! - [`TokenCreation`] - A token mint creation event
//!
//! ## Chain Types
//!
//! - [`SlotRecord`] - A tracked slot with status and counters
//! - [`SlotGap`] - A detected discontinuity in the slot stream
//!
//! ## Holder Types
//!
//! - [`Holder`] - A wallet and its balance for one mint
//! - [`DistributionMetrics`] - Gini, HHI, and top-K concentration
//! - [`HolderSnapshot`] - A persisted point-in-time holder analysis
//!
//! ## Identifier Types
//!
//! - [`MintAddress`] - Token mint address
//! - [`TxSignature`] - Transaction signature
//! - [`WalletAddress`] - Wallet address

mod holder;
mod ids;
mod message;
mod slot;
mod token;
mod trade;

pub use holder::{
    AnalysisOptions, DistributionMetrics, Holder, HolderScore, HolderSnapshot, HolderSource,
    ScoreBreakdown, WalletClass,
};
pub use ids::{ConnectionId, MintAddress, TxSignature, WalletAddress};
pub use message::{
    BlockMetaUpdate, CommitmentLevel, Instruction, SlotStatusUpdate, StreamMessage, TokenBalance,
    TransactionMeta, TransactionUpdate,
};
pub use slot::{GapReason, SlotGap, SlotRecord, SlotStatus};
pub use token::Token;
pub use trade::{ParsedEvent, TokenCreation, Trade, TradeSide, TradeVenue};
