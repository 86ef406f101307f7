//! Holder analysis types: balances, classifications, distribution metrics,
//! and persisted snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{MintAddress, WalletAddress};

/// A wallet's balance for one mint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    pub wallet: WalletAddress,
    /// Raw token amount.
    pub balance: u64,
    /// When the wallet first acquired the token, when known.
    #[serde(default)]
    pub first_acquired_at: Option<DateTime<Utc>>,
}

/// Classification of a holder wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletClass {
    Sniper,
    Bot,
    Bundler,
    Developer,
    Whale,
    Normal,
    Unknown,
}

impl WalletClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sniper => "sniper",
            Self::Bot => "bot",
            Self::Bundler => "bundler",
            Self::Developer => "developer",
            Self::Whale => "whale",
            Self::Normal => "normal",
            Self::Unknown => "unknown",
        }
    }
}

/// Which upstream source produced a holder list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolderSource {
    /// Plain RPC largest-accounts call.
    #[default]
    Rpc,
    /// Metadata + largest-accounts API.
    Enhanced,
    /// Paged full enumeration of token owners.
    Complete,
}

/// Options controlling one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Preferred holder-data source; fallback order continues from here.
    pub preferred_source: HolderSource,
    /// Cap on holders fetched.
    pub max_holders: usize,
    /// Classify the top wallets through the external classifier.
    pub classify_wallets: bool,
    /// Persist a snapshot when the holder set changed.
    pub save_snapshot: bool,
    /// Ignore snapshot freshness and re-fetch.
    pub force_refresh: bool,
    /// Try the next source when one returns nothing.
    pub enable_fallback: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            preferred_source: HolderSource::Rpc,
            max_holders: 1000,
            classify_wallets: true,
            save_snapshot: true,
            force_refresh: false,
            enable_fallback: true,
        }
    }
}

/// Concentration and inequality metrics over a holder distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistributionMetrics {
    /// Gini coefficient over balances, in `[0, 1]`.
    pub gini: f64,
    /// Herfindahl-Hirschman index over market shares, in `[0, 1]`.
    pub hhi: f64,
    /// Share of supply held by the top 10 wallets, percent.
    pub top10_pct: f64,
    /// Share of supply held by the top 25 wallets, percent.
    pub top25_pct: f64,
    /// Share of supply held by the top 100 wallets, percent.
    pub top100_pct: f64,
    /// Mean holding duration in hours, when acquisition times are present.
    pub mean_holding_hours: Option<f64>,
    /// Median holding duration in hours, when acquisition times are present.
    pub median_holding_hours: Option<f64>,
}

/// Per-factor breakdown of a holder score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub distribution: f64,
    pub concentration_penalty: f64,
    pub sniper_penalty: f64,
    pub bot_penalty: f64,
    pub holder_count_bonus: f64,
}

/// Total holder score with its breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HolderScore {
    pub total: f64,
    pub breakdown: ScoreBreakdown,
}

/// A persisted point-in-time holder analysis for one mint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderSnapshot {
    pub mint: MintAddress,
    pub taken_at: DateTime<Utc>,
    pub total_holders: usize,
    /// Hex digest of the sorted `wallet:balance` set; used for change dedup.
    pub holders_hash: String,
    pub source: HolderSource,
    pub metrics: DistributionMetrics,
    pub score: HolderScore,
    /// Classified wallet counts by class, for the top wallets only.
    pub class_counts: Vec<(WalletClass, usize)>,
}
