//! Holder analysis pipeline for one mint.
//!
//! Fetch → classify → measure → score → snapshot. Snapshot reuse avoids
//! re-fetching when a recent analysis exists; the freshness window halves
//! for critical-tier tokens (by market cap). A snapshot row is only
//! written when the holder-set hash changed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::classifier::WalletClassifier;
use super::fetcher::TieredHolderSource;
use super::metrics;
use super::score::ScoreCalculator;
use crate::core::domain::{
    AnalysisOptions, Holder, HolderSnapshot, MintAddress, WalletClass,
};
use crate::core::store::{SnapshotStore, TokenStore};
use crate::error::{Error, Result};

/// Tuning for the orchestrator.
#[derive(Debug, Clone)]
pub struct AnalysisTuning {
    /// Base snapshot freshness window.
    pub freshness: Duration,
    /// Market cap (SOL) at which a token counts as critical tier and
    /// refreshes twice as often.
    pub critical_market_cap_sol: rust_decimal::Decimal,
    /// How many top wallets go through classification.
    pub top_wallets: usize,
}

impl Default for AnalysisTuning {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(3_600),
            critical_market_cap_sol: rust_decimal::Decimal::from(1_000),
            top_wallets: 100,
        }
    }
}

/// Result of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub snapshot: HolderSnapshot,
    /// The snapshot that preceded this run, for significance comparison.
    pub previous: Option<HolderSnapshot>,
    /// Whether a fresh previous snapshot was reused instead of re-fetching.
    pub reused: bool,
    /// Whether a new snapshot row was persisted.
    pub persisted: bool,
}

/// Drives the fetch → classify → score → snapshot pipeline.
pub struct HolderAnalysisOrchestrator {
    snapshots: Arc<dyn SnapshotStore>,
    tokens: Arc<dyn TokenStore>,
    source: Arc<TieredHolderSource>,
    classifier: Option<Arc<dyn WalletClassifier>>,
    calculator: Arc<dyn ScoreCalculator>,
    tuning: AnalysisTuning,
}

impl HolderAnalysisOrchestrator {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        tokens: Arc<dyn TokenStore>,
        source: Arc<TieredHolderSource>,
        classifier: Option<Arc<dyn WalletClassifier>>,
        calculator: Arc<dyn ScoreCalculator>,
        tuning: AnalysisTuning,
    ) -> Self {
        Self {
            snapshots,
            tokens,
            source,
            classifier,
            calculator,
            tuning,
        }
    }

    /// Hex digest of the sorted `wallet:balance` set.
    fn holders_hash(holders: &[Holder]) -> String {
        let mut lines: Vec<String> = holders
            .iter()
            .map(|h| format!("{}:{}", h.wallet, h.balance))
            .collect();
        lines.sort_unstable();

        let mut hasher = Sha256::new();
        for line in lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    async fn freshness_for(&self, mint: &MintAddress) -> Duration {
        match self.tokens.token(mint).await {
            Ok(Some(token)) if token.market_cap_sol >= self.tuning.critical_market_cap_sol => {
                self.tuning.freshness / 2
            }
            _ => self.tuning.freshness,
        }
    }

    /// Run the pipeline for one mint.
    pub async fn analyze(
        &self,
        mint: &MintAddress,
        options: &AnalysisOptions,
    ) -> Result<AnalysisOutcome> {
        let previous = self.snapshots.latest_snapshot(mint).await?;

        if !options.force_refresh {
            if let Some(prev) = &previous {
                let freshness = self.freshness_for(mint).await;
                let age = (Utc::now() - prev.taken_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if age < freshness {
                    debug!(mint = %mint, age_secs = age.as_secs(), "Reusing fresh snapshot");
                    return Ok(AnalysisOutcome {
                        snapshot: prev.clone(),
                        previous: previous.clone(),
                        reused: true,
                        persisted: false,
                    });
                }
            }
        }

        let (source, mut holders) = self
            .source
            .fetch(mint, options)
            .await?
            .ok_or_else(|| Error::HolderData(format!("no source returned holders for {mint}")))?;

        holders.sort_by(|a, b| b.balance.cmp(&a.balance));
        holders.truncate(options.max_holders);

        let class_counts = if options.classify_wallets {
            self.classify_top(&holders).await?
        } else {
            HashMap::new()
        };

        let distribution = metrics::compute(&holders);
        let score = self
            .calculator
            .score(&distribution, &class_counts, holders.len());

        let snapshot = HolderSnapshot {
            mint: mint.clone(),
            taken_at: Utc::now(),
            total_holders: holders.len(),
            holders_hash: Self::holders_hash(&holders),
            source,
            metrics: distribution,
            score,
            class_counts: class_counts.into_iter().collect(),
        };

        let persisted = if options.save_snapshot {
            self.snapshots.save_snapshot(&snapshot).await?
        } else {
            false
        };

        info!(
            mint = %mint,
            holders = snapshot.total_holders,
            score = snapshot.score.total,
            persisted,
            "Holder analysis complete"
        );

        Ok(AnalysisOutcome {
            snapshot,
            previous,
            reused: false,
            persisted,
        })
    }

    async fn classify_top(&self, holders: &[Holder]) -> Result<HashMap<WalletClass, usize>> {
        let Some(classifier) = &self.classifier else {
            return Ok(HashMap::new());
        };
        let top: Vec<_> = holders
            .iter()
            .take(self.tuning.top_wallets)
            .map(|h| h.wallet.clone())
            .collect();
        let classes = classifier.classify(&top).await?;

        let mut counts: HashMap<WalletClass, usize> = HashMap::new();
        for class in classes.values() {
            *counts.entry(*class).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
