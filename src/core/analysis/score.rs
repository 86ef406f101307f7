//! Holder score calculation seam.
//!
//! The weighting formula is owned by a collaborator; the orchestrator only
//! depends on [`ScoreCalculator`]. The bundled weighted calculator is the
//! default production implementation.

use std::collections::HashMap;

use serde::Deserialize;

use crate::core::domain::{DistributionMetrics, HolderScore, ScoreBreakdown, WalletClass};

/// Produces a total score with a per-factor breakdown.
pub trait ScoreCalculator: Send + Sync {
    fn score(
        &self,
        metrics: &DistributionMetrics,
        class_counts: &HashMap<WalletClass, usize>,
        total_holders: usize,
    ) -> HolderScore;
}

/// Weights for the bundled calculator.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreWeights {
    pub base: f64,
    pub distribution_weight: f64,
    pub concentration_weight: f64,
    pub sniper_penalty_per_wallet: f64,
    pub bot_penalty_per_wallet: f64,
    pub holder_count_weight: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            base: 50.0,
            distribution_weight: 20.0,
            concentration_weight: 0.5,
            sniper_penalty_per_wallet: 2.0,
            bot_penalty_per_wallet: 1.0,
            holder_count_weight: 5.0,
        }
    }
}

/// Default weighted formula.
pub struct WeightedScoreCalculator {
    weights: ScoreWeights,
}

impl WeightedScoreCalculator {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }
}

impl Default for WeightedScoreCalculator {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

impl ScoreCalculator for WeightedScoreCalculator {
    fn score(
        &self,
        metrics: &DistributionMetrics,
        class_counts: &HashMap<WalletClass, usize>,
        total_holders: usize,
    ) -> HolderScore {
        let w = &self.weights;

        let distribution = (1.0 - metrics.gini) * w.distribution_weight;
        // Penalize only the excess above a 50% top-10 share.
        let concentration_penalty =
            (metrics.top10_pct - 50.0).max(0.0) * w.concentration_weight;
        let snipers = *class_counts.get(&WalletClass::Sniper).unwrap_or(&0) as f64;
        let bots = *class_counts.get(&WalletClass::Bot).unwrap_or(&0) as f64;
        let sniper_penalty = (snipers * w.sniper_penalty_per_wallet).min(15.0);
        let bot_penalty = (bots * w.bot_penalty_per_wallet).min(10.0);
        let holder_count_bonus = if total_holders > 0 {
            ((total_holders as f64).log10() * w.holder_count_weight).min(15.0)
        } else {
            0.0
        };

        let breakdown = ScoreBreakdown {
            base: w.base,
            distribution,
            concentration_penalty,
            sniper_penalty,
            bot_penalty,
            holder_count_bonus,
        };
        let total = (w.base + distribution + holder_count_bonus
            - concentration_penalty
            - sniper_penalty
            - bot_penalty)
            .clamp(0.0, 100.0);

        HolderScore { total, breakdown }
    }
}
