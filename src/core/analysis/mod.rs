//! Holder analysis: tiered fetching, classification, distribution
//! metrics, scoring, and snapshots.

mod api_limiter;
mod classifier;
mod fetcher;
pub mod metrics;
mod orchestrator;
mod score;

pub use api_limiter::ApiRateLimiter;
pub use classifier::{CachingClassifier, HttpWalletClassifier, WalletClassifier};
pub use fetcher::{
    CompleteHolderFetcher, EnhancedHolderFetcher, HolderFetcher, RpcHolderFetcher,
    TieredHolderSource,
};
pub use orchestrator::{AnalysisOutcome, AnalysisTuning, HolderAnalysisOrchestrator};
pub use score::{ScoreCalculator, ScoreWeights, WeightedScoreCalculator};
