//! Graduation fixer.
//!
//! The writer flips the graduation flag when it sees the first pool trade,
//! but trades observed before a restart or during an outage can leave a
//! token with pool trades on record and the flag unset. This scan repairs
//! those: any non-graduated token with pool trades gets the flag, with
//! `graduation_at` set to the earliest pool trade time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::core::store::{TokenStore, TradeStore};

pub struct GraduationFixer {
    tokens: Arc<dyn TokenStore>,
    trades: Arc<dyn TradeStore>,
    interval: Duration,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl GraduationFixer {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        trades: Arc<dyn TradeStore>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            tokens,
            trades,
            interval,
            task: Mutex::new(None),
        })
    }

    /// One repair pass. Returns the number of tokens fixed.
    pub async fn run_once(&self) -> usize {
        let tokens = match self.tokens.all_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Graduation scan failed to list tokens");
                return 0;
            }
        };

        let mut fixed = 0;
        for token in tokens.into_iter().filter(|t| !t.graduated_to_pool) {
            let summary = match self.trades.pool_trade_summary(&token.mint).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(mint = %token.mint, error = %e, "Pool trade lookup failed");
                    continue;
                }
            };
            let Some(summary) = summary else { continue };
            if summary.count == 0 {
                continue;
            }

            let at = summary.first_trade_at.unwrap_or_else(Utc::now);
            match self.tokens.mark_graduated(&token.mint, at).await {
                Ok(true) => {
                    info!(mint = %token.mint, pool_trades = summary.count, "Graduation flag repaired");
                    fixed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(mint = %token.mint, error = %e, "Graduation repair failed"),
            }
        }
        fixed
    }

    pub fn start(self: &Arc<Self>) {
        let fixer = Arc::clone(self);
        *self.task.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(fixer.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                fixer.run_once().await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for GraduationFixer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{
        MintAddress, Token, Trade, TradeSide, TradeVenue, TxSignature, WalletAddress,
    };
    use crate::core::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn pool_trade(sig: &str, hours_ago: i64) -> Trade {
        Trade {
            signature: TxSignature::from(sig),
            slot: 100,
            mint: MintAddress::from("mint"),
            trader: WalletAddress::from("w"),
            side: TradeSide::Buy,
            venue: TradeVenue::AmmPool,
            sol_amount: dec!(1),
            token_amount: dec!(100),
            price_sol: dec!(0.01),
            block_time: Some(Utc::now() - chrono::Duration::hours(hours_ago)),
        }
    }

    #[tokio::test]
    async fn repairs_unflagged_token_with_pool_trades() {
        let store = Arc::new(MemoryStore::new());
        let token = Token::new(MintAddress::from("mint"), "S".into(), "N".into(), 1);
        store.upsert_token(&token).await.unwrap();
        store.record_trade(&pool_trade("p1", 2)).await.unwrap();
        store.record_trade(&pool_trade("p2", 5)).await.unwrap();

        let fixer = GraduationFixer::new(store.clone(), store.clone(), Duration::from_secs(60));
        assert_eq!(fixer.run_once().await, 1);

        let fixed = store.token(&MintAddress::from("mint")).await.unwrap().unwrap();
        assert!(fixed.graduated_to_pool);
        // Earliest pool trade wins.
        let at = fixed.graduation_at.unwrap();
        assert!((Utc::now() - at).num_hours() >= 4);
    }

    #[tokio::test]
    async fn leaves_curve_only_tokens_alone() {
        let store = Arc::new(MemoryStore::new());
        let token = Token::new(MintAddress::from("mint"), "S".into(), "N".into(), 1);
        store.upsert_token(&token).await.unwrap();

        let fixer = GraduationFixer::new(store.clone(), store.clone(), Duration::from_secs(60));
        assert_eq!(fixer.run_once().await, 0);
        assert!(!store.token(&token.mint).await.unwrap().unwrap().graduated_to_pool);
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let token = Token::new(MintAddress::from("mint"), "S".into(), "N".into(), 1);
        store.upsert_token(&token).await.unwrap();
        store.record_trade(&pool_trade("p1", 1)).await.unwrap();

        let fixer = GraduationFixer::new(store.clone(), store.clone(), Duration::from_secs(60));
        assert_eq!(fixer.run_once().await, 1);
        assert_eq!(fixer.run_once().await, 0);
    }
}
