//! Staleness detection.
//!
//! Tokens are bucketed into tiers by market cap; each tier defines how
//! long without trades counts as stale. Transitions publish alerts both
//! ways so the admin surface can track and clear them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::core::bus::{BusEvent, EventBus};
use crate::core::store::TokenStore;

/// One staleness tier. Tiers are matched highest cap first.
#[derive(Debug, Clone)]
pub struct StalenessTier {
    /// Minimum market cap (SOL) for this tier.
    pub min_market_cap_sol: Decimal,
    /// Quiet time after which a token in this tier is stale.
    pub max_quiet: Duration,
}

/// Default tiers: the bigger the token, the longer it may stay quiet.
pub fn default_tiers() -> Vec<StalenessTier> {
    vec![
        StalenessTier {
            min_market_cap_sol: Decimal::from(1_000),
            max_quiet: Duration::from_secs(24 * 3_600),
        },
        StalenessTier {
            min_market_cap_sol: Decimal::from(100),
            max_quiet: Duration::from_secs(6 * 3_600),
        },
        StalenessTier {
            min_market_cap_sol: Decimal::ZERO,
            max_quiet: Duration::from_secs(3_600),
        },
    ]
}

pub struct StalenessMonitor {
    tokens: Arc<dyn TokenStore>,
    bus: Arc<EventBus>,
    tiers: Vec<StalenessTier>,
    interval: Duration,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StalenessMonitor {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        bus: Arc<EventBus>,
        mut tiers: Vec<StalenessTier>,
        interval: Duration,
    ) -> Arc<Self> {
        if tiers.is_empty() {
            tiers = default_tiers();
        }
        tiers.sort_by(|a, b| b.min_market_cap_sol.cmp(&a.min_market_cap_sol));
        Arc::new(Self {
            tokens,
            bus,
            tiers,
            interval,
            task: Mutex::new(None),
        })
    }

    fn tier_for(&self, market_cap: Decimal) -> &StalenessTier {
        self.tiers
            .iter()
            .find(|t| market_cap >= t.min_market_cap_sol)
            .unwrap_or_else(|| self.tiers.last().expect("at least one tier"))
    }

    /// One scan pass. Returns `(marked stale, cleared)`.
    pub async fn run_once(&self) -> (usize, usize) {
        let tokens = match self.tokens.all_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Staleness scan failed to list tokens");
                return (0, 0);
            }
        };

        let now = Utc::now();
        let mut marked = 0;
        let mut cleared = 0;
        for token in tokens {
            let tier = self.tier_for(token.market_cap_sol);
            let last_activity = token.last_trade_at.unwrap_or(token.first_seen_at);
            let quiet = (now - last_activity).to_std().unwrap_or(Duration::ZERO);
            let should_be_stale = quiet > tier.max_quiet;

            if should_be_stale == token.stale {
                continue;
            }
            if let Err(e) = self.tokens.set_stale(&token.mint, should_be_stale).await {
                warn!(mint = %token.mint, error = %e, "Staleness update failed");
                continue;
            }
            if should_be_stale {
                marked += 1;
                info!(mint = %token.mint, quiet_secs = quiet.as_secs(), "Token went stale");
                self.bus.publish(&BusEvent::TokenStale { mint: token.mint.clone() });
                self.bus.publish(&BusEvent::AlertCreated {
                    kind: "token:stale".into(),
                    detail: format!("{} quiet for {}s", token.mint, quiet.as_secs()),
                });
            } else {
                cleared += 1;
                self.bus.publish(&BusEvent::AlertResolved {
                    kind: "token:stale".into(),
                });
            }
        }
        (marked, cleared)
    }

    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        *self.task.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                monitor.run_once().await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for StalenessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
