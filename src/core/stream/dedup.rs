//! Trade deduplication across migration overlap.
//!
//! During a migration both the old and the new subscription may deliver
//! the same transaction. Trades are unique by `(signature, slot)`; the
//! first sighting wins and later ones are dropped here before they reach
//! the bus.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::core::domain::TxSignature;

/// Thread-safe `(signature, slot)` deduplicator with TTL eviction.
pub struct TradeDeduplicator {
    cache: DashMap<(TxSignature, u64), Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl TradeDeduplicator {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// Record a sighting. Returns `true` when this is the first one.
    pub fn check_and_record(&self, signature: &TxSignature, slot: u64) -> bool {
        let key = (signature.clone(), slot);
        let now = Instant::now();

        if let Some(seen) = self.cache.get(&key) {
            if now.duration_since(*seen) < self.ttl {
                return false;
            }
        }
        self.cache.insert(key, now);

        if self.cache.len() > self.max_entries {
            self.evict(now);
        }
        true
    }

    fn evict(&self, now: Instant) {
        self.cache.retain(|_, seen| now.duration_since(*seen) < self.ttl);
        // Still over the cap after TTL eviction: drop arbitrary entries
        // down to the limit rather than grow without bound.
        if self.cache.len() > self.max_entries {
            let excess = self.cache.len() - self.max_entries;
            let victims: Vec<_> = self
                .cache
                .iter()
                .take(excess)
                .map(|e| e.key().clone())
                .collect();
            for key in victims {
                self.cache.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_sighting_wins() {
        let dedup = TradeDeduplicator::new(Duration::from_secs(60), 1000);
        let sig = TxSignature::from("sig-1");
        assert!(dedup.check_and_record(&sig, 100));
        assert!(!dedup.check_and_record(&sig, 100));
        // Same signature on a different slot is a different key.
        assert!(dedup.check_and_record(&sig, 101));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let dedup = TradeDeduplicator::new(Duration::from_secs(10), 1000);
        let sig = TxSignature::from("sig-1");
        assert!(dedup.check_and_record(&sig, 100));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(dedup.check_and_record(&sig, 100));
    }

    #[tokio::test]
    async fn cache_is_bounded() {
        let dedup = TradeDeduplicator::new(Duration::from_secs(600), 10);
        for i in 0..50 {
            dedup.check_and_record(&TxSignature::from(format!("sig-{i}")), i);
        }
        assert!(dedup.len() <= 10);
    }
}
