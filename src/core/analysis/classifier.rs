//! Wallet classification with a per-wallet cache.
//!
//! Classification is an external call; results change slowly, so a
//! TTL-bounded cache sits in front of whatever classifier backs it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::api_limiter::ApiRateLimiter;
use crate::core::domain::{WalletAddress, WalletClass};
use crate::error::Result;

/// Classifies wallets in bulk.
#[async_trait]
pub trait WalletClassifier: Send + Sync {
    async fn classify(
        &self,
        wallets: &[WalletAddress],
    ) -> Result<HashMap<WalletAddress, WalletClass>>;
}

/// TTL cache in front of another classifier.
pub struct CachingClassifier {
    inner: Arc<dyn WalletClassifier>,
    cache: DashMap<WalletAddress, (WalletClass, Instant)>,
    ttl: Duration,
}

impl CachingClassifier {
    pub fn new(inner: Arc<dyn WalletClassifier>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl WalletClassifier for CachingClassifier {
    async fn classify(
        &self,
        wallets: &[WalletAddress],
    ) -> Result<HashMap<WalletAddress, WalletClass>> {
        let now = Instant::now();
        let mut result = HashMap::new();
        let mut misses = Vec::new();

        for wallet in wallets {
            match self.cache.get(wallet) {
                Some(entry) if now.duration_since(entry.1) < self.ttl => {
                    result.insert(wallet.clone(), entry.0);
                }
                _ => misses.push(wallet.clone()),
            }
        }

        if !misses.is_empty() {
            debug!(hits = result.len(), misses = misses.len(), "Classifying wallets");
            let fresh = self.inner.classify(&misses).await?;
            for (wallet, class) in fresh {
                self.cache.insert(wallet.clone(), (class, now));
                result.insert(wallet, class);
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    classifications: Vec<ClassificationEntry>,
}

#[derive(Debug, Deserialize)]
struct ClassificationEntry {
    wallet: String,
    class: WalletClass,
}

/// HTTP-backed classifier.
pub struct HttpWalletClassifier {
    http: reqwest::Client,
    url: Url,
    limiter: Arc<ApiRateLimiter>,
}

impl HttpWalletClassifier {
    pub fn new(http: reqwest::Client, url: Url, limiter: Arc<ApiRateLimiter>) -> Self {
        Self { http, url, limiter }
    }
}

#[async_trait]
impl WalletClassifier for HttpWalletClassifier {
    async fn classify(
        &self,
        wallets: &[WalletAddress],
    ) -> Result<HashMap<WalletAddress, WalletClass>> {
        if wallets.is_empty() {
            return Ok(HashMap::new());
        }
        self.limiter.acquire().await;

        let body = serde_json::json!({
            "wallets": wallets.iter().map(WalletAddress::as_str).collect::<Vec<_>>(),
        });
        let response: ClassificationResponse = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .classifications
            .into_iter()
            .map(|e| (WalletAddress::from(e.wallet), e.class))
            .collect())
    }
}
