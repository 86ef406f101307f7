//! Tiered holder-data fetching.
//!
//! Three sources, in escalating completeness: a plain RPC largest-accounts
//! call, the enhanced metadata + largest-accounts API, and a paged full
//! enumeration of token owners. [`TieredHolderSource`] starts from the
//! preferred source and falls through on empty results when fallback is
//! enabled. Every call runs under the per-endpoint rate limiter and a
//! timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use super::api_limiter::ApiRateLimiter;
use crate::core::domain::{AnalysisOptions, Holder, HolderSource, MintAddress, WalletAddress};
use crate::error::{Error, Result};

/// One holder-data source.
#[async_trait]
pub trait HolderFetcher: Send + Sync {
    fn source(&self) -> HolderSource;

    /// Fetch up to `max_holders` holders. `None` means the source has no
    /// data for the mint (distinct from an error).
    async fn fetch(&self, mint: &MintAddress, max_holders: usize) -> Result<Option<Vec<Holder>>>;
}

// -- RPC source -------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<RpcResult>,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    value: Vec<RpcAccount>,
}

#[derive(Debug, Deserialize)]
struct RpcAccount {
    address: String,
    amount: String,
}

/// Largest-accounts call against a plain RPC endpoint. Top-20 only.
pub struct RpcHolderFetcher {
    http: reqwest::Client,
    url: Url,
    limiter: Arc<ApiRateLimiter>,
    call_timeout: Duration,
}

impl RpcHolderFetcher {
    pub fn new(
        http: reqwest::Client,
        url: Url,
        limiter: Arc<ApiRateLimiter>,
        call_timeout: Duration,
    ) -> Self {
        Self { http, url, limiter, call_timeout }
    }
}

#[async_trait]
impl HolderFetcher for RpcHolderFetcher {
    fn source(&self) -> HolderSource {
        HolderSource::Rpc
    }

    async fn fetch(&self, mint: &MintAddress, max_holders: usize) -> Result<Option<Vec<Holder>>> {
        self.limiter.acquire().await;
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTokenLargestAccounts",
            "params": [mint.as_str()],
        });

        let request = self.http.post(self.url.clone()).json(&body).send();
        let response = timeout(self.call_timeout, request)
            .await
            .map_err(|_| Error::Timeout(self.call_timeout))??;
        let parsed: RpcResponse = response.error_for_status()?.json().await?;

        let Some(result) = parsed.result else {
            return Ok(None);
        };
        if result.value.is_empty() {
            return Ok(None);
        }

        let holders: Vec<Holder> = result
            .value
            .into_iter()
            .take(max_holders)
            .filter_map(|a| {
                a.amount.parse::<u64>().ok().map(|balance| Holder {
                    wallet: WalletAddress::from(a.address),
                    balance,
                    first_acquired_at: None,
                })
            })
            .collect();
        Ok(Some(holders))
    }
}

// -- Enhanced source --------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EnhancedResponse {
    holders: Vec<EnhancedHolder>,
}

#[derive(Debug, Deserialize)]
struct EnhancedHolder {
    owner: String,
    balance: u64,
}

/// Metadata + largest-accounts API.
pub struct EnhancedHolderFetcher {
    http: reqwest::Client,
    base_url: Url,
    limiter: Arc<ApiRateLimiter>,
    call_timeout: Duration,
}

impl EnhancedHolderFetcher {
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        limiter: Arc<ApiRateLimiter>,
        call_timeout: Duration,
    ) -> Self {
        Self { http, base_url, limiter, call_timeout }
    }
}

#[async_trait]
impl HolderFetcher for EnhancedHolderFetcher {
    fn source(&self) -> HolderSource {
        HolderSource::Enhanced
    }

    async fn fetch(&self, mint: &MintAddress, max_holders: usize) -> Result<Option<Vec<Holder>>> {
        self.limiter.acquire().await;
        let url = self
            .base_url
            .join(&format!("tokens/{}/holders", mint.as_str()))
            .map_err(Error::Url)?;

        let request = self
            .http
            .get(url)
            .query(&[("limit", max_holders.to_string())])
            .send();
        let response = timeout(self.call_timeout, request)
            .await
            .map_err(|_| Error::Timeout(self.call_timeout))??;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: EnhancedResponse = response.error_for_status()?.json().await?;
        if parsed.holders.is_empty() {
            return Ok(None);
        }

        Ok(Some(
            parsed
                .holders
                .into_iter()
                .take(max_holders)
                .map(|h| Holder {
                    wallet: WalletAddress::from(h.owner),
                    balance: h.balance,
                    first_acquired_at: None,
                })
                .collect(),
        ))
    }
}

// -- Complete source --------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OwnersPage {
    token_accounts: Vec<OwnerAccount>,
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OwnerAccount {
    owner: String,
    amount: u64,
}

/// Paged enumeration of every token owner.
pub struct CompleteHolderFetcher {
    http: reqwest::Client,
    base_url: Url,
    limiter: Arc<ApiRateLimiter>,
    page_size: usize,
    max_pages: u32,
    enumeration_timeout: Duration,
}

impl CompleteHolderFetcher {
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        limiter: Arc<ApiRateLimiter>,
        page_size: usize,
        max_pages: u32,
        enumeration_timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            limiter,
            page_size,
            max_pages,
            enumeration_timeout,
        }
    }

    async fn fetch_all_pages(
        &self,
        mint: &MintAddress,
        max_holders: usize,
    ) -> Result<Option<Vec<Holder>>> {
        let url = self.base_url.join("token-accounts").map_err(Error::Url)?;
        let mut holders = Vec::new();

        for page in 1..=self.max_pages {
            self.limiter.acquire().await;
            let response = self
                .http
                .get(url.clone())
                .query(&[
                    ("mint", mint.as_str().to_string()),
                    ("page", page.to_string()),
                    ("limit", self.page_size.to_string()),
                ])
                .send()
                .await?
                .error_for_status()?;
            let parsed: OwnersPage = response.json().await?;

            let count = parsed.token_accounts.len();
            holders.extend(parsed.token_accounts.into_iter().map(|a| Holder {
                wallet: WalletAddress::from(a.owner),
                balance: a.amount,
                first_acquired_at: None,
            }));
            debug!(mint = %mint, page, accounts = count, "Owner page fetched");

            if holders.len() >= max_holders {
                holders.truncate(max_holders);
                break;
            }
            let last_page = parsed.total_pages.is_some_and(|total| page >= total);
            if count < self.page_size || last_page {
                break;
            }
        }

        if holders.is_empty() {
            Ok(None)
        } else {
            Ok(Some(holders))
        }
    }
}

#[async_trait]
impl HolderFetcher for CompleteHolderFetcher {
    fn source(&self) -> HolderSource {
        HolderSource::Complete
    }

    async fn fetch(&self, mint: &MintAddress, max_holders: usize) -> Result<Option<Vec<Holder>>> {
        timeout(self.enumeration_timeout, self.fetch_all_pages(mint, max_holders))
            .await
            .map_err(|_| Error::Timeout(self.enumeration_timeout))?
    }
}

// -- Tiered composition -----------------------------------------------------

/// Fallback chain over the registered fetchers.
pub struct TieredHolderSource {
    fetchers: Vec<Arc<dyn HolderFetcher>>,
}

impl TieredHolderSource {
    pub fn new(fetchers: Vec<Arc<dyn HolderFetcher>>) -> Self {
        Self { fetchers }
    }

    /// Fetch holders, starting from the preferred source and falling
    /// through on empty results (and on errors) when fallback is enabled.
    pub async fn fetch(
        &self,
        mint: &MintAddress,
        options: &AnalysisOptions,
    ) -> Result<Option<(HolderSource, Vec<Holder>)>> {
        let start = self
            .fetchers
            .iter()
            .position(|f| f.source() == options.preferred_source)
            .unwrap_or(0);

        let mut last_error = None;
        for fetcher in &self.fetchers[start..] {
            match fetcher.fetch(mint, options.max_holders).await {
                Ok(Some(holders)) => {
                    info!(
                        mint = %mint,
                        source = ?fetcher.source(),
                        holders = holders.len(),
                        "Holder list fetched"
                    );
                    return Ok(Some((fetcher.source(), holders)));
                }
                Ok(None) => {
                    debug!(mint = %mint, source = ?fetcher.source(), "Source returned no holders");
                }
                Err(e) => {
                    warn!(mint = %mint, source = ?fetcher.source(), error = %e, "Holder fetch failed");
                    last_error = Some(e);
                }
            }
            if !options.enable_fallback {
                break;
            }
        }

        match last_error {
            Some(e) if !options.enable_fallback => Err(e),
            _ => Ok(None),
        }
    }
}
