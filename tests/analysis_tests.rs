//! Holder analysis pipeline: tiered fallback, metric bounds, snapshot
//! dedup.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use mintstream::core::analysis::{
    AnalysisTuning, HolderAnalysisOrchestrator, HolderFetcher, TieredHolderSource,
    WeightedScoreCalculator,
};
use mintstream::core::domain::{
    AnalysisOptions, Holder, HolderSource, MintAddress, WalletAddress,
};
use mintstream::core::store::{MemoryStore, SnapshotStore};
use mintstream::error::Result;

/// Source that always answers `None`.
struct EmptySource(HolderSource);

#[async_trait]
impl HolderFetcher for EmptySource {
    fn source(&self) -> HolderSource {
        self.0
    }

    async fn fetch(&self, _: &MintAddress, _: usize) -> Result<Option<Vec<Holder>>> {
        Ok(None)
    }
}

/// Paged enumeration double: serves `total` holders in `page_size` chunks
/// and records how many page reads happened.
struct PagedSource {
    total: usize,
    page_size: usize,
    pages_read: Mutex<usize>,
}

#[async_trait]
impl HolderFetcher for PagedSource {
    fn source(&self) -> HolderSource {
        HolderSource::Complete
    }

    async fn fetch(&self, _: &MintAddress, max: usize) -> Result<Option<Vec<Holder>>> {
        let mut holders = Vec::new();
        let mut page = 0;
        while holders.len() < self.total.min(max) {
            page += 1;
            let start = holders.len();
            let end = (start + self.page_size).min(self.total).min(max);
            holders.extend((start..end).map(|i| Holder {
                // Skewed balances so the distribution is non-degenerate.
                wallet: WalletAddress::from(format!("wallet-{i}")),
                balance: 1_000_000 / (i as u64 + 1) + 1,
                first_acquired_at: None,
            }));
        }
        *self.pages_read.lock() = page;
        Ok(Some(holders))
    }
}

fn orchestrator(
    store: Arc<MemoryStore>,
    fetchers: Vec<Arc<dyn HolderFetcher>>,
) -> HolderAnalysisOrchestrator {
    HolderAnalysisOrchestrator::new(
        store.clone(),
        store,
        Arc::new(TieredHolderSource::new(fetchers)),
        None,
        Arc::new(WeightedScoreCalculator::default()),
        AnalysisTuning::default(),
    )
}

#[tokio::test]
async fn fallback_enumerates_when_primary_is_empty() {
    let store = Arc::new(MemoryStore::new());
    let paged = Arc::new(PagedSource {
        total: 12_345,
        page_size: 1_000,
        pages_read: Mutex::new(0),
    });
    let orch = orchestrator(
        store.clone(),
        vec![Arc::new(EmptySource(HolderSource::Rpc)), paged.clone()],
    );

    let options = AnalysisOptions {
        max_holders: 20_000,
        classify_wallets: false,
        ..AnalysisOptions::default()
    };
    let outcome = orch
        .analyze(&MintAddress::from("mintM"), &options)
        .await
        .unwrap();

    assert_eq!(outcome.snapshot.total_holders, 12_345);
    assert_eq!(outcome.snapshot.source, HolderSource::Complete);
    assert_eq!(*paged.pages_read.lock(), 13);

    let metrics = &outcome.snapshot.metrics;
    assert!((0.0..=1.0).contains(&metrics.gini), "gini {}", metrics.gini);
    assert!((0.0..=1.0).contains(&metrics.hhi), "hhi {}", metrics.hhi);
    assert!(metrics.top10_pct <= metrics.top25_pct);
    assert!(metrics.top25_pct <= metrics.top100_pct);
    assert!((0.0..=100.0).contains(&outcome.snapshot.score.total));

    // Persisted and retrievable.
    let latest = store
        .latest_snapshot(&MintAddress::from("mintM"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.holders_hash, outcome.snapshot.holders_hash);
}

#[tokio::test]
async fn identical_holder_set_saves_one_snapshot_row() {
    let store = Arc::new(MemoryStore::new());
    let paged = Arc::new(PagedSource {
        total: 100,
        page_size: 50,
        pages_read: Mutex::new(0),
    });
    let orch = orchestrator(store.clone(), vec![paged]);

    let options = AnalysisOptions {
        classify_wallets: false,
        force_refresh: true,
        ..AnalysisOptions::default()
    };
    let first = orch.analyze(&MintAddress::from("m"), &options).await.unwrap();
    let second = orch.analyze(&MintAddress::from("m"), &options).await.unwrap();

    assert!(first.persisted);
    assert!(!second.persisted, "unchanged holder set must not add a row");
    assert_eq!(first.snapshot.holders_hash, second.snapshot.holders_hash);
}
