//! Daemon wiring: builds every component from configuration, starts the
//! long-lived tasks, and tears them down in order on shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use url::Url;

use crate::app::Config;
use crate::core::analysis::{
    ApiRateLimiter, CachingClassifier, CompleteHolderFetcher, EnhancedHolderFetcher,
    HolderAnalysisOrchestrator, HolderFetcher, HttpWalletClassifier, RpcHolderFetcher,
    AnalysisTuning, TieredHolderSource, WalletClassifier, WeightedScoreCalculator,
};
use crate::core::bus::EventBus;
use crate::core::chain::{BlockTracker, BlockTrackerConfig};
use crate::core::domain::AnalysisOptions;
use crate::core::jobs::{
    JobOptions, JobPayload, JobProcessor, JobPriority, JobQueue, JobScheduler, JobSource,
    ScheduledJob,
};
use crate::core::parser::{
    AmmPoolParser, BondingCurveParser, ExternalAmmParser, ParserRegistry, TokenCreationParser,
};
use crate::core::service::{
    default_tiers, GraduationFixer, RpcBlockFetcher, SlotRecoveryService, StalenessMonitor,
    StalenessTier, StatusReporter, TokenStateWriter,
};
use crate::core::store::{db, SqliteStore, TokenStore};
use crate::core::stream::{
    ClientFactory, ConnectionPool, LoadBalancer, StreamManager, SubscriptionGroup,
    SubscriptionRateLimiter, WsStreamClient,
};
use crate::error::{Error, Result};

/// Selects mints due for a recurring analysis pass: graduated, non-stale
/// tokens, biggest market caps first.
struct DueAnalysisSource {
    tokens: Arc<dyn TokenStore>,
    batch: usize,
    options: AnalysisOptions,
}

#[async_trait]
impl JobSource for DueAnalysisSource {
    async fn jobs(&self) -> Vec<(JobPayload, JobOptions)> {
        let mut tokens = match self.tokens.all_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Recurring source failed to list tokens");
                return Vec::new();
            }
        };
        tokens.retain(|t| t.graduated_to_pool && !t.stale);
        tokens.sort_by(|a, b| b.market_cap_sol.cmp(&a.market_cap_sol));

        tokens
            .into_iter()
            .take(self.batch)
            .map(|token| {
                let dedup_key = format!("recurring:{}", token.mint);
                (
                    JobPayload::RecurringAnalysis {
                        mint: token.mint,
                        options: self.options.clone(),
                    },
                    JobOptions {
                        priority: JobPriority::Normal,
                        dedup_key: Some(dedup_key),
                        ..JobOptions::default()
                    },
                )
            })
            .collect()
    }
}

/// Selects active mints for the lightweight trend path.
struct TrendSource {
    tokens: Arc<dyn TokenStore>,
    batch: usize,
}

#[async_trait]
impl JobSource for TrendSource {
    async fn jobs(&self) -> Vec<(JobPayload, JobOptions)> {
        let mut tokens = match self.tokens.all_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Trend source failed to list tokens");
                return Vec::new();
            }
        };
        tokens.retain(|t| !t.stale);
        tokens.sort_by(|a, b| b.last_trade_at.cmp(&a.last_trade_at));

        tokens
            .into_iter()
            .take(self.batch)
            .map(|token| {
                let dedup_key = format!("trend:{}", token.mint);
                (
                    JobPayload::TrendUpdate { mint: token.mint },
                    JobOptions {
                        priority: JobPriority::Low,
                        dedup_key: Some(dedup_key),
                        ..JobOptions::default()
                    },
                )
            })
            .collect()
    }
}

/// The assembled application.
pub struct Daemon {
    config: Config,
    bus: Arc<EventBus>,
    tracker: Arc<BlockTracker>,
    manager: Arc<StreamManager>,
    queue: Arc<JobQueue>,
    processor: Arc<JobProcessor>,
    scheduler: JobScheduler,
    writer: Arc<TokenStateWriter>,
    graduation: Arc<GraduationFixer>,
    staleness: Arc<StalenessMonitor>,
    recovery: Arc<SlotRecoveryService>,
    status: Arc<StatusReporter>,
}

impl Daemon {
    /// Wire every component from configuration.
    pub async fn build(config: Config) -> Result<Self> {
        let bus = Arc::new(EventBus::new());

        // Persistence.
        let pool = db::create_pool(&config.store.database_url)?;
        db::run_migrations(&pool)?;
        let store = Arc::new(SqliteStore::new(pool));

        // Chain tracking.
        let tracker = Arc::new(BlockTracker::new(
            BlockTrackerConfig::default(),
            Arc::clone(&bus),
        ));

        // Stream plane.
        let limiter = Arc::new(SubscriptionRateLimiter::new(
            config.limiter.max_subscriptions,
            Duration::from_millis(config.limiter.time_window_ms),
        ));
        let conn_pool = Arc::new(ConnectionPool::new(config.pool.clone(), Arc::clone(&bus)));
        let balancer = Arc::new(LoadBalancer::new(config.balancer.clone()));
        let parsers = Arc::new(Self::build_parsers(&config));
        let factory = Self::build_client_factory(&config)?;
        let manager = StreamManager::new(
            config.stream.clone(),
            Arc::clone(&limiter),
            Arc::clone(&conn_pool),
            balancer,
            Arc::clone(&bus),
            Arc::clone(&tracker),
            parsers,
            factory,
        );

        // Holder analysis.
        let orchestrator = Arc::new(Self::build_orchestrator(&config, store.clone())?);

        // Jobs.
        let queue = Arc::new(JobQueue::new(3));
        let processor = JobProcessor::new(
            Arc::clone(&queue),
            orchestrator,
            Arc::clone(&bus),
            config.jobs.clone(),
        );
        let scheduler = Self::build_scheduler(&config, Arc::clone(&queue), store.clone());

        // Background services.
        let writer = TokenStateWriter::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::clone(&tracker),
        );
        let graduation = GraduationFixer::new(
            store.clone(),
            store.clone(),
            Duration::from_millis(config.services.graduation_scan_interval_ms),
        );
        let tiers: Vec<StalenessTier> = if config.staleness.tiers.is_empty() {
            default_tiers()
        } else {
            config
                .staleness
                .tiers
                .iter()
                .map(|t| StalenessTier {
                    min_market_cap_sol: t.min_market_cap_sol,
                    max_quiet: Duration::from_secs(t.max_quiet_minutes * 60),
                })
                .collect()
        };
        let staleness = StalenessMonitor::new(
            store.clone(),
            Arc::clone(&bus),
            tiers,
            Duration::from_millis(config.staleness.scan_interval_ms),
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.analysis.api.api_timeout_ms))
            .build()?;
        let recovery = SlotRecoveryService::new(
            Arc::clone(&tracker),
            store.clone(),
            Arc::new(RpcBlockFetcher::new(
                http,
                Url::parse(&config.analysis.api.rpc_url)
                    .map_err(|e| Error::Config(format!("analysis.api.rpc_url: {e}")))?,
                Duration::from_millis(config.analysis.api.api_timeout_ms),
            )),
            Arc::new(ApiRateLimiter::per_second(
                config.analysis.api.requests_per_second,
            )),
            Duration::from_millis(config.services.recovery_interval_ms),
            config.services.recovery_max_slots_per_run,
        );
        let status = StatusReporter::new(
            Arc::clone(&manager),
            Arc::clone(&tracker),
            Arc::clone(&queue),
            Arc::clone(&processor),
            Duration::from_millis(config.services.status_interval_ms),
        );

        conn_pool.initialize();

        Ok(Self {
            config,
            bus,
            tracker,
            manager,
            queue,
            processor,
            scheduler,
            writer,
            graduation,
            staleness,
            recovery,
            status,
        })
    }

    fn build_parsers(config: &Config) -> ParserRegistry {
        let mut strategies: Vec<Box<dyn crate::core::parser::ParseStrategy>> = Vec::new();
        let mut external_programs = Vec::new();

        for group in &config.groups {
            match group.name.as_str() {
                "bonding_curve" => {
                    for program in &group.programs {
                        // Creations first: the create instruction also
                        // carries the initial buy and must not decode as a
                        // plain trade.
                        strategies.push(Box::new(TokenCreationParser::new(program.clone())));
                        strategies.push(Box::new(BondingCurveParser::new(program.clone())));
                    }
                }
                "amm_pool" => {
                    for program in &group.programs {
                        strategies.push(Box::new(AmmPoolParser::new(program.clone())));
                    }
                }
                _ => external_programs.extend(group.programs.iter().cloned()),
            }
        }
        if !external_programs.is_empty() {
            strategies.push(Box::new(ExternalAmmParser::new(external_programs)));
        }
        ParserRegistry::new(strategies)
    }

    fn build_client_factory(config: &Config) -> Result<ClientFactory> {
        let endpoint = Url::parse(&config.upstream.endpoint)
            .map_err(|e| Error::Config(format!("upstream.endpoint: {e}")))?;
        let token = config.upstream.token.clone();
        Ok(Arc::new(move || {
            Box::new(WsStreamClient::new(endpoint.clone(), token.clone()))
        }))
    }

    fn build_orchestrator(
        config: &Config,
        store: Arc<SqliteStore>,
    ) -> Result<HolderAnalysisOrchestrator> {
        let api = &config.analysis.api;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(api.api_timeout_ms))
            .build()?;

        // One limiter per endpoint; the cap is per upstream service.
        let rpc_limiter = Arc::new(ApiRateLimiter::per_second(api.requests_per_second));
        let enhanced_limiter = Arc::new(ApiRateLimiter::per_second(api.requests_per_second));
        let complete_limiter = Arc::new(ApiRateLimiter::per_second(api.requests_per_second));

        let fetchers: Vec<Arc<dyn HolderFetcher>> = vec![
            Arc::new(RpcHolderFetcher::new(
                http.clone(),
                Url::parse(&api.rpc_url)
                    .map_err(|e| Error::Config(format!("analysis.api.rpc_url: {e}")))?,
                rpc_limiter,
                Duration::from_millis(api.api_timeout_ms),
            )),
            Arc::new(EnhancedHolderFetcher::new(
                http.clone(),
                Url::parse(&api.enhanced_url)
                    .map_err(|e| Error::Config(format!("analysis.api.enhanced_url: {e}")))?,
                enhanced_limiter,
                Duration::from_millis(api.api_timeout_ms),
            )),
            Arc::new(CompleteHolderFetcher::new(
                http.clone(),
                Url::parse(&api.complete_url)
                    .map_err(|e| Error::Config(format!("analysis.api.complete_url: {e}")))?,
                complete_limiter,
                api.page_size,
                api.max_pages,
                Duration::from_millis(api.enumeration_timeout_ms),
            )),
        ];

        let classifier: Option<Arc<dyn WalletClassifier>> = match &api.classifier_url {
            Some(raw) => {
                let url = Url::parse(raw)
                    .map_err(|e| Error::Config(format!("analysis.api.classifier_url: {e}")))?;
                let limiter = Arc::new(ApiRateLimiter::per_second(api.requests_per_second));
                Some(Arc::new(CachingClassifier::new(
                    Arc::new(HttpWalletClassifier::new(http, url, limiter)),
                    Duration::from_secs(api.classification_cache_ttl_minutes * 60),
                )))
            }
            None => None,
        };

        Ok(HolderAnalysisOrchestrator::new(
            store.clone(),
            store,
            Arc::new(TieredHolderSource::new(fetchers)),
            classifier,
            Arc::new(WeightedScoreCalculator::default()),
            AnalysisTuning {
                freshness: Duration::from_secs(config.analysis.freshness_minutes * 60),
                critical_market_cap_sol: config.analysis.critical_market_cap_sol,
                top_wallets: config.analysis.top_wallets,
            },
        ))
    }

    fn build_scheduler(
        config: &Config,
        queue: Arc<JobQueue>,
        store: Arc<SqliteStore>,
    ) -> JobScheduler {
        let scheduler = JobScheduler::new(queue);

        let options = AnalysisOptions {
            max_holders: config.analysis.max_holders,
            classify_wallets: config.analysis.classify_wallets,
            save_snapshot: config.analysis.save_snapshot,
            ..AnalysisOptions::default()
        };
        scheduler.register(ScheduledJob {
            id: "recurring-analysis".into(),
            every: Duration::from_secs(config.analysis.freshness_minutes * 60),
            payload: None,
            options: JobOptions::default(),
            enabled: true,
            source: Some(Arc::new(DueAnalysisSource {
                tokens: store.clone(),
                batch: config.jobs.batch_size,
                options,
            })),
        });
        scheduler.register(ScheduledJob {
            id: "trend-update".into(),
            every: Duration::from_secs(900),
            payload: None,
            options: JobOptions::default(),
            enabled: config.analysis.enable_trends,
            source: Some(Arc::new(TrendSource {
                tokens: store,
                batch: config.jobs.batch_size,
            })),
        });
        scheduler
    }

    /// Start every long-lived task and open the configured subscriptions.
    pub async fn start(&self) -> Result<()> {
        self.writer.start(&self.bus);
        self.tracker.start();
        self.manager.start();
        self.processor.start();
        self.scheduler.start();
        self.graduation.start();
        self.staleness.start();
        self.recovery.start();
        self.status.start();

        for group in &self.config.groups {
            let subscription = SubscriptionGroup {
                name: group.name.clone(),
                programs: group.programs.clone(),
                commitment: self.config.upstream.commitment,
                priority: group.priority,
            };
            self.subscribe_with_retries(subscription).await?;
        }

        info!(groups = self.config.groups.len(), "Daemon started");
        Ok(())
    }

    /// Open a subscription, retrying transient failures up to the pool's
    /// retry budget.
    async fn subscribe_with_retries(&self, group: SubscriptionGroup) -> Result<()> {
        let max_retries = self.config.pool.max_retries;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.manager.subscribe(group.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt <= max_retries => {
                    let delay = crate::core::retry::exponential_backoff_jittered(
                        Duration::from_secs(1),
                        Duration::from_secs(30),
                        attempt,
                    );
                    warn!(group = %group.name, attempt, error = %e, "Subscribe failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Orderly shutdown, stream side first so no new work arrives while
    /// the job system drains.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.manager.shutdown().await;
        self.scheduler.stop();
        self.processor
            .shutdown(Duration::from_millis(self.config.jobs.shutdown_drain_ms))
            .await;
        self.status.stop();
        self.recovery.stop();
        self.staleness.stop();
        self.graduation.stop();
        self.tracker.stop();
        self.writer.stop();
        let stats = self.queue.stats();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            pending = stats.waiting + stats.delayed,
            "Daemon stopped"
        );
    }
}
