//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file with environment variable
//! overrides for sensitive values like `MINTSTREAM_UPSTREAM_TOKEN`.

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::domain::CommitmentLevel;
use crate::core::stream::Priority;
use crate::error::{Error, Result};

/// Upstream streaming endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Websocket endpoint URL.
    pub endpoint: String,
    /// Auth token; overridable via `MINTSTREAM_UPSTREAM_TOKEN`.
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub commitment: CommitmentLevel,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://stream.example.com/v1".into(),
            token: String::new(),
            commitment: CommitmentLevel::Processed,
        }
    }
}

/// One subscription group: a named program set with a priority class.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub programs: Vec<String>,
    #[serde(default = "default_group_priority")]
    pub priority: Priority,
}

fn default_group_priority() -> Priority {
    Priority::Medium
}

fn default_groups() -> Vec<GroupConfig> {
    vec![
        GroupConfig {
            name: "bonding_curve".into(),
            programs: vec!["6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P".into()],
            priority: Priority::High,
        },
        GroupConfig {
            name: "amm_pool".into(),
            programs: vec!["pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA".into()],
            priority: Priority::Medium,
        },
        GroupConfig {
            name: "external_amm".into(),
            programs: vec!["675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8".into()],
            priority: Priority::Low,
        },
    ]
}

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Error rate beyond which a connection is marked unhealthy.
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    /// Idle time after which a connection is considered stale.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

fn default_max_connections() -> usize {
    3
}
fn default_min_connections() -> usize {
    2
}
fn default_health_check_interval_ms() -> u64 {
    30_000
}
fn default_connection_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_error_rate() -> f64 {
    0.5
}
fn default_stale_after_ms() -> u64 {
    300_000
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            health_check_interval_ms: default_health_check_interval_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            max_retries: default_max_retries(),
            max_error_rate: default_max_error_rate(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

/// Subscription rate limiter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,
    #[serde(default = "default_time_window_ms")]
    pub time_window_ms: u64,
}

fn default_max_subscriptions() -> usize {
    100
}
fn default_time_window_ms() -> u64 {
    60_000
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: default_max_subscriptions(),
            time_window_ms: default_time_window_ms(),
        }
    }
}

/// Load balancer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: f64,
    #[serde(default = "default_min_rebalance_interval_ms")]
    pub min_rebalance_interval_ms: u64,
    #[serde(default = "default_load_calculation_interval_ms")]
    pub load_calculation_interval_ms: u64,
    #[serde(default = "default_rebalance_scan_interval_ms")]
    pub rebalance_scan_interval_ms: u64,
    #[serde(default = "default_migration_batch_size")]
    pub migration_batch_size: usize,
    #[serde(default = "default_target_load_ratio")]
    pub target_load_ratio: f64,
}

fn default_rebalance_threshold() -> f64 {
    30.0
}
fn default_min_rebalance_interval_ms() -> u64 {
    60_000
}
fn default_load_calculation_interval_ms() -> u64 {
    5_000
}
fn default_rebalance_scan_interval_ms() -> u64 {
    10_000
}
fn default_migration_batch_size() -> usize {
    2
}
fn default_target_load_ratio() -> f64 {
    0.7
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            rebalance_threshold: default_rebalance_threshold(),
            min_rebalance_interval_ms: default_min_rebalance_interval_ms(),
            load_calculation_interval_ms: default_load_calculation_interval_ms(),
            rebalance_scan_interval_ms: default_rebalance_scan_interval_ms(),
            migration_batch_size: default_migration_batch_size(),
            target_load_ratio: default_target_load_ratio(),
        }
    }
}

/// Stream manager settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Bounded per-group channel size between demux and parsers.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// How long a migration waits for the target's first message before
    /// closing the old subscription anyway.
    #[serde(default = "default_migration_overlap_timeout_ms")]
    pub migration_overlap_timeout_ms: u64,
    #[serde(default = "default_resubscribe_base_ms")]
    pub resubscribe_base_ms: u64,
    #[serde(default = "default_resubscribe_cap_ms")]
    pub resubscribe_cap_ms: u64,
    #[serde(default = "default_dedup_ttl_ms")]
    pub dedup_ttl_ms: u64,
    #[serde(default = "default_dedup_max_entries")]
    pub dedup_max_entries: usize,
}

fn default_channel_capacity() -> usize {
    1_024
}
fn default_migration_overlap_timeout_ms() -> u64 {
    2_000
}
fn default_resubscribe_base_ms() -> u64 {
    1_000
}
fn default_resubscribe_cap_ms() -> u64 {
    30_000
}
fn default_dedup_ttl_ms() -> u64 {
    120_000
}
fn default_dedup_max_entries() -> usize {
    100_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            migration_overlap_timeout_ms: default_migration_overlap_timeout_ms(),
            resubscribe_base_ms: default_resubscribe_base_ms(),
            resubscribe_cap_ms: default_resubscribe_cap_ms(),
            dedup_ttl_ms: default_dedup_ttl_ms(),
            dedup_max_entries: default_dedup_max_entries(),
        }
    }
}

/// Job system settings.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_worker_idle_timeout_ms")]
    pub worker_idle_timeout_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between per-mint calls inside a batch job.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_shutdown_drain_ms")]
    pub shutdown_drain_ms: u64,
}

fn default_max_workers() -> usize {
    3
}
fn default_worker_idle_timeout_ms() -> u64 {
    300_000
}
fn default_batch_size() -> usize {
    10
}
fn default_batch_delay_ms() -> u64 {
    500
}
fn default_shutdown_drain_ms() -> u64 {
    30_000
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            worker_idle_timeout_ms: default_worker_idle_timeout_ms(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            shutdown_drain_ms: default_shutdown_drain_ms(),
        }
    }
}

/// External holder-data API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HolderApiConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_enhanced_url")]
    pub enhanced_url: String,
    #[serde(default = "default_complete_url")]
    pub complete_url: String,
    /// Wallet classifier endpoint; classification is skipped when unset.
    #[serde(default)]
    pub classifier_url: Option<String>,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,
    #[serde(default = "default_enumeration_timeout_ms")]
    pub enumeration_timeout_ms: u64,
    #[serde(default = "default_classification_cache_ttl_minutes")]
    pub classification_cache_ttl_minutes: u64,
}

fn default_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".into()
}
fn default_enhanced_url() -> String {
    "https://api.example.com/enhanced/".into()
}
fn default_complete_url() -> String {
    "https://api.example.com/complete/".into()
}
fn default_requests_per_second() -> usize {
    10
}
fn default_page_size() -> usize {
    1_000
}
fn default_max_pages() -> u32 {
    20
}
fn default_api_timeout_ms() -> u64 {
    30_000
}
fn default_enumeration_timeout_ms() -> u64 {
    60_000
}
fn default_classification_cache_ttl_minutes() -> u64 {
    1_440
}

impl Default for HolderApiConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            enhanced_url: default_enhanced_url(),
            complete_url: default_complete_url(),
            classifier_url: None,
            requests_per_second: default_requests_per_second(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            api_timeout_ms: default_api_timeout_ms(),
            enumeration_timeout_ms: default_enumeration_timeout_ms(),
            classification_cache_ttl_minutes: default_classification_cache_ttl_minutes(),
        }
    }
}

/// Holder analysis settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_holders")]
    pub max_holders: usize,
    #[serde(default = "default_true")]
    pub classify_wallets: bool,
    #[serde(default = "default_true")]
    pub enable_trends: bool,
    #[serde(default = "default_true")]
    pub save_snapshot: bool,
    #[serde(default = "default_freshness_minutes")]
    pub freshness_minutes: u64,
    #[serde(default = "default_top_wallets")]
    pub top_wallets: usize,
    /// Market cap above which a token refreshes twice as often.
    #[serde(default = "default_critical_market_cap_sol")]
    pub critical_market_cap_sol: Decimal,
    #[serde(default)]
    pub api: HolderApiConfig,
}

fn default_max_holders() -> usize {
    1_000
}
fn default_true() -> bool {
    true
}
fn default_freshness_minutes() -> u64 {
    60
}
fn default_top_wallets() -> usize {
    100
}
fn default_critical_market_cap_sol() -> Decimal {
    Decimal::from(1_000)
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_holders: default_max_holders(),
            classify_wallets: true,
            enable_trends: true,
            save_snapshot: true,
            freshness_minutes: default_freshness_minutes(),
            top_wallets: default_top_wallets(),
            critical_market_cap_sol: default_critical_market_cap_sol(),
            api: HolderApiConfig::default(),
        }
    }
}

/// One staleness tier in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StalenessTierConfig {
    pub min_market_cap_sol: Decimal,
    pub max_quiet_minutes: u64,
}

/// Staleness scan settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StalenessConfig {
    #[serde(default = "default_staleness_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Empty means the built-in tiers.
    #[serde(default)]
    pub tiers: Vec<StalenessTierConfig>,
}

fn default_staleness_scan_interval_ms() -> u64 {
    60_000
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_staleness_scan_interval_ms(),
            tiers: Vec::new(),
        }
    }
}

/// Background service cadences.
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_graduation_scan_interval_ms")]
    pub graduation_scan_interval_ms: u64,
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,
    #[serde(default = "default_recovery_max_slots_per_run")]
    pub recovery_max_slots_per_run: usize,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
}

fn default_graduation_scan_interval_ms() -> u64 {
    600_000
}
fn default_recovery_interval_ms() -> u64 {
    300_000
}
fn default_recovery_max_slots_per_run() -> usize {
    500
}
fn default_status_interval_ms() -> u64 {
    60_000
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            graduation_scan_interval_ms: default_graduation_scan_interval_ms(),
            recovery_interval_ms: default_recovery_interval_ms(),
            recovery_max_slots_per_run: default_recovery_max_slots_per_run(),
            status_interval_ms: default_status_interval_ms(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite path; overridable via `DATABASE_URL`.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_database_url() -> String {
    "mintstream.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub groups: Vec<GroupConfig>,
    pub pool: ConnectionPoolConfig,
    pub limiter: RateLimiterConfig,
    pub balancer: LoadBalancerConfig,
    pub stream: StreamConfig,
    pub jobs: JobsConfig,
    pub analysis: AnalysisConfig,
    pub staleness: StalenessConfig,
    pub services: ServicesConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            groups: default_groups(),
            pool: ConnectionPoolConfig::default(),
            limiter: RateLimiterConfig::default(),
            balancer: LoadBalancerConfig::default(),
            stream: StreamConfig::default(),
            jobs: JobsConfig::default(),
            analysis: AnalysisConfig::default(),
            staleness: StalenessConfig::default(),
            services: ServicesConfig::default(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file (defaults when missing) and apply env
    /// overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))?
        } else {
            Config::default()
        };

        if let Ok(token) = std::env::var("MINTSTREAM_UPSTREAM_TOKEN") {
            config.upstream.token = token;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.store.database_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sanity checks; configuration errors are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.upstream.endpoint)
            .map_err(|e| Error::Config(format!("upstream.endpoint: {e}")))?;
        if self.pool.min_connections == 0 {
            return Err(Error::Config("pool.min_connections must be at least 1".into()));
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(Error::Config(
                "pool.min_connections exceeds pool.max_connections".into(),
            ));
        }
        if self.limiter.max_subscriptions == 0 {
            return Err(Error::Config("limiter.max_subscriptions must be positive".into()));
        }
        if self.groups.is_empty() {
            return Err(Error::Config("at least one subscription group is required".into()));
        }
        for group in &self.groups {
            if group.programs.is_empty() {
                return Err(Error::Config(format!(
                    "group {} has no program identifiers",
                    group.name
                )));
            }
        }
        if self.jobs.max_workers == 0 {
            return Err(Error::Config("jobs.max_workers must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.balancer.target_load_ratio) {
            return Err(Error::Config("balancer.target_load_ratio must be in [0, 1]".into()));
        }
        Ok(())
    }

    /// Install the global tracing subscriber.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log.level.clone()));
        if self.log.json {
            fmt().with_env_filter(filter).json().init();
        } else {
            fmt().with_env_filter(filter).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.max_connections, 3);
        assert_eq!(config.pool.min_connections, 2);
        assert_eq!(config.limiter.max_subscriptions, 100);
        assert_eq!(config.balancer.rebalance_threshold, 30.0);
        assert_eq!(config.jobs.max_workers, 3);
        assert_eq!(config.groups.len(), 3);
    }

    #[test]
    fn toml_overrides_defaults() {
        let raw = r#"
            [upstream]
            endpoint = "wss://grpc.example.org/stream"
            token = "secret"

            [pool]
            max_connections = 5

            [balancer]
            rebalance_threshold = 25.0
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.upstream.endpoint, "wss://grpc.example.org/stream");
        assert_eq!(config.pool.max_connections, 5);
        assert_eq!(config.pool.min_connections, 2, "untouched defaults survive");
        assert_eq!(config.balancer.rebalance_threshold, 25.0);
    }

    #[test]
    fn invalid_pool_bounds_rejected() {
        let mut config = Config::default();
        config.pool.min_connections = 5;
        config.pool.max_connections = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_group_programs_rejected() {
        let mut config = Config::default();
        config.groups[0].programs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_endpoint_rejected() {
        let mut config = Config::default();
        config.upstream.endpoint = "not a url".into();
        assert!(config.validate().is_err());
    }
}
