//! Application orchestration: configuration and daemon wiring.

mod config;
mod daemon;

pub use config::{
    AnalysisConfig, Config, ConnectionPoolConfig, GroupConfig, HolderApiConfig, JobsConfig,
    LoadBalancerConfig, LogConfig, RateLimiterConfig, ServicesConfig, StalenessConfig,
    StalenessTierConfig, StoreConfig, StreamConfig, UpstreamConfig,
};
pub use daemon::Daemon;
