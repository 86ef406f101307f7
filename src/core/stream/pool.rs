//! Connection pool for upstream streaming slots.
//!
//! The pool owns connection identity, priority class, status, and rolling
//! metrics. Callers acquire a connection slot for a monitor's priority
//! class; scoring prefers the least-loaded connection whose class is at
//! least as high as the request's. The pool grows on demand up to
//! `max_connections` and fails with `PoolExhausted` beyond that.
//!
//! Health checking is strictly passive: staleness and error-rate
//! thresholds mark a connection unhealthy, and recovery happens when real
//! traffic succeeds again. Health checks never create upstream
//! subscriptions — those would count against the subscription rate cap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::app::ConnectionPoolConfig;
use crate::core::bus::{BusEvent, EventBus};
use crate::core::domain::ConnectionId;
use crate::error::{Error, Result};

/// Priority class of a connection or a monitor request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Rank, lower is higher priority.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Connection lifecycle status.
///
/// `idle → active (acquire) → idle (release)`; metrics may push a
/// connection to `unhealthy`, real traffic succeeding brings it back;
/// `disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Active,
    Unhealthy,
    Disconnected,
}

/// Rolling per-connection metrics.
#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub requests_per_second: f64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub active_subscriptions: usize,
    pub bytes_processed: u64,
    pub last_used: Instant,
    pub last_health_check: Instant,
    // Tallies accumulated between health ticks.
    window_requests: u64,
    window_errors: u64,
    window_bytes: u64,
}

impl ConnectionMetrics {
    fn new(now: Instant) -> Self {
        Self {
            requests_per_second: 0.0,
            avg_latency_ms: 0.0,
            error_rate: 0.0,
            active_subscriptions: 0,
            bytes_processed: 0,
            last_used: now,
            last_health_check: now,
            window_requests: 0,
            window_errors: 0,
            window_bytes: 0,
        }
    }
}

const LATENCY_EMA_ALPHA: f64 = 0.1;

// Normalization ceilings for the load score components.
const TPS_CEILING: f64 = 100.0;
const LATENCY_CEILING_MS: f64 = 1_000.0;
const BYTES_PER_SEC_CEILING: f64 = 1_048_576.0;

/// Penalty applied when a connection's class is lower than the request's.
const PRIORITY_PENALTY: f64 = 1_000.0;

/// Weighted load in `[0, 100]`: tps 40%, latency 30%, errors 20%, bytes 10%.
fn load_score(m: &ConnectionMetrics, bytes_per_sec: f64) -> f64 {
    let tps = (m.requests_per_second / TPS_CEILING).min(1.0);
    let latency = (m.avg_latency_ms / LATENCY_CEILING_MS).min(1.0);
    let errors = m.error_rate.clamp(0.0, 1.0);
    let bytes = (bytes_per_sec / BYTES_PER_SEC_CEILING).min(1.0);
    (tps * 0.4 + latency * 0.3 + errors * 0.2 + bytes * 0.1) * 100.0
}

struct PooledConnection {
    id: ConnectionId,
    priority: Priority,
    status: ConnectionStatus,
    metrics: ConnectionMetrics,
    created_at: Instant,
    bytes_per_sec: f64,
}

impl PooledConnection {
    fn new(id: ConnectionId, priority: Priority) -> Self {
        let now = Instant::now();
        Self {
            id,
            priority,
            status: ConnectionStatus::Idle,
            metrics: ConnectionMetrics::new(now),
            created_at: now,
            bytes_per_sec: 0.0,
        }
    }

    fn score_for(&self, requested: Priority) -> f64 {
        let mut score = load_score(&self.metrics, self.bytes_per_sec);
        if self.priority.rank() > requested.rank() {
            score += PRIORITY_PENALTY;
        }
        score
    }
}

/// Point-in-time view of one connection, for `stats()`.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub priority: Priority,
    pub status: ConnectionStatus,
    pub load: f64,
    pub requests_per_second: f64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub active_subscriptions: usize,
    pub bytes_processed: u64,
    pub age: Duration,
}

/// Aggregate pool statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub active: usize,
    pub unhealthy: usize,
    pub disconnected: usize,
    pub connections: Vec<ConnectionSnapshot>,
}

/// Priority-aware pool of upstream connection slots.
pub struct ConnectionPool {
    config: ConnectionPoolConfig,
    bus: Arc<EventBus>,
    inner: Mutex<HashMap<ConnectionId, PooledConnection>>,
    next_id: AtomicU64,
    health_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(config: ConnectionPoolConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            bus,
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            health_task: Mutex::new(None),
        }
    }

    /// Create the minimum connection set and start the health task.
    ///
    /// The first connection is `high` priority, the rest `medium`.
    pub fn initialize(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            for i in 0..self.config.min_connections {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                let priority = if i == 0 { Priority::High } else { Priority::Medium };
                inner.insert(id, PooledConnection::new(id, priority));
                debug!(connection_id = id, priority = priority.as_str(), "Connection slot created");
            }
        }

        let pool = Arc::clone(self);
        let interval = Duration::from_millis(self.config.health_check_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pool.run_health_check(interval);
            }
        });
        *self.health_task.lock() = Some(handle);

        info!(
            min_connections = self.config.min_connections,
            max_connections = self.config.max_connections,
            "Connection pool initialized"
        );
    }

    /// Acquire the best connection slot for a monitor of the given class.
    ///
    /// Scores every candidate (lowest wins) with a priority penalty for
    /// class mismatches; grows the pool when every candidate is out of
    /// service and capacity remains.
    pub fn acquire(&self, requested: Priority) -> Result<ConnectionId> {
        let mut inner = self.inner.lock();

        let best = inner
            .values()
            .filter(|c| matches!(c.status, ConnectionStatus::Idle | ConnectionStatus::Active))
            .map(|c| (c.id, c.score_for(requested)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let id = match best {
            Some((id, score)) => {
                debug!(connection_id = id, score, priority = requested.as_str(), "Connection acquired");
                id
            }
            None => {
                let total = inner.len();
                if total >= self.config.max_connections {
                    return Err(Error::PoolExhausted(total));
                }
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                inner.insert(id, PooledConnection::new(id, requested));
                info!(connection_id = id, priority = requested.as_str(), "Connection slot grown");
                id
            }
        };

        let conn = inner.get_mut(&id).expect("connection just selected");
        conn.status = ConnectionStatus::Active;
        conn.metrics.last_used = Instant::now();
        Ok(id)
    }

    /// Deadline for establishing a transport connection.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.config.connection_timeout_ms)
    }

    /// Retry budget for opening a subscription.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Mark a specific connection active, e.g. as a migration target chosen
    /// by the load balancer rather than by `acquire` scoring.
    pub fn mark_active(&self, id: ConnectionId) {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.get_mut(&id) {
            if conn.status != ConnectionStatus::Disconnected {
                conn.status = ConnectionStatus::Active;
                conn.metrics.last_used = Instant::now();
            }
        }
    }

    /// Return a connection to idle once its subscriptions are gone.
    pub fn release(&self, id: ConnectionId) {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.get_mut(&id) {
            if conn.status == ConnectionStatus::Active && conn.metrics.active_subscriptions == 0 {
                conn.status = ConnectionStatus::Idle;
                conn.metrics.last_used = Instant::now();
            }
        }
    }

    /// Feed traffic outcomes into the rolling metrics.
    ///
    /// Successful traffic on an unhealthy connection is the recovery path.
    pub fn record_traffic(&self, id: ConnectionId, success: bool, latency_ms: f64, bytes: u64) {
        let mut recovered = false;
        {
            let mut inner = self.inner.lock();
            let Some(conn) = inner.get_mut(&id) else { return };

            let m = &mut conn.metrics;
            m.window_requests += 1;
            if !success {
                m.window_errors += 1;
            }
            m.window_bytes += bytes;
            m.bytes_processed += bytes;
            m.avg_latency_ms = if m.avg_latency_ms == 0.0 {
                latency_ms
            } else {
                m.avg_latency_ms * (1.0 - LATENCY_EMA_ALPHA) + latency_ms * LATENCY_EMA_ALPHA
            };
            m.last_used = Instant::now();

            if success && conn.status == ConnectionStatus::Unhealthy {
                conn.status = if m.active_subscriptions > 0 {
                    ConnectionStatus::Active
                } else {
                    ConnectionStatus::Idle
                };
                recovered = true;
            }
        }
        if recovered {
            info!(connection_id = id, "Connection recovered");
            self.bus.publish(&BusEvent::ConnectionRecovered { connection_id: id });
        }
    }

    /// Keep the pool's subscription count in step with group assignment.
    pub fn set_subscription_count(&self, id: ConnectionId, count: usize) {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.get_mut(&id) {
            conn.metrics.active_subscriptions = count;
        }
    }

    /// Mark a connection as terminally failed.
    pub fn mark_disconnected(&self, id: ConnectionId, reason: &str) {
        let mut changed = false;
        {
            let mut inner = self.inner.lock();
            if let Some(conn) = inner.get_mut(&id) {
                if conn.status != ConnectionStatus::Disconnected {
                    conn.status = ConnectionStatus::Disconnected;
                    changed = true;
                }
            }
        }
        if changed {
            warn!(connection_id = id, reason, "Connection disconnected");
            self.bus.publish(&BusEvent::ConnectionFailed {
                connection_id: id,
                reason: reason.to_string(),
            });
        }
    }

    fn run_health_check(&self, interval: Duration) {
        let stale_after = Duration::from_millis(self.config.stale_after_ms);
        let secs = interval.as_secs_f64().max(0.001);
        let mut newly_unhealthy = Vec::new();

        {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            for conn in inner.values_mut() {
                let m = &mut conn.metrics;
                m.requests_per_second = m.window_requests as f64 / secs;
                conn.bytes_per_sec = m.window_bytes as f64 / secs;
                m.error_rate = if m.window_requests > 0 {
                    m.window_errors as f64 / m.window_requests as f64
                } else {
                    // Decay toward clean when no traffic arrived.
                    m.error_rate * 0.5
                };
                m.window_requests = 0;
                m.window_errors = 0;
                m.window_bytes = 0;
                m.last_health_check = now;

                if conn.status == ConnectionStatus::Idle
                    && now.duration_since(m.last_used) > stale_after
                {
                    conn.status = ConnectionStatus::Unhealthy;
                    newly_unhealthy.push((conn.id, "stale".to_string()));
                } else if matches!(conn.status, ConnectionStatus::Idle | ConnectionStatus::Active)
                    && m.error_rate > self.config.max_error_rate
                {
                    conn.status = ConnectionStatus::Unhealthy;
                    newly_unhealthy.push((conn.id, format!("error rate {:.2}", m.error_rate)));
                }
            }
        }

        for (id, reason) in newly_unhealthy {
            warn!(connection_id = id, reason = %reason, "Connection marked unhealthy");
            self.bus.publish(&BusEvent::ConnectionUnhealthy {
                connection_id: id,
                reason,
            });
        }
    }

    /// Snapshot of the pool.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        let now = Instant::now();
        let mut stats = PoolStats {
            total: inner.len(),
            ..PoolStats::default()
        };
        for conn in inner.values() {
            match conn.status {
                ConnectionStatus::Idle => stats.idle += 1,
                ConnectionStatus::Active => stats.active += 1,
                ConnectionStatus::Unhealthy => stats.unhealthy += 1,
                ConnectionStatus::Disconnected => stats.disconnected += 1,
            }
            stats.connections.push(ConnectionSnapshot {
                id: conn.id,
                priority: conn.priority,
                status: conn.status,
                load: load_score(&conn.metrics, conn.bytes_per_sec),
                requests_per_second: conn.metrics.requests_per_second,
                avg_latency_ms: conn.metrics.avg_latency_ms,
                error_rate: conn.metrics.error_rate,
                active_subscriptions: conn.metrics.active_subscriptions,
                bytes_processed: conn.metrics.bytes_processed,
                age: now.duration_since(conn.created_at),
            });
        }
        stats.connections.sort_by_key(|c| c.id);
        stats
    }

    /// Stop timers, drop slots, clear the map. Terminal.
    pub fn shutdown(&self) {
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
        let mut inner = self.inner.lock();
        for conn in inner.values_mut() {
            conn.status = ConnectionStatus::Disconnected;
        }
        inner.clear();
        info!("Connection pool shut down");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
    }
}
