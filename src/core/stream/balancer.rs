//! Per-connection load tracking and rebalance planning.
//!
//! The balancer accumulates message timings per connection, computes a
//! weighted load in `[0, 100]` every calculation tick, and periodically
//! plans migrations from overloaded connections (> 70) to underloaded
//! ones (< 40) when the spread strictly exceeds the rebalance threshold.
//! It only ever *emits* [`MigrationRequest`]s; execution belongs to the
//! stream manager.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::app::LoadBalancerConfig;
use crate::core::domain::ConnectionId;

const LATENCY_EMA_ALPHA: f64 = 0.1;
const TPS_WINDOW: Duration = Duration::from_secs(5);
const SAMPLE_HISTORY: usize = 12;

const UNDERLOAD_THRESHOLD: f64 = 40.0;

// Normalization ceilings, matching the pool's acquire-time scoring.
const TPS_CEILING: f64 = 100.0;
const LATENCY_CEILING_MS: f64 = 1_000.0;
const BYTES_PER_SEC_CEILING: f64 = 1_048_576.0;

/// A request to move one subscription group between connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub group: String,
    pub from: ConnectionId,
    pub to: ConnectionId,
    pub reason: String,
}

/// One load sample in a connection's bounded history.
#[derive(Debug, Clone, Copy)]
pub struct LoadSample {
    pub at: Instant,
    pub tps: f64,
    pub latency_ms: f64,
    pub error_rate: f64,
    pub bytes_per_sec: f64,
    pub load: f64,
}

/// Snapshot of one connection's load state.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadSnapshot {
    pub load: f64,
    pub tps: f64,
    pub latency_ms: f64,
    pub error_rate: f64,
    pub bytes_per_sec: f64,
    pub subscriptions: usize,
}

#[derive(Default)]
struct ConnLoad {
    latency_ema_ms: f64,
    /// Completion instants inside the tps window.
    completions: VecDeque<Instant>,
    /// (instant, bytes) pairs inside the tps window.
    bytes: VecDeque<(Instant, u64)>,
    errors: u64,
    total: u64,
    in_flight: HashMap<u64, Instant>,
    subscriptions: usize,
    history: VecDeque<LoadSample>,
    load: f64,
}

impl ConnLoad {
    fn prune(&mut self, now: Instant) {
        while self
            .completions
            .front()
            .is_some_and(|t| now.duration_since(*t) >= TPS_WINDOW)
        {
            self.completions.pop_front();
        }
        while self
            .bytes
            .front()
            .is_some_and(|(t, _)| now.duration_since(*t) >= TPS_WINDOW)
        {
            self.bytes.pop_front();
        }
    }

    fn tps(&mut self, now: Instant) -> f64 {
        self.prune(now);
        self.completions.len() as f64 / TPS_WINDOW.as_secs_f64()
    }

    fn bytes_per_sec(&mut self, now: Instant) -> f64 {
        self.prune(now);
        self.bytes.iter().map(|(_, b)| *b).sum::<u64>() as f64 / TPS_WINDOW.as_secs_f64()
    }

    fn error_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.errors as f64 / self.total as f64
        }
    }
}

/// Weighted load: tps 40%, latency 30%, errors 20%, bytes 10%.
fn weighted_load(tps: f64, latency_ms: f64, error_rate: f64, bytes_per_sec: f64) -> f64 {
    let tps_n = (tps / TPS_CEILING).min(1.0);
    let lat_n = (latency_ms / LATENCY_CEILING_MS).min(1.0);
    let err_n = error_rate.clamp(0.0, 1.0);
    let bytes_n = (bytes_per_sec / BYTES_PER_SEC_CEILING).min(1.0);
    ((tps_n * 0.4 + lat_n * 0.3 + err_n * 0.2 + bytes_n * 0.1) * 100.0).clamp(0.0, 100.0)
}

/// Load balancer over the pool's connections.
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    conns: Mutex<HashMap<ConnectionId, ConnLoad>>,
    last_rebalance: Mutex<Option<Instant>>,
}

impl LoadBalancer {
    pub fn new(config: LoadBalancerConfig) -> Self {
        Self {
            config,
            conns: Mutex::new(HashMap::new()),
            last_rebalance: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    /// Start tracking a connection.
    pub fn register_connection(&self, id: ConnectionId) {
        self.conns.lock().entry(id).or_default();
    }

    /// Stop tracking a connection.
    pub fn remove_connection(&self, id: ConnectionId) {
        self.conns.lock().remove(&id);
    }

    /// Note an inbound message beginning processing.
    pub fn record_message_start(&self, id: ConnectionId, msg_id: u64) {
        let mut conns = self.conns.lock();
        let conn = conns.entry(id).or_default();
        conn.in_flight.insert(msg_id, Instant::now());
    }

    /// Note a message finishing processing.
    pub fn record_message_complete(&self, id: ConnectionId, msg_id: u64, success: bool, bytes: u64) {
        let now = Instant::now();
        let mut conns = self.conns.lock();
        let conn = conns.entry(id).or_default();

        if let Some(started) = conn.in_flight.remove(&msg_id) {
            let latency_ms = now.duration_since(started).as_secs_f64() * 1_000.0;
            conn.latency_ema_ms = if conn.latency_ema_ms == 0.0 {
                latency_ms
            } else {
                conn.latency_ema_ms * (1.0 - LATENCY_EMA_ALPHA) + latency_ms * LATENCY_EMA_ALPHA
            };
        }
        conn.completions.push_back(now);
        conn.bytes.push_back((now, bytes));
        conn.total += 1;
        if !success {
            conn.errors += 1;
        }
        conn.prune(now);
    }

    pub fn update_subscription_count(&self, id: ConnectionId, count: usize) {
        let mut conns = self.conns.lock();
        conns.entry(id).or_default().subscriptions = count;
    }

    /// Recompute every connection's load and append to its history.
    ///
    /// Called on the load-calculation cadence.
    pub fn tick_load_calculation(&self) {
        let now = Instant::now();
        let mut conns = self.conns.lock();
        for (id, conn) in conns.iter_mut() {
            let tps = conn.tps(now);
            let bytes_per_sec = conn.bytes_per_sec(now);
            let load = weighted_load(tps, conn.latency_ema_ms, conn.error_rate(), bytes_per_sec);
            conn.load = load;
            conn.history.push_back(LoadSample {
                at: now,
                tps,
                latency_ms: conn.latency_ema_ms,
                error_rate: conn.error_rate(),
                bytes_per_sec,
                load,
            });
            while conn.history.len() > SAMPLE_HISTORY {
                conn.history.pop_front();
            }
            debug!(connection_id = *id, load, tps, "Load sample");
        }
    }

    /// Current per-connection snapshots.
    pub fn metrics(&self) -> HashMap<ConnectionId, LoadSnapshot> {
        let now = Instant::now();
        let mut conns = self.conns.lock();
        conns
            .iter_mut()
            .map(|(id, c)| {
                let tps = c.tps(now);
                let bytes_per_sec = c.bytes_per_sec(now);
                (
                    *id,
                    LoadSnapshot {
                        load: c.load,
                        tps,
                        latency_ms: c.latency_ema_ms,
                        error_rate: c.error_rate(),
                        bytes_per_sec,
                        subscriptions: c.subscriptions,
                    },
                )
            })
            .collect()
    }

    /// Project a connection's load one calculation interval ahead using the
    /// slope of its recent history.
    pub fn predict_load(&self, id: ConnectionId) -> Option<f64> {
        let conns = self.conns.lock();
        let conn = conns.get(&id)?;
        let n = conn.history.len();
        if n < 2 {
            return Some(conn.load);
        }
        let first = conn.history.front().expect("history non-empty");
        let last = conn.history.back().expect("history non-empty");
        let span = last.at.duration_since(first.at).as_secs_f64();
        if span <= 0.0 {
            return Some(conn.load);
        }
        let slope = (last.load - first.load) / span;
        let horizon = Duration::from_millis(self.config.load_calculation_interval_ms).as_secs_f64();
        Some((last.load + slope * horizon).clamp(0.0, 100.0))
    }

    /// Plan migrations for the current load distribution.
    ///
    /// `assignments` maps each group to its current connection. Returns at
    /// most `migration_batch_size` requests per call. Honors the strict
    /// spread threshold and the minimum rebalance interval unless `force`.
    pub fn plan_rebalance(
        &self,
        assignments: &HashMap<String, ConnectionId>,
        force: bool,
    ) -> Vec<MigrationRequest> {
        let now = Instant::now();
        if !force {
            let last = self.last_rebalance.lock();
            if let Some(at) = *last {
                if now.duration_since(at) < Duration::from_millis(self.config.min_rebalance_interval_ms) {
                    return Vec::new();
                }
            }
        }

        let loads: Vec<(ConnectionId, f64, f64)> = {
            let mut conns = self.conns.lock();
            conns
                .iter_mut()
                .map(|(id, c)| (*id, c.load, c.tps(now)))
                .collect()
        };
        if loads.len() < 2 {
            return Vec::new();
        }

        let max = loads.iter().map(|(_, l, _)| *l).fold(f64::MIN, f64::max);
        let min = loads.iter().map(|(_, l, _)| *l).fold(f64::MAX, f64::min);
        let spread = max - min;
        if !force && spread <= self.config.rebalance_threshold {
            return Vec::new();
        }

        // Overloaded sources, highest tps first (tie-break on equal spread).
        let overload = self.config.target_load_ratio * 100.0;
        let mut sources: Vec<_> = loads
            .iter()
            .filter(|(_, l, _)| *l > overload || (force && *l >= max))
            .cloned()
            .collect();
        sources.sort_by(|a, b| b.2.total_cmp(&a.2).then(b.1.total_cmp(&a.1)));

        let mut targets: Vec<_> = loads
            .iter()
            .filter(|(_, l, _)| *l < UNDERLOAD_THRESHOLD || (force && *l <= min))
            .cloned()
            .collect();
        targets.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut requests = Vec::new();
        let mut moved_groups: Vec<&String> = Vec::new();
        'outer: for (from, load, _tps) in &sources {
            for (to, target_load, _) in &targets {
                if from == to {
                    continue;
                }
                // First group still assigned to the source and not already planned.
                let group = assignments
                    .iter()
                    .filter(|(g, c)| **c == *from && !moved_groups.contains(g))
                    .map(|(g, _)| g)
                    .min();
                let Some(group) = group else { continue };

                moved_groups.push(group);
                requests.push(MigrationRequest {
                    group: group.clone(),
                    from: *from,
                    to: *to,
                    reason: format!(
                        "load spread {:.1} > {:.1} (source {:.1}, target {:.1})",
                        spread, self.config.rebalance_threshold, load, target_load
                    ),
                });
                if requests.len() >= self.config.migration_batch_size {
                    break 'outer;
                }
            }
        }

        if !requests.is_empty() {
            *self.last_rebalance.lock() = Some(now);
            info!(migrations = requests.len(), spread, "Rebalance planned");
        }
        requests
    }

    /// Plan a rebalance ignoring threshold and interval gates.
    pub fn force_rebalance(&self, assignments: &HashMap<String, ConnectionId>) -> Vec<MigrationRequest> {
        self.plan_rebalance(assignments, true)
    }
}
