//! Stream manager: composes the rate limiter, connection pool, subscription
//! builder, and load balancer into the subscribe/unsubscribe/migrate surface.
//!
//! # Architecture
//!
//! Each pooled connection is driven by a *connection actor*: a tokio task
//! that owns the transport client, applies subscribe/unsubscribe commands,
//! reads inbound messages, and routes them to bounded per-group channels by
//! the filter names the upstream echoes back. Parser workers drain the
//! group channels and publish domain events on the bus.
//!
//! A full group channel pauses the actor's read loop (upstream flow
//! control) instead of dropping messages. Stream errors trigger a
//! reconnect-and-resubscribe cycle under capped exponential backoff; every
//! re-subscription counts against the rate limiter.
//!
//! Migration opens the new subscription first, waits for its first routed
//! message (or a short timeout), then closes the old one. Duplicates during
//! the overlap are dropped downstream by `(signature, slot)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::balancer::{LoadBalancer, LoadSnapshot, MigrationRequest};
use super::client::{ClientFactory, StreamClient};
use super::dedup::TradeDeduplicator;
use super::pool::{ConnectionPool, PoolStats};
use super::rate_limiter::SubscriptionRateLimiter;
use super::subscription::{build_filter, FilterSpec, SubscriptionGroup};
use crate::app::StreamConfig;
use crate::core::bus::{BusEvent, EventBus};
use crate::core::chain::BlockTracker;
use crate::core::domain::{ConnectionId, ParsedEvent, StreamMessage};
use crate::core::parser::ParserRegistry;
use crate::core::retry::exponential_backoff_jittered;
use crate::error::{Error, Result};

enum ConnCommand {
    Subscribe(FilterSpec, oneshot::Sender<Result<()>>),
    Unsubscribe(String, oneshot::Sender<Result<()>>),
    Close,
}

struct PendingSignal {
    connection: ConnectionId,
    notify: oneshot::Sender<()>,
}

struct Route {
    tx: mpsc::Sender<Arc<StreamMessage>>,
    /// Armed during migration: fires on the first message the target
    /// connection routes for this group.
    pending_signal: Option<PendingSignal>,
}

type RoutingTable = Arc<RwLock<HashMap<String, Route>>>;

/// Shared handles a connection actor needs.
#[derive(Clone)]
struct ActorContext {
    limiter: Arc<SubscriptionRateLimiter>,
    pool: Arc<ConnectionPool>,
    balancer: Arc<LoadBalancer>,
    bus: Arc<EventBus>,
    tracker: Arc<BlockTracker>,
    resubscribe_base: Duration,
    resubscribe_cap: Duration,
    connect_timeout: Duration,
}

/// Connect with the pool's transport deadline applied.
async fn connect_with_deadline(
    client: &mut Box<dyn StreamClient>,
    deadline: Duration,
) -> Result<()> {
    match timeout(deadline, client.connect()).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(deadline)),
    }
}

struct ActorHandle {
    commands: mpsc::Sender<ConnCommand>,
    task: tokio::task::JoinHandle<()>,
}

struct GroupState {
    group: SubscriptionGroup,
    connection: ConnectionId,
    worker: tokio::task::JoinHandle<()>,
}

/// Operational status aggregate.
#[derive(Debug, Clone)]
pub struct StreamStatus {
    pub groups: Vec<(String, ConnectionId)>,
    pub subscriptions_in_window: usize,
    pub pool: PoolStats,
    pub loads: HashMap<ConnectionId, LoadSnapshot>,
    pub parse_errors: u64,
}

/// Composes C1-C4 into the stream ingest surface.
pub struct StreamManager {
    config: StreamConfig,
    limiter: Arc<SubscriptionRateLimiter>,
    pool: Arc<ConnectionPool>,
    balancer: Arc<LoadBalancer>,
    bus: Arc<EventBus>,
    tracker: Arc<BlockTracker>,
    parsers: Arc<ParserRegistry>,
    dedup: Arc<TradeDeduplicator>,
    factory: ClientFactory,
    routes: RoutingTable,
    groups: Mutex<HashMap<String, GroupState>>,
    actors: tokio::sync::Mutex<HashMap<ConnectionId, ActorHandle>>,
    timers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl StreamManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StreamConfig,
        limiter: Arc<SubscriptionRateLimiter>,
        pool: Arc<ConnectionPool>,
        balancer: Arc<LoadBalancer>,
        bus: Arc<EventBus>,
        tracker: Arc<BlockTracker>,
        parsers: Arc<ParserRegistry>,
        factory: ClientFactory,
    ) -> Arc<Self> {
        let dedup = Arc::new(TradeDeduplicator::new(
            Duration::from_millis(config.dedup_ttl_ms),
            config.dedup_max_entries,
        ));
        Arc::new(Self {
            config,
            limiter,
            pool,
            balancer,
            bus,
            tracker,
            parsers,
            dedup,
            factory,
            routes: Arc::new(RwLock::new(HashMap::new())),
            groups: Mutex::new(HashMap::new()),
            actors: tokio::sync::Mutex::new(HashMap::new()),
            timers: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe a group: wait on the rate limiter, acquire a connection
    /// for the group's priority class, open the upstream filter, and start
    /// the parser worker.
    pub async fn subscribe(&self, group: SubscriptionGroup) -> Result<()> {
        if self.groups.lock().contains_key(&group.name) {
            return Err(Error::Stream(format!("group {} already subscribed", group.name)));
        }

        self.limiter.wait_for_slot().await;
        let connection = self.pool.acquire(group.priority)?;
        let commands = self.ensure_actor(connection).await;
        let filter = build_filter(&group);

        // Route before subscribing so the first message cannot fall through.
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        self.routes.write().await.insert(
            group.name.clone(),
            Route { tx, pending_signal: None },
        );

        match self.open_subscription(&commands, connection, filter).await {
            Ok(()) => {}
            Err(e) => {
                self.routes.write().await.remove(&group.name);
                self.pool.release(connection);
                return Err(e);
            }
        }

        let worker = tokio::spawn(parser_worker(
            group.name.clone(),
            rx,
            Arc::clone(&self.parsers),
            Arc::clone(&self.dedup),
            Arc::clone(&self.bus),
        ));

        let name = group.name.clone();
        self.groups.lock().insert(
            name.clone(),
            GroupState { group, connection, worker },
        );
        self.recount(connection);
        info!(group = %name, connection_id = connection, "Subscribed");
        Ok(())
    }

    /// Tear down a group's stream and release its connection when it was
    /// the last one.
    pub async fn unsubscribe(&self, name: &str) -> Result<()> {
        let Some(state) = self.groups.lock().remove(name) else {
            return Ok(());
        };
        self.routes.write().await.remove(name);
        state.worker.abort();

        let commands = { self.actors.lock().await.get(&state.connection).map(|a| a.commands.clone()) };
        if let Some(commands) = commands {
            let (reply_tx, reply_rx) = oneshot::channel();
            if commands
                .send(ConnCommand::Unsubscribe(name.to_string(), reply_tx))
                .await
                .is_ok()
            {
                let _ = reply_rx.await;
            }
        }

        self.recount(state.connection);
        if self.group_count(state.connection) == 0 {
            self.pool.release(state.connection);
        }
        info!(group = name, connection_id = state.connection, "Unsubscribed");
        Ok(())
    }

    /// Execute a migration: open on the target, wait for its first message
    /// or a short timeout, then close the source subscription.
    pub async fn migrate(&self, request: &MigrationRequest) -> Result<()> {
        let group = {
            let groups = self.groups.lock();
            let Some(state) = groups.get(&request.group) else {
                return Err(Error::Stream(format!("unknown group {}", request.group)));
            };
            if state.connection != request.from {
                debug!(group = %request.group, "Migration request is stale, skipping");
                return Ok(());
            }
            state.group.clone()
        };

        info!(
            group = %request.group,
            from = request.from,
            to = request.to,
            reason = %request.reason,
            "Migrating subscription group"
        );

        self.limiter.wait_for_slot().await;
        let commands_to = self.ensure_actor(request.to).await;
        self.pool.mark_active(request.to);
        let filter = build_filter(&group);

        // Arm the first-message signal on the target connection.
        let (sig_tx, sig_rx) = oneshot::channel();
        {
            let mut routes = self.routes.write().await;
            let Some(route) = routes.get_mut(&request.group) else {
                return Err(Error::Stream(format!("no route for group {}", request.group)));
            };
            route.pending_signal = Some(PendingSignal {
                connection: request.to,
                notify: sig_tx,
            });
        }

        if let Err(e) = self.open_subscription(&commands_to, request.to, filter).await {
            // Abort the migration: the old subscription stays up.
            if let Some(route) = self.routes.write().await.get_mut(&request.group) {
                route.pending_signal = None;
            }
            return Err(e);
        }

        let overlap = Duration::from_millis(self.config.migration_overlap_timeout_ms);
        if timeout(overlap, sig_rx).await.is_err() {
            debug!(group = %request.group, "No message within overlap window, closing old anyway");
        }
        if let Some(route) = self.routes.write().await.get_mut(&request.group) {
            route.pending_signal = None;
        }

        // Close the old subscription.
        let commands_from =
            { self.actors.lock().await.get(&request.from).map(|a| a.commands.clone()) };
        if let Some(commands) = commands_from {
            let (reply_tx, reply_rx) = oneshot::channel();
            if commands
                .send(ConnCommand::Unsubscribe(request.group.clone(), reply_tx))
                .await
                .is_ok()
            {
                let _ = reply_rx.await;
            }
        }

        if let Some(state) = self.groups.lock().get_mut(&request.group) {
            state.connection = request.to;
        }
        self.recount(request.from);
        self.recount(request.to);
        if self.group_count(request.from) == 0 {
            self.pool.release(request.from);
        }
        info!(group = %request.group, to = request.to, "Migration complete");
        Ok(())
    }

    /// Start the load-calculation and rebalance timers.
    pub fn start(self: &Arc<Self>) {
        let cfg = self.balancer.config().clone();

        let manager = Arc::clone(self);
        let load_task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(cfg.load_calculation_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.balancer.tick_load_calculation();
            }
        });

        let manager = Arc::clone(self);
        let rebalance_task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(cfg.rebalance_scan_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let assignments = manager.assignments();
                let plan = manager.balancer.plan_rebalance(&assignments, false);
                for request in plan {
                    manager.bus.publish(&BusEvent::MigrationRequired(request.clone()));
                    if let Err(e) = manager.migrate(&request).await {
                        warn!(group = %request.group, error = %e, "Migration failed");
                    }
                }
            }
        });

        let mut timers = self.timers.lock();
        timers.push(load_task);
        timers.push(rebalance_task);
        info!("Stream manager started");
    }

    /// Current group → connection assignment.
    pub fn assignments(&self) -> HashMap<String, ConnectionId> {
        self.groups
            .lock()
            .iter()
            .map(|(name, state)| (name.clone(), state.connection))
            .collect()
    }

    /// Operational status for the admin surface.
    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            groups: self.assignments().into_iter().collect(),
            subscriptions_in_window: self.limiter.in_window(),
            pool: self.pool.stats(),
            loads: self.balancer.metrics(),
            parse_errors: self.parsers.error_count(),
        }
    }

    /// Orderly shutdown: timers, actors, workers, pool.
    pub async fn shutdown(&self) {
        for timer in self.timers.lock().drain(..) {
            timer.abort();
        }

        let actors: Vec<ActorHandle> = {
            let mut map = self.actors.lock().await;
            map.drain().map(|(_, handle)| handle).collect()
        };
        for actor in &actors {
            let _ = actor.commands.send(ConnCommand::Close).await;
        }
        for actor in actors {
            if timeout(Duration::from_secs(5), actor.task).await.is_err() {
                warn!("Connection actor did not stop in time");
            }
        }

        for (_, state) in self.groups.lock().drain() {
            state.worker.abort();
        }
        self.routes.write().await.clear();
        self.pool.shutdown();
        info!("Stream manager shut down");
    }

    async fn open_subscription(
        &self,
        commands: &mpsc::Sender<ConnCommand>,
        connection: ConnectionId,
        filter: FilterSpec,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(ConnCommand::Subscribe(filter, reply_tx))
            .await
            .map_err(|_| Error::Connection("connection actor gone".into()))?;
        // The creation counts from dispatch, success or not.
        self.limiter.record(connection);
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Connection("connection actor dropped reply".into())),
        }
    }

    async fn ensure_actor(&self, connection: ConnectionId) -> mpsc::Sender<ConnCommand> {
        let mut actors = self.actors.lock().await;
        if let Some(actor) = actors.get(&connection) {
            if !actor.task.is_finished() {
                return actor.commands.clone();
            }
            actors.remove(&connection);
        }

        let client = (self.factory)();
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let ctx = ActorContext {
            limiter: Arc::clone(&self.limiter),
            pool: Arc::clone(&self.pool),
            balancer: Arc::clone(&self.balancer),
            bus: Arc::clone(&self.bus),
            tracker: Arc::clone(&self.tracker),
            resubscribe_base: Duration::from_millis(self.config.resubscribe_base_ms),
            resubscribe_cap: Duration::from_millis(self.config.resubscribe_cap_ms),
            connect_timeout: self.pool.connection_timeout(),
        };
        let routes = Arc::clone(&self.routes);
        let task = tokio::spawn(connection_actor(connection, client, cmd_rx, routes, ctx));
        self.balancer.register_connection(connection);
        actors.insert(
            connection,
            ActorHandle { commands: cmd_tx.clone(), task },
        );
        debug!(connection_id = connection, "Connection actor spawned");
        cmd_tx
    }

    fn group_count(&self, connection: ConnectionId) -> usize {
        self.groups
            .lock()
            .values()
            .filter(|s| s.connection == connection)
            .count()
    }

    fn recount(&self, connection: ConnectionId) {
        let count = self.group_count(connection);
        self.pool.set_subscription_count(connection, count);
        self.balancer.update_subscription_count(connection, count);
    }
}

/// Drive one connection: apply commands, read messages, reconnect on error.
async fn connection_actor(
    connection_id: ConnectionId,
    mut client: Box<dyn StreamClient>,
    mut commands: mpsc::Receiver<ConnCommand>,
    routes: RoutingTable,
    ctx: ActorContext,
) {
    let mut filters: HashMap<String, FilterSpec> = HashMap::new();
    let mut connected = false;
    let mut attempt: u32 = 0;
    let mut msg_seq: u64 = 0;

    debug!(connection_id, "Connection actor starting");

    loop {
        // Reconnect path: only when there are subscriptions worth restoring.
        if !connected && !filters.is_empty() {
            attempt += 1;
            let delay = exponential_backoff_jittered(ctx.resubscribe_base, ctx.resubscribe_cap, attempt);
            debug!(connection_id, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            sleep(delay).await;

            match connect_with_deadline(&mut client, ctx.connect_timeout).await {
                Ok(()) => {
                    let mut restored = true;
                    for (name, filter) in &filters {
                        // Resubscribes count against the upstream cap.
                        ctx.limiter.wait_for_slot().await;
                        ctx.limiter.record(connection_id);
                        if let Err(e) = client.subscribe(filter).await {
                            warn!(connection_id, group = %name, error = %e, "Resubscribe failed");
                            restored = false;
                            break;
                        }
                    }
                    if restored {
                        connected = true;
                        attempt = 0;
                        info!(connection_id, groups = filters.len(), "Stream restored");
                    }
                }
                Err(e) => {
                    ctx.pool.record_traffic(connection_id, false, 0.0, 0);
                    for name in filters.keys() {
                        ctx.bus.publish(&BusEvent::StreamError {
                            connection_id,
                            group: name.clone(),
                            detail: e.to_string(),
                        });
                    }
                    warn!(connection_id, error = %e, "Reconnect failed");
                }
            }
            continue;
        }

        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(ConnCommand::Subscribe(filter, reply)) => {
                    let mut result = if connected {
                        Ok(())
                    } else {
                        connect_with_deadline(&mut client, ctx.connect_timeout).await
                    };
                    if result.is_ok() {
                        connected = true;
                        attempt = 0;
                        result = client.subscribe(&filter).await;
                    }
                    if result.is_ok() {
                        if let Some(name) = filter.group_name() {
                            filters.insert(name.to_string(), filter);
                        }
                    }
                    let _ = reply.send(result);
                }
                Some(ConnCommand::Unsubscribe(name, reply)) => {
                    let result = if connected {
                        client.unsubscribe(&name).await
                    } else {
                        Ok(())
                    };
                    filters.remove(&name);
                    let _ = reply.send(result);
                }
                Some(ConnCommand::Close) | None => {
                    client.close().await;
                    break;
                }
            },
            message = client.next_message(), if connected => match message {
                Some(Ok(message)) => {
                    msg_seq += 1;
                    handle_stream_message(connection_id, msg_seq, message, &routes, &ctx).await;
                }
                Some(Err(e)) => {
                    connected = false;
                    ctx.pool.record_traffic(connection_id, false, 0.0, 0);
                    for name in filters.keys() {
                        ctx.bus.publish(&BusEvent::StreamError {
                            connection_id,
                            group: name.clone(),
                            detail: e.to_string(),
                        });
                    }
                    warn!(connection_id, error = %e, "Stream error");
                }
                None => {
                    connected = false;
                    for name in filters.keys() {
                        ctx.bus.publish(&BusEvent::StreamError {
                            connection_id,
                            group: name.clone(),
                            detail: "stream ended".into(),
                        });
                    }
                    warn!(connection_id, "Stream ended");
                }
            }
        }
    }

    debug!(connection_id, "Connection actor terminated");
}

/// Route one inbound message: chain updates to the tracker, transactions to
/// their groups' channels, metrics to the balancer and pool.
async fn handle_stream_message(
    connection_id: ConnectionId,
    msg_seq: u64,
    message: StreamMessage,
    routes: &RoutingTable,
    ctx: &ActorContext,
) {
    ctx.balancer.record_message_start(connection_id, msg_seq);
    let started = Instant::now();
    let bytes = message.approx_bytes() as u64;
    let message = Arc::new(message);

    match &*message {
        StreamMessage::Slot(update) => ctx.tracker.handle_slot(*update),
        StreamMessage::BlockMeta(meta) => ctx.tracker.handle_block_meta(meta),
        StreamMessage::Ping { .. } => {}
        StreamMessage::Transaction(tx) => {
            let mut deliveries: Vec<(String, mpsc::Sender<Arc<StreamMessage>>)> = Vec::new();
            {
                let mut table = routes.write().await;
                for name in &tx.filters {
                    if let Some(route) = table.get_mut(name) {
                        if route
                            .pending_signal
                            .as_ref()
                            .is_some_and(|p| p.connection == connection_id)
                        {
                            if let Some(signal) = route.pending_signal.take() {
                                let _ = signal.notify.send(());
                            }
                        }
                        deliveries.push((name.clone(), route.tx.clone()));
                    }
                }
            }

            for (group, sender) in deliveries {
                ctx.bus.publish(&BusEvent::StreamData {
                    connection_id,
                    group: group.clone(),
                    message: Arc::clone(&message),
                });
                match sender.try_send(Arc::clone(&message)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(queued)) => {
                        // Full channel: pause reads on this stream rather
                        // than drop.
                        warn!(connection_id, group = %group, "Parser channel full, pausing reads");
                        if sender.send(queued).await.is_err() {
                            debug!(group = %group, "Parser channel closed mid back-pressure");
                        }
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(group = %group, "Parser channel closed");
                    }
                }
            }
        }
    }

    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
    ctx.balancer.record_message_complete(connection_id, msg_seq, true, bytes);
    ctx.pool.record_traffic(connection_id, true, latency_ms, bytes);
}

/// Drain one group's channel through the parser registry onto the bus.
async fn parser_worker(
    group: String,
    mut rx: mpsc::Receiver<Arc<StreamMessage>>,
    parsers: Arc<ParserRegistry>,
    dedup: Arc<TradeDeduplicator>,
    bus: Arc<EventBus>,
) {
    debug!(group = %group, "Parser worker starting");
    while let Some(message) = rx.recv().await {
        let StreamMessage::Transaction(tx) = &*message else {
            continue;
        };
        for event in parsers.parse(tx) {
            match event {
                ParsedEvent::Trade(trade) => {
                    if dedup.check_and_record(&trade.signature, trade.slot) {
                        bus.publish(&BusEvent::Trade(trade));
                    }
                }
                ParsedEvent::TokenCreated(creation) => {
                    if dedup.check_and_record(&creation.signature, creation.slot) {
                        bus.publish(&BusEvent::TokenCreated(creation));
                    }
                }
            }
        }
    }
    debug!(group = %group, "Parser worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{ConnectionPoolConfig, LoadBalancerConfig};
    use crate::core::bus::Topic;
    use crate::core::chain::{BlockTracker, BlockTrackerConfig};
    use crate::core::domain::{TransactionUpdate, TxSignature};
    use crate::core::parser::{test_fixtures::trade_tx, BondingCurveParser};
    use crate::core::stream::pool::Priority;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    // -- Scripted transport ---------------------------------------------------

    #[derive(Default)]
    struct ScriptState {
        connects: AtomicU32,
        subscribes: StdMutex<Vec<String>>,
        unsubscribes: StdMutex<Vec<String>>,
        inboxes: StdMutex<Vec<mpsc::UnboundedSender<Result<StreamMessage>>>>,
    }

    impl ScriptState {
        fn push(&self, client: usize, message: StreamMessage) {
            let inboxes = self.inboxes.lock().unwrap();
            inboxes[client].send(Ok(message)).unwrap();
        }

        fn push_error(&self, client: usize) {
            let inboxes = self.inboxes.lock().unwrap();
            inboxes[client]
                .send(Err(Error::Stream("scripted failure".into())))
                .unwrap();
        }
    }

    struct ScriptedClient {
        shared: Arc<ScriptState>,
        rx: mpsc::UnboundedReceiver<Result<StreamMessage>>,
    }

    #[async_trait]
    impl StreamClient for ScriptedClient {
        async fn connect(&mut self) -> Result<()> {
            self.shared.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe(&mut self, filter: &FilterSpec) -> Result<()> {
            let name = filter.group_name().unwrap_or("?").to_string();
            self.shared.subscribes.lock().unwrap().push(name);
            Ok(())
        }

        async fn unsubscribe(&mut self, group: &str) -> Result<()> {
            self.shared.unsubscribes.lock().unwrap().push(group.to_string());
            Ok(())
        }

        async fn next_message(&mut self) -> Option<Result<StreamMessage>> {
            self.rx.recv().await
        }

        async fn close(&mut self) {}
    }

    fn scripted_factory(state: Arc<ScriptState>) -> ClientFactory {
        Arc::new(move || {
            let (tx, rx) = mpsc::unbounded_channel();
            state.inboxes.lock().unwrap().push(tx);
            Box::new(ScriptedClient { shared: Arc::clone(&state), rx })
        })
    }

    // -- Harness --------------------------------------------------------------

    fn stream_config() -> StreamConfig {
        StreamConfig {
            channel_capacity: 64,
            migration_overlap_timeout_ms: 100,
            resubscribe_base_ms: 10,
            resubscribe_cap_ms: 100,
            dedup_ttl_ms: 60_000,
            dedup_max_entries: 10_000,
        }
    }

    fn build_manager(state: Arc<ScriptState>) -> (Arc<StreamManager>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let pool = Arc::new(ConnectionPool::new(
            ConnectionPoolConfig {
                min_connections: 2,
                max_connections: 3,
                health_check_interval_ms: 60_000,
                connection_timeout_ms: 1_000,
                max_retries: 3,
                max_error_rate: 0.5,
                stale_after_ms: 300_000,
            },
            Arc::clone(&bus),
        ));
        pool.initialize();
        let balancer = Arc::new(LoadBalancer::new(LoadBalancerConfig {
            rebalance_threshold: 30.0,
            min_rebalance_interval_ms: 60_000,
            load_calculation_interval_ms: 5_000,
            rebalance_scan_interval_ms: 10_000,
            migration_batch_size: 2,
            target_load_ratio: 0.7,
        }));
        let limiter = Arc::new(SubscriptionRateLimiter::new(100, Duration::from_secs(60)));
        let tracker = Arc::new(BlockTracker::new(BlockTrackerConfig::default(), Arc::clone(&bus)));
        let parsers = Arc::new(ParserRegistry::new(vec![Box::new(BondingCurveParser::new(
            "curve",
        ))]));
        let manager = StreamManager::new(
            stream_config(),
            limiter,
            pool,
            balancer,
            Arc::clone(&bus),
            tracker,
            parsers,
            scripted_factory(state),
        );
        (manager, bus)
    }

    fn curve_group() -> SubscriptionGroup {
        SubscriptionGroup::new("bonding_curve", vec!["curve".into()], Priority::High)
    }

    fn tagged_trade(signature: &str) -> TransactionUpdate {
        let mut tx = trade_tx("curve", "mintA", signature, 0, 1_000_000, 2_000_000_000, 999_995_000);
        tx.filters = vec!["bonding_curve".into()];
        tx
    }

    // -- Tests ----------------------------------------------------------------

    #[tokio::test]
    async fn subscribe_opens_stream_and_parses_trades() {
        let state = Arc::new(ScriptState::default());
        let (manager, bus) = build_manager(Arc::clone(&state));

        let trades = Arc::new(StdMutex::new(Vec::new()));
        {
            let trades = Arc::clone(&trades);
            bus.subscribe(Topic::BondingCurveTrade, move |event| {
                if let BusEvent::Trade(trade) = event {
                    trades.lock().unwrap().push(trade.clone());
                }
            });
        }

        manager.subscribe(curve_group()).await.unwrap();
        assert_eq!(*state.subscribes.lock().unwrap(), vec!["bonding_curve"]);
        assert_eq!(manager.status().subscriptions_in_window, 1);
        assert_eq!(manager.status().pool.active, 1);

        state.push(0, StreamMessage::Transaction(tagged_trade("sig-1")));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = trades.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].signature, TxSignature::from("sig-1"));
        drop(seen);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_deliveries_are_deduplicated() {
        let state = Arc::new(ScriptState::default());
        let (manager, bus) = build_manager(Arc::clone(&state));

        let count = Arc::new(AtomicU32::new(0));
        {
            let count = Arc::clone(&count);
            bus.subscribe(Topic::BondingCurveTrade, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        manager.subscribe(curve_group()).await.unwrap();
        state.push(0, StreamMessage::Transaction(tagged_trade("sig-dup")));
        state.push(0, StreamMessage::Transaction(tagged_trade("sig-dup")));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_connection() {
        let state = Arc::new(ScriptState::default());
        let (manager, _bus) = build_manager(Arc::clone(&state));

        manager.subscribe(curve_group()).await.unwrap();
        manager.unsubscribe("bonding_curve").await.unwrap();

        assert_eq!(*state.unsubscribes.lock().unwrap(), vec!["bonding_curve"]);
        let status = manager.status();
        assert!(status.groups.is_empty());
        assert_eq!(status.pool.active, 0);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn migrate_opens_target_before_closing_source() {
        let state = Arc::new(ScriptState::default());
        let (manager, _bus) = build_manager(Arc::clone(&state));

        manager.subscribe(curve_group()).await.unwrap();
        let from = manager.assignments()["bonding_curve"];
        let to = if from == 1 { 2 } else { 1 };

        let request = MigrationRequest {
            group: "bonding_curve".into(),
            from,
            to,
            reason: "test".into(),
        };
        manager.migrate(&request).await.unwrap();

        // Two subscribes total (source then target), one unsubscribe, and the
        // unsubscribe happened after the second subscribe.
        assert_eq!(state.subscribes.lock().unwrap().len(), 2);
        assert_eq!(*state.unsubscribes.lock().unwrap(), vec!["bonding_curve"]);
        assert_eq!(manager.assignments()["bonding_curve"], to);
        assert_eq!(manager.status().subscriptions_in_window, 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn migrate_proceeds_once_first_message_arrives() {
        let state = Arc::new(ScriptState::default());
        let (manager, _bus) = build_manager(Arc::clone(&state));

        manager.subscribe(curve_group()).await.unwrap();
        let from = manager.assignments()["bonding_curve"];
        let to = if from == 1 { 2 } else { 1 };

        let request = MigrationRequest {
            group: "bonding_curve".into(),
            from,
            to,
            reason: "test".into(),
        };

        let state2 = Arc::clone(&state);
        let feeder = tokio::spawn(async move {
            // Wait for the target client to exist, then deliver a message on it.
            loop {
                if state2.inboxes.lock().unwrap().len() >= 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            state2.push(1, StreamMessage::Transaction(tagged_trade("sig-first")));
        });

        manager.migrate(&request).await.unwrap();
        feeder.await.unwrap();

        assert_eq!(manager.assignments()["bonding_curve"], to);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn stream_error_reconnects_and_resubscribes() {
        let state = Arc::new(ScriptState::default());
        let (manager, bus) = build_manager(Arc::clone(&state));

        let errors = Arc::new(AtomicU32::new(0));
        {
            let errors = Arc::clone(&errors);
            bus.subscribe(Topic::StreamError, move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            });
        }

        manager.subscribe(curve_group()).await.unwrap();
        assert_eq!(state.connects.load(Ordering::SeqCst), 1);

        state.push_error(0);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(errors.load(Ordering::SeqCst) >= 1);
        assert!(state.connects.load(Ordering::SeqCst) >= 2, "expected reconnect");
        // Resubscription happened and counted against the limiter.
        assert_eq!(state.subscribes.lock().unwrap().len(), 2);
        assert_eq!(manager.status().subscriptions_in_window, 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn slot_messages_feed_the_block_tracker() {
        let state = Arc::new(ScriptState::default());
        let (manager, _bus) = build_manager(Arc::clone(&state));

        manager.subscribe(curve_group()).await.unwrap();
        state.push(
            0,
            StreamMessage::Slot(crate::core::domain::SlotStatusUpdate {
                slot: 7777,
                parent_slot: 7776,
                status: crate::core::domain::CommitmentLevel::Processed,
                block_height: None,
            }),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(manager.tracker.current_slot(), 7777);
        manager.shutdown().await;
    }
}
