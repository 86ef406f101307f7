//! Shared test harness: scripted upstream transport and fixtures.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use mintstream::app::{ConnectionPoolConfig, LoadBalancerConfig, StreamConfig};
use mintstream::core::bus::EventBus;
use mintstream::core::chain::{BlockTracker, BlockTrackerConfig};
use mintstream::core::domain::{
    Instruction, StreamMessage, TokenBalance, TransactionMeta, TransactionUpdate, TxSignature,
};
use mintstream::core::parser::{BondingCurveParser, ParserRegistry};
use mintstream::core::stream::{
    ClientFactory, ConnectionPool, FilterSpec, LoadBalancer, StreamClient, StreamManager,
    SubscriptionRateLimiter,
};
use mintstream::error::{Error, Result};

/// Shared state across all clients a scripted factory creates.
#[derive(Default)]
pub struct ScriptState {
    pub connects: AtomicU32,
    pub subscribes: StdMutex<Vec<String>>,
    pub unsubscribes: StdMutex<Vec<String>>,
    inboxes: StdMutex<Vec<mpsc::UnboundedSender<Result<StreamMessage>>>>,
}

impl ScriptState {
    /// Deliver a message on the `client`-th created connection.
    pub fn push(&self, client: usize, message: StreamMessage) {
        let inboxes = self.inboxes.lock().unwrap();
        inboxes[client].send(Ok(message)).unwrap();
    }

    pub fn push_error(&self, client: usize) {
        let inboxes = self.inboxes.lock().unwrap();
        inboxes[client]
            .send(Err(Error::Stream("scripted failure".into())))
            .unwrap();
    }

    pub fn clients_created(&self) -> usize {
        self.inboxes.lock().unwrap().len()
    }
}

/// Transport double driven by [`ScriptState`].
pub struct ScriptedClient {
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
        self.shared
            .unsubscribes
            .lock()
            .unwrap()
            .push(group.to_string());
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<StreamMessage>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {}
}

pub fn scripted_factory(state: Arc<ScriptState>) -> ClientFactory {
    Arc::new(move || {
        let (tx, rx) = mpsc::unbounded_channel();
        state.inboxes.lock().unwrap().push(tx);
        Box::new(ScriptedClient {
            shared: Arc::clone(&state),
            rx,
        })
    })
}

/// A successful buy against `program`, tagged for `group`.
pub fn tagged_buy(program: &str, group: &str, mint: &str, signature: &str, slot: u64) -> StreamMessage {
    StreamMessage::Transaction(TransactionUpdate {
        slot,
        signature: TxSignature::from(signature),
        is_vote: false,
        account_keys: vec!["trader1111".into(), program.to_string()],
        instructions: vec![Instruction {
            program_id: program.to_string(),
            accounts: vec!["trader1111".into()],
            data: "deadbeef".into(),
        }],
        meta: TransactionMeta {
            err: None,
            fee: 5_000,
            pre_token_balances: vec![TokenBalance {
                account_index: 0,
                mint: mint.to_string(),
                owner: Some("trader1111".into()),
                amount: 0,
                decimals: 6,
            }],
            post_token_balances: vec![TokenBalance {
                account_index: 0,
                mint: mint.to_string(),
                owner: Some("trader1111".into()),
                amount: 1_000_000,
                decimals: 6,
            }],
            pre_balances: vec![2_000_000_000],
            post_balances: vec![999_995_000],
            log_messages: vec![format!("Program {program} invoke [1]")],
        },
        block_time: Some(chrono::Utc::now()),
        filters: vec![group.to_string()],
    })
}

pub fn pool_config() -> ConnectionPoolConfig {
    ConnectionPoolConfig {
        min_connections: 2,
        max_connections: 3,
        health_check_interval_ms: 60_000,
        connection_timeout_ms: 1_000,
        max_retries: 3,
        max_error_rate: 0.5,
        stale_after_ms: 300_000,
    }
}

pub fn balancer_config() -> LoadBalancerConfig {
    LoadBalancerConfig {
        rebalance_threshold: 30.0,
        min_rebalance_interval_ms: 60_000,
        load_calculation_interval_ms: 5_000,
        rebalance_scan_interval_ms: 10_000,
        migration_batch_size: 2,
        target_load_ratio: 0.7,
    }
}

pub fn stream_config() -> StreamConfig {
    StreamConfig {
        channel_capacity: 256,
        migration_overlap_timeout_ms: 100,
        resubscribe_base_ms: 10,
        resubscribe_cap_ms: 100,
        dedup_ttl_ms: 60_000,
        dedup_max_entries: 10_000,
    }
}

/// A full stream plane over the scripted transport, parsing `curve`
/// program trades.
pub struct StreamHarness {
    pub manager: Arc<StreamManager>,
    pub bus: Arc<EventBus>,
    pub tracker: Arc<BlockTracker>,
    pub balancer: Arc<LoadBalancer>,
    pub state: Arc<ScriptState>,
}

pub fn stream_harness() -> StreamHarness {
    let state = Arc::new(ScriptState::default());
    let bus = Arc::new(EventBus::new());
    let pool = Arc::new(ConnectionPool::new(pool_config(), Arc::clone(&bus)));
    pool.initialize();
    let balancer = Arc::new(LoadBalancer::new(balancer_config()));
    let limiter = Arc::new(SubscriptionRateLimiter::new(
        100,
        std::time::Duration::from_secs(60),
    ));
    let tracker = Arc::new(BlockTracker::new(
        BlockTrackerConfig::default(),
        Arc::clone(&bus),
    ));
    let parsers = Arc::new(ParserRegistry::new(vec![Box::new(BondingCurveParser::new(
        "curve",
    ))]));
    let manager = StreamManager::new(
        stream_config(),
        limiter,
        pool,
        Arc::clone(&balancer),
        Arc::clone(&bus),
        Arc::clone(&tracker),
        parsers,
        scripted_factory(Arc::clone(&state)),
    );
    StreamHarness {
        manager,
        bus,
        tracker,
        balancer,
        state,
    }
}
