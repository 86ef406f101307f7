//! In-process typed publish/subscribe.
//!
//! Handlers run synchronously in registration order; a panicking handler is
//! logged and the remaining handlers still run. Delivery is best-effort
//! within the process. Handlers must be short; slow consumers register a
//! handler that forwards into their own channel.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::core::domain::{
    ConnectionId, MintAddress, ParsedEvent, SlotGap, StreamMessage, Trade, TradeVenue,
};
use crate::core::stream::MigrationRequest;

/// Events published on the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// Raw demultiplexed upstream message, tagged by origin.
    StreamData {
        connection_id: ConnectionId,
        group: String,
        message: Arc<StreamMessage>,
    },
    /// A normalized trade. The venue distinguishes `bc:trade` from
    /// `amm:trade` consumers.
    Trade(Trade),
    /// A token creation event.
    TokenCreated(crate::core::domain::TokenCreation),
    /// Periodic chain statistics refresh.
    ChainStatsUpdated {
        avg_block_time_ms: f64,
        avg_transactions_per_block: f64,
        slot_success_rate: f64,
    },
    /// A fork was observed.
    ForkAlert {
        slot: u64,
        parent_slot: u64,
        fork_point: u64,
    },
    /// A slot gap was recorded.
    SlotGapDetected(SlotGap),
    /// A slot reached finalized status.
    BlockFinalized { slot: u64 },
    /// An operator-facing alert was raised.
    AlertCreated { kind: String, detail: String },
    /// A previously raised alert cleared.
    AlertResolved { kind: String },
    /// The load balancer wants a subscription group moved.
    MigrationRequired(MigrationRequest),
    /// A pooled connection was marked unhealthy.
    ConnectionUnhealthy { connection_id: ConnectionId, reason: String },
    /// A previously unhealthy connection recovered.
    ConnectionRecovered { connection_id: ConnectionId },
    /// A connection failed terminally.
    ConnectionFailed { connection_id: ConnectionId, reason: String },
    /// An upstream stream errored and will be retried.
    StreamError { connection_id: ConnectionId, group: String, detail: String },
    /// A token went quiet past its staleness tier.
    TokenStale { mint: MintAddress },
    /// A recurring analysis found significant movement.
    SignificantChanges {
        mint: MintAddress,
        score_delta: f64,
        holder_delta: i64,
        concentration_delta: f64,
    },
    /// Progress report from a batch analysis job.
    AnalysisProgress { completed: usize, total: usize },
}

impl BusEvent {
    /// Topic used for subscription routing.
    pub fn topic(&self) -> Topic {
        match self {
            Self::StreamData { .. } => Topic::StreamData,
            Self::Trade(trade) => match trade.venue {
                TradeVenue::BondingCurve => Topic::BondingCurveTrade,
                TradeVenue::AmmPool | TradeVenue::ExternalAmm => Topic::AmmTrade,
            },
            Self::TokenCreated(_) => Topic::TokenCreated,
            Self::ChainStatsUpdated { .. } => Topic::ChainStatsUpdated,
            Self::ForkAlert { .. } => Topic::ForkAlert,
            Self::SlotGapDetected(_) => Topic::SlotGapDetected,
            Self::BlockFinalized { .. } => Topic::BlockFinalized,
            Self::AlertCreated { .. } => Topic::AlertCreated,
            Self::AlertResolved { .. } => Topic::AlertResolved,
            Self::MigrationRequired(_) => Topic::MigrationRequired,
            Self::ConnectionUnhealthy { .. } => Topic::ConnectionUnhealthy,
            Self::ConnectionRecovered { .. } => Topic::ConnectionRecovered,
            Self::ConnectionFailed { .. } => Topic::ConnectionFailed,
            Self::StreamError { .. } => Topic::StreamError,
            Self::TokenStale { .. } => Topic::TokenStale,
            Self::SignificantChanges { .. } => Topic::SignificantChanges,
            Self::AnalysisProgress { .. } => Topic::AnalysisProgress,
        }
    }

    pub fn as_trade(&self) -> Option<&Trade> {
        match self {
            Self::Trade(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_parsed(&self) -> Option<ParsedEvent> {
        match self {
            Self::Trade(t) => Some(ParsedEvent::Trade(t.clone())),
            Self::TokenCreated(c) => Some(ParsedEvent::TokenCreated(c.clone())),
            _ => None,
        }
    }
}

/// Named event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    StreamData,
    BondingCurveTrade,
    AmmTrade,
    TokenCreated,
    ChainStatsUpdated,
    ForkAlert,
    SlotGapDetected,
    BlockFinalized,
    AlertCreated,
    AlertResolved,
    MigrationRequired,
    ConnectionUnhealthy,
    ConnectionRecovered,
    ConnectionFailed,
    StreamError,
    TokenStale,
    SignificantChanges,
    AnalysisProgress,
}

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Identifier returned by [`EventBus::subscribe`], usable for removal.
pub type HandlerId = u64;

#[derive(Default)]
struct Registry {
    next_id: HandlerId,
    handlers: HashMap<Topic, Vec<(HandlerId, Handler)>>,
}

/// Minimal synchronous pub/sub over a lock-protected handler map.
#[derive(Default)]
pub struct EventBus {
    registry: Mutex<Registry>,
    // Serializes handler invocation so per-event ordering is stable.
    publish_lock: Mutex<()>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one topic. Handlers run in registration order.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> HandlerId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let mut reg = self.registry.lock();
        reg.next_id += 1;
        let id = reg.next_id;
        reg.handlers.entry(topic).or_default().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was present.
    pub fn unsubscribe(&self, topic: Topic, id: HandlerId) -> bool {
        let mut reg = self.registry.lock();
        if let Some(list) = reg.handlers.get_mut(&topic) {
            let before = list.len();
            list.retain(|(hid, _)| *hid != id);
            return list.len() != before;
        }
        false
    }

    /// Publish an event to its topic's handlers.
    pub fn publish(&self, event: &BusEvent) {
        let handlers: Vec<Handler> = {
            let reg = self.registry.lock();
            reg.handlers
                .get(&event.topic())
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        let _guard = self.publish_lock.lock();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(topic = ?event.topic(), "Event handler panicked");
            }
        }
    }

    /// Number of handlers registered for a topic.
    pub fn handler_count(&self, topic: Topic) -> usize {
        self.registry.lock().handlers.get(&topic).map_or(0, Vec::len)
    }
}
