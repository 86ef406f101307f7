//! Token state writer.
//!
//! Bus consumer that persists parsed events: trades and creations upsert
//! tokens and trade rows, slot gaps and finalized slots land in the slot
//! store. Bus handlers must stay short, so they only forward into a
//! bounded channel; the writer task does the storage work.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::bus::{BusEvent, EventBus, Topic};
use crate::core::chain::BlockTracker;
use crate::core::domain::{Token, TokenCreation, Trade};
use crate::core::store::{SlotStore, TokenStore, TradeStore};

/// Launch tokens mint with a fixed supply; market cap derives from price.
const TOKEN_SUPPLY: u64 = 1_000_000_000;

const CHANNEL_CAPACITY: usize = 4_096;

enum WriterMessage {
    Trade(Trade),
    Creation(TokenCreation),
    Gap(crate::core::domain::SlotGap),
    Finalized(u64),
}

/// Persists bus events into the stores.
pub struct TokenStateWriter {
    tokens: Arc<dyn TokenStore>,
    trades: Arc<dyn TradeStore>,
    slots: Arc<dyn SlotStore>,
    tracker: Arc<BlockTracker>,
    task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TokenStateWriter {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        trades: Arc<dyn TradeStore>,
        slots: Arc<dyn SlotStore>,
        tracker: Arc<BlockTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tokens,
            trades,
            slots,
            tracker,
            task: parking_lot::Mutex::new(None),
        })
    }

    /// Register bus handlers and start the drain task.
    pub fn start(self: &Arc<Self>, bus: &EventBus) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        for topic in [
            Topic::BondingCurveTrade,
            Topic::AmmTrade,
            Topic::TokenCreated,
            Topic::SlotGapDetected,
            Topic::BlockFinalized,
        ] {
            let tx = tx.clone();
            bus.subscribe(topic, move |event| {
                let message = match event {
                    BusEvent::Trade(trade) => WriterMessage::Trade(trade.clone()),
                    BusEvent::TokenCreated(creation) => WriterMessage::Creation(creation.clone()),
                    BusEvent::SlotGapDetected(gap) => WriterMessage::Gap(gap.clone()),
                    BusEvent::BlockFinalized { slot } => WriterMessage::Finalized(*slot),
                    _ => return,
                };
                if tx.try_send(message).is_err() {
                    warn!("Writer channel full, dropping event");
                }
            });
        }

        let writer = Arc::clone(self);
        *self.task.lock() = Some(tokio::spawn(async move {
            writer.drain(rx).await;
        }));
        info!("Token state writer started");
    }

    async fn drain(&self, mut rx: mpsc::Receiver<WriterMessage>) {
        while let Some(message) = rx.recv().await {
            let result = match message {
                WriterMessage::Trade(trade) => self.apply_trade(trade).await,
                WriterMessage::Creation(creation) => self.apply_creation(creation).await,
                WriterMessage::Gap(gap) => self.slots.append_gap(&gap).await,
                WriterMessage::Finalized(slot) => self.apply_finalized(slot).await,
            };
            if let Err(e) = result {
                warn!(error = %e, "Writer persistence failed");
            }
        }
    }

    async fn apply_trade(&self, trade: Trade) -> crate::error::Result<()> {
        if !self.trades.record_trade(&trade).await? {
            debug!(signature = %trade.signature, "Duplicate trade skipped");
            return Ok(());
        }

        let mut token = match self.tokens.token(&trade.mint).await? {
            Some(token) => token,
            None => Token::new(trade.mint.clone(), String::new(), String::new(), trade.slot),
        };

        let at = trade.block_time.unwrap_or_else(Utc::now);
        token.last_trade_at = Some(at);
        token.market_cap_sol = trade.price_sol * Decimal::from(TOKEN_SUPPLY);
        if trade.venue.is_pool() {
            token.pool_trades += 1;
            if !token.graduated_to_pool {
                token.graduated_to_pool = true;
                token.graduation_at = Some(at);
                info!(mint = %token.mint, "Token graduated to pool");
            }
        } else {
            token.bonding_curve_trades += 1;
        }
        if token.stale {
            token.stale = false;
        }
        token.updated_at = Utc::now();
        self.tokens.upsert_token(&token).await
    }

    async fn apply_creation(&self, creation: TokenCreation) -> crate::error::Result<()> {
        let mut token = match self.tokens.token(&creation.mint).await? {
            Some(token) => token,
            None => Token::new(
                creation.mint.clone(),
                creation.symbol.clone(),
                creation.name.clone(),
                creation.slot,
            ),
        };
        if token.symbol.is_empty() {
            token.symbol = creation.symbol;
        }
        if token.name.is_empty() {
            token.name = creation.name;
        }
        token.creator = Some(creation.creator);
        if let Some(at) = creation.block_time {
            token.first_seen_at = at;
        }
        token.updated_at = Utc::now();
        self.tokens.upsert_token(&token).await
    }

    async fn apply_finalized(&self, slot: u64) -> crate::error::Result<()> {
        if let Some(record) = self.tracker.record(slot) {
            self.slots.upsert_slot(&record).await?;
        }
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for TokenStateWriter {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::BlockTrackerConfig;
    use crate::core::domain::{
        MintAddress, TradeSide, TradeVenue, TxSignature, WalletAddress,
    };
    use crate::core::store::MemoryStore;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn trade(sig: &str, venue: TradeVenue) -> Trade {
        Trade {
            signature: TxSignature::from(sig),
            slot: 100,
            mint: MintAddress::from("mint"),
            trader: WalletAddress::from("wallet"),
            side: TradeSide::Buy,
            venue,
            sol_amount: dec!(1),
            token_amount: dec!(1000),
            price_sol: dec!(0.001),
            block_time: Some(Utc::now()),
        }
    }

    fn harness() -> (Arc<TokenStateWriter>, Arc<EventBus>, Arc<MemoryStore>) {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(BlockTracker::new(
            BlockTrackerConfig::default(),
            Arc::clone(&bus),
        ));
        let writer = TokenStateWriter::new(store.clone(), store.clone(), store.clone(), tracker);
        writer.start(&bus);
        (writer, bus, store)
    }

    #[tokio::test]
    async fn curve_trade_creates_token_and_counts() {
        let (_writer, bus, store) = harness();

        bus.publish(&BusEvent::Trade(trade("s1", TradeVenue::BondingCurve)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let token = store.token(&MintAddress::from("mint")).await.unwrap().unwrap();
        assert_eq!(token.bonding_curve_trades, 1);
        assert_eq!(token.pool_trades, 0);
        assert!(!token.graduated_to_pool);
        assert_eq!(token.market_cap_sol, dec!(1000000));
    }

    #[tokio::test]
    async fn first_pool_trade_graduates_the_token() {
        let (_writer, bus, store) = harness();

        bus.publish(&BusEvent::Trade(trade("s1", TradeVenue::BondingCurve)));
        bus.publish(&BusEvent::Trade(trade("s2", TradeVenue::AmmPool)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let token = store.token(&MintAddress::from("mint")).await.unwrap().unwrap();
        assert!(token.graduated_to_pool);
        assert!(token.graduation_at.is_some());
        assert_eq!(token.pool_trades, 1);
    }

    #[tokio::test]
    async fn duplicate_trades_counted_once() {
        let (_writer, bus, store) = harness();

        bus.publish(&BusEvent::Trade(trade("s1", TradeVenue::BondingCurve)));
        bus.publish(&BusEvent::Trade(trade("s1", TradeVenue::BondingCurve)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let token = store.token(&MintAddress::from("mint")).await.unwrap().unwrap();
        assert_eq!(token.bonding_curve_trades, 1);
    }

    #[tokio::test]
    async fn creation_enriches_token_metadata() {
        let (_writer, bus, store) = harness();

        bus.publish(&BusEvent::TokenCreated(TokenCreation {
            mint: MintAddress::from("mint"),
            symbol: "MCAT".into(),
            name: "Moon Cat".into(),
            creator: WalletAddress::from("creator"),
            slot: 99,
            signature: TxSignature::from("create-sig"),
            block_time: Some(Utc::now()),
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let token = store.token(&MintAddress::from("mint")).await.unwrap().unwrap();
        assert_eq!(token.symbol, "MCAT");
        assert_eq!(token.creator, Some(WalletAddress::from("creator")));
    }
}
