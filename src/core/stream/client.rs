//! Upstream stream transport.
//!
//! The wire encoding is a collaborator concern; the core programs against
//! [`StreamClient`] and a factory closure, so tests and alternative
//! transports plug in without touching the manager. The bundled
//! [`WsStreamClient`] speaks JSON frames over an authenticated websocket.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use super::subscription::{FilterSpec, TransactionFilter};
use crate::core::domain::{CommitmentLevel, StreamMessage};
use crate::error::{Error, Result};

/// One upstream streaming connection.
///
/// Implementations own a single socket. Multiple subscription groups may be
/// active on one client; inbound transactions carry the matching group names
/// in their `filters` field.
///
/// After a reconnect the caller re-issues `subscribe` for every active
/// filter — each re-subscription counts against the upstream rate cap, so
/// the client must never replay filters on its own.
#[async_trait]
pub trait StreamClient: Send {
    /// Establish the connection. Idempotent when already connected.
    async fn connect(&mut self) -> Result<()>;

    /// Add (or replace) one group's filter on the connection.
    async fn subscribe(&mut self, filter: &FilterSpec) -> Result<()>;

    /// Remove one group's filter from the connection.
    async fn unsubscribe(&mut self, group: &str) -> Result<()>;

    /// Next inbound message. `None` means the stream ended.
    async fn next_message(&mut self) -> Option<Result<StreamMessage>>;

    /// Close the connection.
    async fn close(&mut self);
}

/// Factory for creating new client instances, used by the stream manager
/// when it opens a connection slot.
pub type ClientFactory = Arc<dyn Fn() -> Box<dyn StreamClient> + Send + Sync>;

/// Outbound control frame.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ControlFrame {
    Subscribe {
        commitment: CommitmentLevel,
        transactions: HashMap<String, TransactionFilter>,
        slots: bool,
        blocks_meta: bool,
    },
    Unsubscribe {
        group: String,
    },
    Pong {
        id: u64,
    },
}

/// Websocket-backed [`StreamClient`].
pub struct WsStreamClient {
    endpoint: Url,
    token: String,
    ws: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WsStreamClient {
    pub fn new(endpoint: Url, token: impl Into<String>) -> Self {
        Self {
            endpoint,
            token: token.into(),
            ws: None,
        }
    }

    fn auth_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", &self.token);
        url
    }

    async fn send_frame(&mut self, frame: &ControlFrame) -> Result<()> {
        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".into()))?;
        let text = serde_json::to_string(frame)?;
        ws.send(Message::Text(text)).await?;
        Ok(())
    }

    fn subscribe_frame(filter: &FilterSpec) -> ControlFrame {
        ControlFrame::Subscribe {
            commitment: filter.commitment,
            transactions: filter.transactions.clone(),
            slots: filter.slots,
            blocks_meta: filter.blocks_meta,
        }
    }
}

#[async_trait]
impl StreamClient for WsStreamClient {
    async fn connect(&mut self) -> Result<()> {
        if self.ws.is_some() {
            return Ok(());
        }
        let url = self.auth_url();
        debug!(endpoint = %self.endpoint, "Connecting upstream websocket");
        let (ws, _response) = connect_async(url.as_str()).await?;
        self.ws = Some(ws);
        Ok(())
    }

    async fn subscribe(&mut self, filter: &FilterSpec) -> Result<()> {
        let frame = Self::subscribe_frame(filter);
        self.send_frame(&frame).await
    }

    async fn unsubscribe(&mut self, group: &str) -> Result<()> {
        self.send_frame(&ControlFrame::Unsubscribe {
            group: group.to_string(),
        })
        .await
    }

    async fn next_message(&mut self) -> Option<Result<StreamMessage>> {
        loop {
            let ws = self.ws.as_mut()?;
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<StreamMessage>(&text)
                {
                    Ok(StreamMessage::Ping { id }) => {
                        // Answer keep-alives in-line; they are not data.
                        if let Err(e) = self.send_frame(&ControlFrame::Pong { id }).await {
                            return Some(Err(e));
                        }
                    }
                    Ok(msg) => return Some(Ok(msg)),
                    Err(e) => {
                        warn!(error = %e, "Undecodable upstream frame");
                        return Some(Err(e.into()));
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = ws.send(Message::Pong(payload)).await {
                        return Some(Err(e.into()));
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Binary(_))) => {
                    debug!("Ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.ws = None;
                    return None;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    self.ws = None;
                    return Some(Err(e.into()));
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
    }
}
