//! A wrapper around the outbound half of one WebSocket connection.
//!
//! Grounded on the reference's `WebSocketConnection` (`src/api/ws/chat/connection.rs`
//! in the teacher repo's sibling `mira` crate): a `Mutex`-guarded `SplitSink`,
//! a closed flag that is set on first send failure and checked before every
//! subsequent send, and `send`+`flush` issued together so buffered frames
//! can't be silently dropped under rapid emission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::pacer::DeliveryChannel;
use crate::transport::messages::WsServerMessage;

pub struct Connection {
    sender: Mutex<SplitSink<WebSocket, Message>>,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Arc<Self> {
        Arc::new(Self {
            sender: Mutex::new(sender),
            closed: AtomicBool::new(false),
        })
    }

    /// §5: "emission must check channel.connected ... and bail out silently
    /// if dead." Both Orchestrator and Pacer call this before emitting.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn send(&self, message: WsServerMessage) -> bool {
        if self.is_closed() {
            debug!("skipping send on closed connection");
            return false;
        }

        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize server message");
                return false;
            }
        };

        let mut sender = self.sender.lock().await;
        if let Err(e) = sender.send(Message::Text(json)).await {
            warn!(error = %e, "send failed; marking connection closed");
            drop(sender);
            self.closed.store(true, Ordering::SeqCst);
            return false;
        }
        if let Err(e) = sender.flush().await {
            warn!(error = %e, "flush failed; marking connection closed");
            drop(sender);
            self.closed.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }
}

#[async_trait]
impl DeliveryChannel for Connection {
    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    async fn send_ai_block(&self, text: &str, group: i64, timestamp: DateTime<Utc>) -> bool {
        self.send(WsServerMessage::AiBlock {
            text: text.to_string(),
            group,
            timestamp,
        })
        .await
    }
}

#[async_trait]
impl Channel for Connection {
    async fn send_message_received(&self, id: &str, text: &str, timestamp: DateTime<Utc>) -> bool {
        self.send(WsServerMessage::MessageReceived {
            id: id.to_string(),
            text: text.to_string(),
            sender: "user",
            timestamp,
        })
        .await
    }

    async fn send_ai_complete(&self) -> bool {
        self.send(WsServerMessage::AiComplete {}).await
    }

    async fn send_error(&self, message: &str, error: Option<String>) -> bool {
        self.send(WsServerMessage::Error {
            message: message.to_string(),
            error,
        })
        .await
    }
}
