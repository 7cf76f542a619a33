//! The full delivery channel surface (§6 Server -> Client events) plus a
//! per-connection registry the Orchestrator uses to look the channel up from
//! timer callbacks and Pacer completion callbacks, both of which only carry a
//! `ConnectionId`.
//!
//! `Channel` extends `pacer::DeliveryChannel` (the narrow `ai_block`-only
//! surface the Pacer needs) with the other three server-to-client event
//! kinds; a concrete transport only has to implement one trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::pacer::DeliveryChannel;
use crate::session::ConnectionId;

#[async_trait]
pub trait Channel: DeliveryChannel {
    /// Echo confirmation of a `user_message` event (§6).
    async fn send_message_received(&self, id: &str, text: &str, timestamp: DateTime<Utc>) -> bool;

    /// Buffer drained or stop acknowledged (§6).
    async fn send_ai_complete(&self) -> bool;

    async fn send_error(&self, message: &str, error: Option<String>) -> bool;
}

/// Process-wide map from connection id to its live channel, populated on
/// WebSocket upgrade and removed on disconnect/end-chat cleanup.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ConnectionId, Arc<dyn Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: ConnectionId, channel: Arc<dyn Channel>) {
        self.channels.write().await.insert(id, channel);
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<dyn Channel>> {
        self.channels.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: ConnectionId) {
        self.channels.write().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct NoopChannel;

    #[async_trait]
    impl DeliveryChannel for NoopChannel {
        fn is_connected(&self) -> bool {
            true
        }
        async fn send_ai_block(&self, _text: &str, _group: i64, _timestamp: DateTime<Utc>) -> bool {
            true
        }
    }

    #[async_trait]
    impl Channel for NoopChannel {
        async fn send_message_received(&self, _id: &str, _text: &str, _timestamp: DateTime<Utc>) -> bool {
            true
        }
        async fn send_ai_complete(&self) -> bool {
            true
        }
        async fn send_error(&self, _message: &str, _error: Option<String>) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn register_then_get_then_remove() {
        let registry = ChannelRegistry::new();
        let id = Uuid::new_v4();
        assert!(registry.get(id).await.is_none());
        registry.register(id, Arc::new(NoopChannel)).await;
        assert!(registry.get(id).await.is_some());
        assert_eq!(registry.len().await, 1);
        registry.remove(id).await;
        assert!(registry.get(id).await.is_none());
    }
}
