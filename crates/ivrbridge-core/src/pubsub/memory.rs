//! In-memory pub/sub backend. Test-only, per §4.D's backend list.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{PubSubAdapter, PubSubError, PubSubMessage};

const CHANNEL_CAPACITY: usize = 256;

/// Keeps one broadcast channel per topic, created lazily on first
/// publish or subscribe.
pub struct InMemoryPubSub {
    topics: DashMap<String, broadcast::Sender<PubSubMessage>>,
    closed: AtomicBool,
}

impl InMemoryPubSub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<PubSubMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubAdapter for InMemoryPubSub {
    async fn publish(&self, topic: &str, message: PubSubMessage) -> Result<(), PubSubError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PubSubError::Closed);
        }
        let sender = self.sender_for(topic);
        // No subscribers is not a failure for an at-least-once bus; a
        // message published with nobody listening is simply dropped.
        let _ = sender.send(message);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<PubSubMessage> {
        self.sender_for(topic).subscribe()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.topics.clear();
    }

    fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let pubsub = InMemoryPubSub::new();
        let mut rx = pubsub.subscribe("audio");
        pubsub
            .publish("audio", PubSubMessage::new("call-1", json!({"seq": 1})))
            .await
            .unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.key, "call-1");
    }

    #[tokio::test]
    async fn closed_adapter_rejects_publish() {
        let pubsub = InMemoryPubSub::new();
        pubsub.close().await;
        let result = pubsub
            .publish("audio", PubSubMessage::new("call-1", json!({})))
            .await;
        assert!(matches!(result, Err(PubSubError::Closed)));
        assert!(!pubsub.is_healthy());
    }

    #[tokio::test]
    async fn per_key_order_preserved_within_one_topic() {
        let pubsub = InMemoryPubSub::new();
        let mut rx = pubsub.subscribe("audio");
        for seq in 1..=3 {
            pubsub
                .publish("audio", PubSubMessage::new("call-1", json!({"seq": seq})))
                .await
                .unwrap();
        }
        for expected in 1..=3 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.payload["seq"], expected);
        }
    }
}
