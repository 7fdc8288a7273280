//! Call Registry Hook (component L).
//!
//! A fire-and-forget external notification published on the control topic:
//! on `start`, a registration record; on call end, the call-end record
//! already defined for the control topic. Delivery failure is logged at
//! warn level and never blocks or fails the call.

use std::sync::Arc;

use serde::Serialize;

use crate::pubsub::{CallEndRecord, PubSubAdapter, PubSubMessage};

pub const CONTROL_TOPIC: &str = "call-control";

/// Call-start registration record (§4.L).
#[derive(Debug, Clone, Serialize)]
pub struct CallStartRecord {
    pub interaction_id: String,
    pub tenant_id: String,
    pub call_sid: Option<String>,
    pub stream_sid: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub started_at_ms: u64,
}

pub struct CallRegistry {
    pubsub: Arc<dyn PubSubAdapter>,
}

impl CallRegistry {
    #[must_use]
    pub fn new(pubsub: Arc<dyn PubSubAdapter>) -> Self {
        Self { pubsub }
    }

    /// Publishes a call-start record. Never propagates a delivery error to
    /// the caller; logs at warn level instead.
    pub async fn register_start(&self, record: CallStartRecord) {
        let key = record.interaction_id.clone();
        let message = PubSubMessage::new(key, &record);
        if let Err(err) = self.pubsub.publish(CONTROL_TOPIC, message).await {
            log::warn!(
                "[registry] failed to publish call start for {}: {err}",
                record.interaction_id
            );
        }
    }

    /// Publishes a call-end record. Same at-least-once, never-blocks
    /// semantics as [`Self::register_start`].
    pub async fn register_end(&self, record: CallEndRecord) {
        let key = record.interaction_id.clone();
        let message = PubSubMessage::new(key, &record);
        if let Err(err) = self.pubsub.publish(CONTROL_TOPIC, message).await {
            log::warn!(
                "[registry] failed to publish call end for {}: {err}",
                record.interaction_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::InMemoryPubSub;

    #[tokio::test]
    async fn register_start_publishes_on_control_topic() {
        let pubsub = Arc::new(InMemoryPubSub::new());
        let mut rx = pubsub.subscribe(CONTROL_TOPIC);
        let registry = CallRegistry::new(pubsub);
        registry
            .register_start(CallStartRecord {
                interaction_id: "call-1".to_string(),
                tenant_id: "t1".to_string(),
                call_sid: Some("CA1".to_string()),
                stream_sid: Some("MZ1".to_string()),
                from: None,
                to: None,
                started_at_ms: 0,
            })
            .await;
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.key, "call-1");
    }

    #[tokio::test]
    async fn register_end_never_panics_on_closed_adapter() {
        let pubsub = Arc::new(InMemoryPubSub::new());
        pubsub.close().await;
        let registry = CallRegistry::new(pubsub);
        registry
            .register_end(CallEndRecord {
                interaction_id: "call-1".to_string(),
                tenant_id: "t1".to_string(),
                call_sid: None,
                stream_sid: None,
                reason: "stop".to_string(),
                timestamp_ms: 0,
            })
            .await;
    }
}
