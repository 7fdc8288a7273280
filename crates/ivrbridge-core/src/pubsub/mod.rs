//! Pub/Sub Adapter (component D).
//!
//! A pluggable contract over a durable or in-memory message bus that
//! preserves keyed ordering. The adapter implementation itself (a real
//! durable log or broker client) is an external collaborator out of scope
//! for this design; only the trait seam and an in-memory test backend live
//! here.

mod memory;

pub use memory::InMemoryPubSub;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Audio topic record (§6 "Pub/Sub topics").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTopicRecord {
    pub tenant_id: String,
    pub interaction_id: String,
    pub seq: u64,
    pub timestamp_ms: u64,
    pub sample_rate_hz: u32,
    pub encoding: String,
    /// Base64-encoded PCM16 payload, kept opaque at the transport boundary.
    pub audio: String,
}

/// Call-end topic record (§6 "Pub/Sub topics").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEndRecord {
    pub interaction_id: String,
    pub tenant_id: String,
    pub call_sid: Option<String>,
    pub stream_sid: Option<String>,
    pub reason: String,
    pub timestamp_ms: u64,
}

/// A message published on a topic. Carries its keyed-ordering identity
/// alongside an opaque JSON payload so the transport stays
/// serialization-agnostic.
#[derive(Debug, Clone)]
pub struct PubSubMessage {
    pub key: String,
    pub payload: serde_json::Value,
}

impl PubSubMessage {
    #[must_use]
    pub fn new(key: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            key: key.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("adapter closed")]
    Closed,
}

/// Uniform contract every pub/sub backend implements (§4.D).
#[async_trait]
pub trait PubSubAdapter: Send + Sync {
    /// Publishes `message` on `topic`. At-least-once; per-key order is
    /// preserved when the backend supports keyed streams.
    async fn publish(&self, topic: &str, message: PubSubMessage) -> Result<(), PubSubError>;

    /// Subscribes to `topic`, receiving messages with at-least-once
    /// delivery. Consumer-group partitioning is a backend concern; this
    /// seam only exposes the broadcast side needed by in-process tests and
    /// health checks.
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<PubSubMessage>;

    /// Releases backend resources. Idempotent.
    async fn close(&self);

    /// Cheap health probe used by the `/health` endpoint (§6). Returns
    /// `true` when the adapter believes it can currently publish.
    fn is_healthy(&self) -> bool {
        true
    }
}
