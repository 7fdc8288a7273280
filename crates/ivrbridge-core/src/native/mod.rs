//! Native Bearer-token protocol (part of component C, the Ingress Server).
//!
//! Simpler than the telephony protocol: one `start` text frame establishes
//! the call, then raw binary PCM16 frames follow, acknowledged every
//! `ACK_INTERVAL` frames.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::buffer::BoundedFallbackBuffer;
use crate::error::IngestError;
use crate::frame::{validate_and_amplify, AudioFrame};
use crate::pubsub::{AudioTopicRecord, PubSubAdapter, PubSubMessage};
use crate::telephony::AUDIO_TOPIC;
use crate::utils::now_millis;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum NativeEvent {
    Start(NativeStartEvent),
}

#[derive(Debug, Deserialize)]
pub struct NativeStartEvent {
    pub interaction_id: String,
    pub tenant_id: String,
    pub sample_rate: u32,
    pub encoding: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum NativeReply {
    Started { interaction_id: String },
    Ack { seq: u64 },
}

/// Per-connection driver for the native protocol: validates `start`,
/// assigns `seq` to binary frames, acks every `ack_interval` frames.
pub struct NativeIngestHandler {
    pubsub: Arc<dyn PubSubAdapter>,
    ack_interval: u32,
    amplification_factor: i32,
    fallback: BoundedFallbackBuffer,
    interaction_id: Option<String>,
    tenant_id: Option<String>,
    sample_rate_hz: u32,
    seq_counter: u64,
    frames_since_ack: u32,
}

impl NativeIngestHandler {
    #[must_use]
    pub fn new(
        pubsub: Arc<dyn PubSubAdapter>,
        ack_interval: u32,
        buffer_duration_ms: u64,
        amplification_factor: i32,
    ) -> Self {
        Self {
            pubsub,
            ack_interval: ack_interval.max(1),
            amplification_factor,
            fallback: BoundedFallbackBuffer::new(buffer_duration_ms),
            interaction_id: None,
            tenant_id: None,
            sample_rate_hz: 8000,
            seq_counter: 0,
            frames_since_ack: 0,
        }
    }

    /// Validates and applies a `start` event, returning the `started` reply.
    pub fn handle_start(&mut self, start: NativeStartEvent) -> Result<NativeReply, IngestError> {
        if start.encoding != "pcm16" {
            return Err(IngestError::DisallowedEncoding(start.encoding));
        }
        self.interaction_id = Some(start.interaction_id.clone());
        self.tenant_id = Some(start.tenant_id);
        self.sample_rate_hz = start.sample_rate;
        Ok(NativeReply::Started {
            interaction_id: start.interaction_id,
        })
    }

    /// Ingests one raw binary PCM16 frame, publishing it and returning an
    /// ack when the interval boundary is reached.
    pub async fn handle_binary_frame(&mut self, payload: Bytes) -> Result<Option<NativeReply>, IngestError> {
        let (interaction_id, tenant_id) = match (&self.interaction_id, &self.tenant_id) {
            (Some(i), Some(t)) => (i.clone(), t.clone()),
            _ => return Err(IngestError::MalformedControl("binary frame before start".to_string())),
        };
        if payload.len() % 2 != 0 {
            return Err(IngestError::OddLength(payload.len()));
        }
        let payload = validate_and_amplify(payload, self.sample_rate_hz, self.amplification_factor)?;

        self.seq_counter += 1;
        let frame = AudioFrame {
            tenant_id,
            interaction_id,
            seq: self.seq_counter,
            timestamp_ms: now_millis(),
            sample_rate_hz: self.sample_rate_hz,
            payload,
        };

        self.publish_with_fallback(frame).await;

        self.frames_since_ack += 1;
        if self.frames_since_ack >= self.ack_interval {
            self.frames_since_ack = 0;
            Ok(Some(NativeReply::Ack {
                seq: self.seq_counter,
            }))
        } else {
            Ok(None)
        }
    }

    async fn publish_with_fallback(&mut self, frame: AudioFrame) {
        let mut backlog = if self.fallback.is_empty() {
            Vec::new()
        } else {
            self.fallback.drain()
        };
        backlog.push(frame);

        for pending in backlog {
            let record = AudioTopicRecord {
                tenant_id: pending.tenant_id.clone(),
                interaction_id: pending.interaction_id.clone(),
                seq: pending.seq,
                timestamp_ms: pending.timestamp_ms,
                sample_rate_hz: pending.sample_rate_hz,
                encoding: "pcm16".to_string(),
                audio: base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    &pending.payload,
                ),
            };
            let message = PubSubMessage::new(pending.interaction_id.clone(), &record);
            if let Err(err) = self.pubsub.publish(AUDIO_TOPIC, message).await {
                log::warn!(
                    "[native] publish failed for {}: {err}, buffering",
                    pending.interaction_id
                );
                let enqueued_at = now_millis();
                self.fallback.push(pending, enqueued_at);
            }
        }
    }
}
