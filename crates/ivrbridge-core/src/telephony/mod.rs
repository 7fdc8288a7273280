//! Telephony Session Handler (component B).
//!
//! Owns the `stream_sid` → [`CallSession`] mapping for one socket, parses
//! the telephony JSON event stream, normalizes the declared sample rate,
//! assigns `seq`, and publishes audio frames onto the Pub/Sub Adapter with
//! the Bounded Fallback Buffer as a publish-failure backstop.

pub mod events;

use std::sync::Arc;

use bytes::Bytes;

use crate::buffer::BoundedFallbackBuffer;
use crate::error::IngestError;
use crate::frame::{decode_base64_audio, validate_and_amplify, AudioFrame};
use crate::pubsub::{AudioTopicRecord, CallEndRecord, PubSubAdapter, PubSubMessage};
use crate::registry::{CallRegistry, CallStartRecord};
use crate::utils::now_millis;

use events::{MediaEvent, StartEvent, StopEvent, TelephonyEvent};

pub const AUDIO_TOPIC: &str = "telephony-audio";
pub const CONTROL_TOPIC: &str = crate::registry::CONTROL_TOPIC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    New,
    Active,
    Terminated,
}

/// Ingress-side call state (§3 "Call Session").
pub struct CallSession {
    pub stream_sid: String,
    pub call_sid: Option<String>,
    pub account_sid: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub sample_rate_hz: u32,
    pub custom_parameters: std::collections::HashMap<String, String>,
    state: CallState,
    seq_counter: u64,
}

impl CallSession {
    /// `interaction_id = call_sid` if present else `stream_sid` (§3).
    #[must_use]
    pub fn interaction_id(&self) -> &str {
        self.call_sid.as_deref().unwrap_or(&self.stream_sid)
    }

    /// Tenant routing key. The telephony protocol has no first-class tenant
    /// field, so `account_sid` stands in for it when present.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        self.account_sid.as_deref().unwrap_or("unknown")
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        self.state
    }

    fn next_seq(&mut self) -> u64 {
        self.seq_counter += 1;
        self.seq_counter
    }
}

/// Sample-rate policy at `start` (§4.B): 8000/16000 pass through unchanged,
/// 24000 is relabeled 16000, anything else defaults to 8000 with a warning.
#[must_use]
pub fn normalize_sample_rate(raw: &str) -> u32 {
    match raw.parse::<u32>() {
        Ok(8000) => 8000,
        Ok(16000) => 16000,
        Ok(24000) => 16000,
        Ok(other) => {
            log::warn!("[telephony] unknown sample rate {other}, defaulting to 8000");
            8000
        }
        Err(_) => {
            log::warn!("[telephony] unparseable sample rate {raw:?}, defaulting to 8000");
            8000
        }
    }
}

/// Per-connection driver for the telephony event state machine. One
/// instance per WebSocket; owns no reference to provider state (§3
/// "Ownership").
pub struct TelephonySessionHandler {
    pubsub: Arc<dyn PubSubAdapter>,
    registry: Arc<CallRegistry>,
    buffer_duration_ms: u64,
    amplification_factor: i32,
    session: Option<CallSession>,
    fallback: Option<BoundedFallbackBuffer>,
}

impl TelephonySessionHandler {
    #[must_use]
    pub fn new(
        pubsub: Arc<dyn PubSubAdapter>,
        registry: Arc<CallRegistry>,
        buffer_duration_ms: u64,
        amplification_factor: i32,
    ) -> Self {
        Self {
            pubsub,
            registry,
            buffer_duration_ms,
            amplification_factor,
            session: None,
            fallback: None,
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    /// Dispatches one parsed telephony event, per the §4.B state table.
    pub async fn handle_event(&mut self, event: TelephonyEvent) -> Result<(), IngestError> {
        match event {
            TelephonyEvent::Connected => Ok(()),
            TelephonyEvent::Start(start) => {
                self.handle_start(start).await;
                Ok(())
            }
            TelephonyEvent::Media(media) => self.handle_media(media).await,
            TelephonyEvent::Stop(stop) => {
                self.handle_stop(stop).await;
                Ok(())
            }
            TelephonyEvent::Dtmf(_) | TelephonyEvent::Mark(_) => Ok(()),
        }
    }

    async fn handle_start(&mut self, start: StartEvent) {
        let sample_rate_hz = normalize_sample_rate(&start.start.media_format.sample_rate);
        let session = CallSession {
            stream_sid: start.stream_sid.clone(),
            call_sid: start.start.call_sid.clone(),
            account_sid: start.start.account_sid.clone(),
            from: start.start.from.clone(),
            to: start.start.to.clone(),
            sample_rate_hz,
            custom_parameters: start.start.custom_parameters.clone(),
            state: CallState::Active,
            seq_counter: 0,
        };

        self.registry
            .register_start(CallStartRecord {
                interaction_id: session.interaction_id().to_string(),
                tenant_id: session.tenant_id().to_string(),
                call_sid: session.call_sid.clone(),
                stream_sid: Some(session.stream_sid.clone()),
                from: session.from.clone(),
                to: session.to.clone(),
                started_at_ms: now_millis(),
            })
            .await;

        self.fallback = Some(BoundedFallbackBuffer::new(self.buffer_duration_ms));
        self.session = Some(session);
    }

    async fn handle_media(&mut self, media: MediaEvent) -> Result<(), IngestError> {
        let Some(session) = self.session.as_mut() else {
            return Err(IngestError::UnknownInteraction(media.stream_sid));
        };
        if session.state() != CallState::Active {
            return Err(IngestError::UnknownInteraction(media.stream_sid));
        }

        let payload: Bytes =
            decode_base64_audio(&media.media.payload).ok_or(IngestError::InvalidBase64)?;
        if payload.len() % 2 != 0 {
            return Err(IngestError::OddLength(payload.len()));
        }
        let payload = validate_and_amplify(payload, session.sample_rate_hz, self.amplification_factor)?;

        let frame = AudioFrame {
            tenant_id: session.tenant_id().to_string(),
            interaction_id: session.interaction_id().to_string(),
            seq: session.next_seq(),
            timestamp_ms: now_millis(),
            sample_rate_hz: session.sample_rate_hz,
            payload,
        };

        self.publish_with_fallback(frame).await;
        Ok(())
    }

    async fn publish_with_fallback(&mut self, frame: AudioFrame) {
        let fallback = self
            .fallback
            .get_or_insert_with(|| BoundedFallbackBuffer::new(self.buffer_duration_ms));

        // Flush anything already pending for this call before sending the
        // new frame, to preserve order (§4.E).
        let mut backlog = if fallback.is_empty() {
            Vec::new()
        } else {
            fallback.drain()
        };
        backlog.push(frame);

        for pending in backlog {
            if let Err(err) = publish_audio_frame(&self.pubsub, &pending).await {
                log::warn!(
                    "[telephony] publish failed for {}: {err}, buffering",
                    pending.interaction_id
                );
                let enqueued_at = now_millis();
                self.fallback
                    .get_or_insert_with(|| BoundedFallbackBuffer::new(self.buffer_duration_ms))
                    .push(pending, enqueued_at);
            }
        }
    }

    async fn handle_stop(&mut self, stop: StopEvent) {
        self.end_call(stop.stop.call_sid, stop.stop.reason.unwrap_or_else(|| "stop".to_string()))
            .await;
    }

    /// Called on socket close in place of an explicit `stop` event.
    pub async fn handle_socket_close(&mut self) {
        if self.session.is_some() {
            self.end_call(None, "socket-close".to_string()).await;
        }
    }

    async fn end_call(&mut self, call_sid_override: Option<String>, reason: String) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Some(call_sid) = call_sid_override {
            session.call_sid.get_or_insert(call_sid);
        }
        session.state = CallState::Terminated;

        let record = CallEndRecord {
            interaction_id: session.interaction_id().to_string(),
            tenant_id: session.tenant_id().to_string(),
            call_sid: session.call_sid.clone(),
            stream_sid: Some(session.stream_sid.clone()),
            reason,
            timestamp_ms: now_millis(),
        };
        self.registry.register_end(record).await;
        self.fallback = None;
    }
}

async fn publish_audio_frame(
    pubsub: &Arc<dyn PubSubAdapter>,
    frame: &AudioFrame,
) -> Result<(), crate::pubsub::PubSubError> {
    let record = AudioTopicRecord {
        tenant_id: frame.tenant_id.clone(),
        interaction_id: frame.interaction_id.clone(),
        seq: frame.seq,
        timestamp_ms: frame.timestamp_ms,
        sample_rate_hz: frame.sample_rate_hz,
        encoding: "pcm16".to_string(),
        audio: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &frame.payload),
    };
    let message = PubSubMessage::new(frame.interaction_id.clone(), &record);
    pubsub.publish(AUDIO_TOPIC, message).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::InMemoryPubSub;

    fn handler() -> TelephonySessionHandler {
        let pubsub: Arc<dyn PubSubAdapter> = Arc::new(InMemoryPubSub::new());
        let registry = Arc::new(CallRegistry::new(pubsub.clone()));
        TelephonySessionHandler::new(pubsub, registry, 5_000, 4)
    }

    fn start_event(sample_rate: &str) -> TelephonyEvent {
        let raw = format!(
            r#"{{"event":"start","stream_sid":"MZ1","start":{{"call_sid":"CA1","account_sid":"AC1","media_format":{{"encoding":"audio/x-mulaw","sample_rate":"{sample_rate}"}}}}}}"#
        );
        serde_json::from_str(&raw).unwrap()
    }

    fn media_event(payload_b64: &str) -> TelephonyEvent {
        let raw = format!(
            r#"{{"event":"media","stream_sid":"MZ1","media":{{"payload":"{payload_b64}"}}}}"#
        );
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn sample_rate_24000_normalizes_to_16000() {
        assert_eq!(normalize_sample_rate("24000"), 16000);
        assert_eq!(normalize_sample_rate("8000"), 8000);
        assert_eq!(normalize_sample_rate("garbage"), 8000);
        assert_eq!(normalize_sample_rate("9999"), 8000);
    }

    #[tokio::test]
    async fn start_then_media_assigns_dense_increasing_seq() {
        let mut handler = handler();
        handler.handle_event(start_event("8000")).await.unwrap();
        assert_eq!(handler.session().unwrap().interaction_id(), "CA1");

        let payload = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            [0u8; 640],
        );
        handler
            .handle_event(media_event(&payload))
            .await
            .unwrap();
        handler
            .handle_event(media_event(&payload))
            .await
            .unwrap();
        // Internal seq_counter is private; assert indirectly via a third
        // media event continuing to succeed (no panics, no state error).
        handler
            .handle_event(media_event(&payload))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn media_before_start_is_unknown_interaction() {
        let mut handler = handler();
        let err = handler
            .handle_event(media_event("AAAA"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownInteraction(_)));
    }

    #[tokio::test]
    async fn stop_clears_session_and_publishes_call_end() {
        let pubsub: Arc<dyn PubSubAdapter> = Arc::new(InMemoryPubSub::new());
        let registry = Arc::new(CallRegistry::new(pubsub.clone()));
        let mut rx = pubsub.subscribe(CONTROL_TOPIC);
        let mut handler = TelephonySessionHandler::new(pubsub, registry, 5_000, 4);

        handler.handle_event(start_event("8000")).await.unwrap();
        let _ = rx.recv().await.unwrap(); // call-start record

        let raw = r#"{"event":"stop","stream_sid":"MZ1","stop":{"call_sid":"CA1","reason":"callended"}}"#;
        let stop: TelephonyEvent = serde_json::from_str(raw).unwrap();
        handler.handle_event(stop).await.unwrap();

        assert!(handler.session().is_none());
        let end = rx.recv().await.unwrap();
        assert_eq!(end.payload["reason"], "callended");
    }

    #[tokio::test]
    async fn socket_close_publishes_call_end_with_reason() {
        let pubsub: Arc<dyn PubSubAdapter> = Arc::new(InMemoryPubSub::new());
        let registry = Arc::new(CallRegistry::new(pubsub.clone()));
        let mut rx = pubsub.subscribe(CONTROL_TOPIC);
        let mut handler = TelephonySessionHandler::new(pubsub, registry, 5_000, 4);

        handler.handle_event(start_event("16000")).await.unwrap();
        let _ = rx.recv().await.unwrap();

        handler.handle_socket_close().await;
        let end = rx.recv().await.unwrap();
        assert_eq!(end.payload["reason"], "socket-close");
    }
}
