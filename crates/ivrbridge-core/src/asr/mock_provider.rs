//! Deterministic mock ASR provider (§1 "the mock provider used for tests",
//! §10.D). Named out of scope for production use but in-scope as the test
//! double that exercises the Provider Session Manager and ingress path
//! without any network dependency.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::error::ProviderError;

use super::{AsrProvider, ProviderChunk, ProviderEvent, Transcript, TranscriptKind};

/// Echoes back a final transcript containing the chunk's seq and byte
/// count, so tests can assert on ordering and matching without needing
/// real speech audio.
///
/// In `push_driven` mode (see [`Self::new_push_driven`]) it instead mimics
/// a continuous-recognition provider: `send_audio_chunk` always returns an
/// empty transcript, and results are delivered only through
/// [`Self::push_event`], exercising the same out-of-band resolution path a
/// real continuous-recognition adapter would use.
pub struct MockAsrProvider {
    sessions: DashMap<String, u32>,
    event_sinks: DashMap<String, mpsc::UnboundedSender<ProviderEvent>>,
    chunks_seen: AtomicU64,
    commits_seen: AtomicU64,
    push_driven: bool,
}

impl MockAsrProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            event_sinks: DashMap::new(),
            chunks_seen: AtomicU64::new(0),
            commits_seen: AtomicU64::new(0),
            push_driven: false,
        }
    }

    /// A provider that never resolves `send_audio_chunk` synchronously;
    /// every transcript must arrive through [`Self::push_event`].
    #[must_use]
    pub fn new_push_driven() -> Self {
        Self {
            push_driven: true,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn chunks_seen(&self) -> u64 {
        self.chunks_seen.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn commits_seen(&self) -> u64 {
        self.commits_seen.load(Ordering::Relaxed)
    }

    /// Pushes a [`ProviderEvent`] through the sink registered for
    /// `interaction_id`, if any. Returns `false` if no sink is registered
    /// yet (the session hasn't sent its first chunk).
    pub fn push_event(&self, interaction_id: &str, event: ProviderEvent) -> bool {
        self.event_sinks
            .get(interaction_id)
            .is_some_and(|sink| sink.send(event).is_ok())
    }
}

impl Default for MockAsrProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsrProvider for MockAsrProvider {
    async fn open_session(&self, interaction_id: &str, sample_rate_hz: u32) -> Result<(), ProviderError> {
        self.sessions.insert(interaction_id.to_string(), sample_rate_hz);
        Ok(())
    }

    async fn send_audio_chunk(&self, chunk: ProviderChunk) -> Result<Transcript, ProviderError> {
        if !self.sessions.contains_key(&chunk.interaction_id) {
            return Err(ProviderError::Permanent("session not open".to_string()));
        }
        self.chunks_seen.fetch_add(1, Ordering::Relaxed);
        if self.push_driven {
            return Ok(Transcript::empty());
        }
        Ok(Transcript {
            kind: TranscriptKind::Final,
            text: format!("chunk-{}-{}bytes", chunk.seq, chunk.audio.len()),
            confidence: Some(1.0),
            is_final: true,
            seq: Some(chunk.seq),
        })
    }

    fn register_event_sink(&self, interaction_id: &str, sink: mpsc::UnboundedSender<ProviderEvent>) {
        self.event_sinks.insert(interaction_id.to_string(), sink);
    }

    async fn send_keepalive(&self, interaction_id: &str) -> Result<(), ProviderError> {
        if self.sessions.contains_key(interaction_id) {
            Ok(())
        } else {
            Err(ProviderError::Unknown("no such session".to_string()))
        }
    }

    async fn send_commit(&self, interaction_id: &str) -> Result<(), ProviderError> {
        if self.sessions.contains_key(interaction_id) {
            self.commits_seen.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            Err(ProviderError::Unknown("no such session".to_string()))
        }
    }

    async fn close_connection(&self, interaction_id: &str) -> Result<(), ProviderError> {
        self.sessions.remove(interaction_id);
        Ok(())
    }

    async fn close(&self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn chunk_before_open_is_permanent_error() {
        let provider = MockAsrProvider::new();
        let chunk = ProviderChunk {
            interaction_id: "call-1".to_string(),
            seq: 1,
            sample_rate_hz: 8000,
            audio: Bytes::from_static(b"\x00\x00"),
        };
        let err = provider.send_audio_chunk(chunk).await.unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));
    }

    #[tokio::test]
    async fn open_then_send_returns_final_transcript() {
        let provider = MockAsrProvider::new();
        provider.open_session("call-1", 8000).await.unwrap();
        let chunk = ProviderChunk {
            interaction_id: "call-1".to_string(),
            seq: 1,
            sample_rate_hz: 8000,
            audio: Bytes::from_static(b"\x00\x00\x00\x00"),
        };
        let transcript = provider.send_audio_chunk(chunk).await.unwrap();
        assert!(transcript.is_final);
        assert_eq!(transcript.seq, Some(1));
        assert_eq!(provider.chunks_seen(), 1);
    }

    #[tokio::test]
    async fn close_connection_removes_session() {
        let provider = MockAsrProvider::new();
        provider.open_session("call-1", 8000).await.unwrap();
        provider.close_connection("call-1").await.unwrap();
        assert!(provider.send_keepalive("call-1").await.is_err());
    }
}
