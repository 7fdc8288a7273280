//! ASR Provider Abstraction (component F) and the subsystems built on top
//! of it: Audio Quality Gate (H), Pending-Work Tracker (I), and the
//! Provider Session Manager (G).

pub mod mock_provider;
pub mod pending;
pub mod quality_gate;
pub mod session_manager;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ProviderError;

pub use mock_provider::MockAsrProvider;
pub use session_manager::ProviderSessionManager;

/// One chunk of audio submitted to a provider (§4.F).
#[derive(Debug, Clone)]
pub struct ProviderChunk {
    pub interaction_id: String,
    pub seq: u64,
    pub sample_rate_hz: u32,
    pub audio: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    Partial,
    Final,
}

/// A transcript result (§4.F). An empty `text` with no `seq` means
/// "processed, nothing to emit yet" and is a normal, expected outcome.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub kind: TranscriptKind,
    pub text: String,
    pub confidence: Option<f32>,
    pub is_final: bool,
    /// Echoed sequence number, when the provider supplies one (§4.I).
    pub seq: Option<u64>,
}

impl Transcript {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kind: TranscriptKind::Partial,
            text: String::new(),
            confidence: None,
            is_final: false,
            seq: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Tagged provider events a session adapter translates its SDK's untyped
/// payloads into once, per §9's "untyped dynamic event payloads" note.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    SessionStarted,
    Partial { text: String, seq: Option<u64> },
    Final { text: String, seq: Option<u64>, confidence: Option<f32> },
    KeepAliveAck,
    Error { kind: ProviderErrorKind, message: String },
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    InvalidAudioFormat,
    InvalidCredentials,
    Network,
    Timeout,
    Quota,
    Other,
}

impl ProviderErrorKind {
    #[must_use]
    pub fn into_provider_error(self, message: impl Into<String>) -> ProviderError {
        let message = message.into();
        match self {
            Self::InvalidAudioFormat | Self::InvalidCredentials => {
                ProviderError::Permanent(message)
            }
            Self::Network | Self::Timeout => ProviderError::Transient(message),
            Self::Quota => ProviderError::Quota(message),
            Self::Other => ProviderError::Unknown(message),
        }
    }
}

/// Uniform contract every streaming ASR provider implements (§4.F).
///
/// Keyed-session providers deliver transcripts synchronously through
/// [`Self::send_audio_chunk`]'s return value. Continuous-recognition
/// providers instead return an immediate empty transcript from
/// `send_audio_chunk` and push [`ProviderEvent`]s asynchronously into the
/// sink registered via [`Self::register_event_sink`] — the Provider Session
/// Manager resolves its pending-work tracker from either path.
#[async_trait]
pub trait AsrProvider: Send + Sync {
    /// Opens (or confirms open) the per-call session and returns once the
    /// socket-open and session-started milestones are both reached.
    async fn open_session(&self, interaction_id: &str, sample_rate_hz: u32) -> Result<(), ProviderError>;

    /// Submits one chunk and returns whatever transcript the provider is
    /// ready to hand back right now (possibly empty).
    async fn send_audio_chunk(&self, chunk: ProviderChunk) -> Result<Transcript, ProviderError>;

    /// Registers the sink a continuous-recognition adapter pushes
    /// out-of-band [`ProviderEvent`]s into for this session. Providers that
    /// only ever resolve through `send_audio_chunk`'s return value can
    /// leave this at its no-op default.
    fn register_event_sink(&self, _interaction_id: &str, _sink: tokio::sync::mpsc::UnboundedSender<ProviderEvent>) {}

    /// Sends a keepalive sentinel on the session's text channel.
    async fn send_keepalive(&self, interaction_id: &str) -> Result<(), ProviderError>;

    /// Issues an explicit commit for providers whose commit strategy
    /// requires one (§4.G step 6). Providers that commit implicitly on
    /// every chunk can leave this at its no-op default.
    async fn send_commit(&self, _interaction_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Graceful per-call teardown: emits a close-stream sentinel if the
    /// provider supports one, drains outstanding transcripts.
    async fn close_connection(&self, interaction_id: &str) -> Result<(), ProviderError>;

    /// Global teardown.
    async fn close(&self);
}
