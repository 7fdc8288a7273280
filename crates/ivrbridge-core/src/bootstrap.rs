//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;

use jsonwebtoken::DecodingKey;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::asr::{AsrProvider, MockAsrProvider, ProviderSessionManager};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{Config, PubSubBackend};
use crate::error::{ConfigError, PipelineError, PipelineResult};
use crate::logging::VerboseLimiter;
use crate::protocol_constants::{HEALTH_CHECK_PERIOD, KEEPALIVE_PERIOD};
use crate::pubsub::{InMemoryPubSub, PubSubAdapter};
use crate::registry::CallRegistry;
use crate::runtime::{TaskSpawner, TokioSpawner};

/// Container for all bootstrapped services.
///
/// Consumed by the binary to build the axum router and drive shutdown.
pub struct BootstrappedServices {
    pub config: Config,
    pub pubsub: Arc<dyn PubSubAdapter>,
    pub call_registry: Arc<CallRegistry>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub session_manager: Arc<ProviderSessionManager>,
    pub app_state: Arc<AppState>,
    cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown: stops the keepalive/health sweep, closes
    /// every live provider session, then the pub/sub adapter.
    pub async fn shutdown(&self) {
        log::info!("[bootstrap] beginning graceful shutdown");
        self.cancel_token.cancel();
        self.session_manager.close_all().await;
        self.pubsub.close().await;
        log::info!("[bootstrap] shutdown complete");
    }
}

fn load_jwt_decoding_key(config: &Config) -> PipelineResult<Option<Arc<DecodingKey>>> {
    let Some(path) = &config.jwt_public_key_path else {
        return Ok(None);
    };
    let pem = std::fs::read(path).map_err(|err| {
        PipelineError::Config(ConfigError::InvalidValue {
            key: "JWT_PUBLIC_KEY_PATH",
            reason: format!("failed to read {}: {err}", path.display()),
        })
    })?;
    let key = DecodingKey::from_rsa_pem(&pem).map_err(|err| {
        PipelineError::Config(ConfigError::InvalidValue {
            key: "JWT_PUBLIC_KEY_PATH",
            reason: format!("not a valid RSA public key: {err}"),
        })
    })?;
    Ok(Some(Arc::new(key)))
}

/// Constructs the pub/sub adapter named by configuration. Only the
/// in-memory backend has a concrete implementation in this binary; the
/// durable-log and broker variants are real external adapters this design
/// names as out-of-scope collaborators (§4.D), so selecting one without
/// supplying a concrete adapter via [`bootstrap_services_with`] is a fatal
/// startup error rather than a silent fallback.
fn default_pubsub(config: &Config) -> PipelineResult<Arc<dyn PubSubAdapter>> {
    match &config.pubsub_backend {
        PubSubBackend::InMemory => Ok(Arc::new(InMemoryPubSub::new())),
        PubSubBackend::DurableLog { .. } | PubSubBackend::Broker { .. } => {
            Err(PipelineError::Config(ConfigError::InvalidValue {
                key: "PUBSUB_ADAPTER",
                reason: "no durable-log/broker adapter is linked into this binary; \
                         use bootstrap_services_with to supply one, or set \
                         PUBSUB_ADAPTER=in-memory"
                    .to_string(),
            }))
        }
    }
}

/// Bootstraps with the default (in-memory-only) pub/sub adapter and the
/// mock ASR provider, suitable for local development and tests.
pub fn bootstrap_services(config: Config) -> PipelineResult<BootstrappedServices> {
    let pubsub = default_pubsub(&config)?;
    if config.asr_provider != "mock" {
        return Err(PipelineError::Config(ConfigError::InvalidValue {
            key: "ASR_PROVIDER",
            reason: format!(
                "no adapter for provider {:?} is linked into this binary; use \
                 bootstrap_services_with to supply one",
                config.asr_provider
            ),
        }));
    }
    let provider: Arc<dyn AsrProvider> = Arc::new(MockAsrProvider::new());
    bootstrap_services_with(config, pubsub, provider)
}

/// Bootstraps with caller-supplied pub/sub and ASR provider implementations
/// (the seam a production deployment or an integration test uses to plug in
/// a real durable-log client or a real ASR vendor SDK adapter).
pub fn bootstrap_services_with(
    config: Config,
    pubsub: Arc<dyn PubSubAdapter>,
    provider: Arc<dyn AsrProvider>,
) -> PipelineResult<BootstrappedServices> {
    let jwt_decoding_key = load_jwt_decoding_key(&config)?;

    let call_registry = Arc::new(CallRegistry::new(pubsub.clone()));
    let circuit_breaker = Arc::new(CircuitBreaker::new());
    let session_manager = Arc::new(ProviderSessionManager::new(
        provider,
        circuit_breaker.clone(),
        config.provider_tuning.clone(),
    ));

    let app_state = Arc::new(AppState {
        pubsub: pubsub.clone(),
        call_registry: call_registry.clone(),
        session_manager: session_manager.clone(),
        circuit_breaker: circuit_breaker.clone(),
        buffer_duration_ms: config.buffer_duration_ms,
        ack_interval: config.ack_interval,
        amplification_factor: config.provider_tuning.amplification_factor,
        support_exotel: config.support_exotel,
        exo_bridge_enabled: config.exo_bridge_enabled,
        jwt_decoding_key,
    });

    let cancel_token = CancellationToken::new();
    spawn_audio_consumer(&pubsub, &session_manager, cancel_token.clone());
    spawn_session_sweep(&session_manager, cancel_token.clone());

    Ok(BootstrappedServices {
        config,
        pubsub,
        call_registry,
        circuit_breaker,
        session_manager,
        app_state,
        cancel_token,
    })
}

/// Subscribes to the audio topic and drives every published frame through
/// the Provider Session Manager, per the data flow `D → G` (§1).
fn spawn_audio_consumer(
    pubsub: &Arc<dyn PubSubAdapter>,
    session_manager: &Arc<ProviderSessionManager>,
    cancel_token: CancellationToken,
) {
    let mut rx = pubsub.subscribe(crate::telephony::AUDIO_TOPIC);
    let session_manager = session_manager.clone();
    let spawner = TokioSpawner::current();
    let verbose = VerboseLimiter::default();
    spawner.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                received = rx.recv() => {
                    match received {
                        Ok(message) => {
                            if let Some(frame) = decode_audio_message(&message) {
                                let outcome = session_manager.send_chunk(frame).await;
                                crate::verbose_log!(verbose, "asr.chunk_outcome", "[asr] chunk outcome: {outcome:?}");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("[asr] audio consumer lagged, skipped {skipped} messages");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });
}

/// Decodes a pub/sub-carried audio record back into an [`AudioFrame`].
///
/// Validation-only: the ingress handlers already ran A.3-5 (plausibility
/// scan + amplification) before publishing, so this re-checks shape as
/// defense-in-depth against a malformed or foreign publisher on the same
/// topic, without amplifying a payload that may already have been.
fn decode_audio_message(message: &crate::pubsub::PubSubMessage) -> Option<crate::frame::AudioFrame> {
    let record: crate::pubsub::AudioTopicRecord =
        serde_json::from_value(message.payload.clone()).ok()?;
    let payload = crate::frame::decode_base64_audio(&record.audio)?;
    if !crate::frame::is_plausible_frame_size(payload.len(), record.sample_rate_hz) {
        log::warn!(
            "[asr] dropping implausibly-sized frame from pub/sub for {}: {} bytes at {}Hz",
            record.interaction_id,
            payload.len(),
            record.sample_rate_hz
        );
        return None;
    }
    Some(crate::frame::AudioFrame {
        tenant_id: record.tenant_id,
        interaction_id: record.interaction_id,
        seq: record.seq,
        timestamp_ms: record.timestamp_ms,
        sample_rate_hz: record.sample_rate_hz,
        payload,
    })
}

/// Periodic keepalive + health-check sweep over every live session (§4.G).
fn spawn_session_sweep(session_manager: &Arc<ProviderSessionManager>, cancel_token: CancellationToken) {
    let session_manager = session_manager.clone();
    let spawner = TokioSpawner::current();
    spawner.spawn(async move {
        let mut keepalive_tick = tokio::time::interval(KEEPALIVE_PERIOD);
        let mut health_tick = tokio::time::interval(HEALTH_CHECK_PERIOD);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = keepalive_tick.tick() => {
                    for id in session_manager.active_interaction_ids() {
                        session_manager.keepalive_tick(&id).await;
                    }
                }
                _ = health_tick.tick() => {
                    for id in session_manager.active_interaction_ids() {
                        session_manager.health_check_tick(&id).await;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_config() -> Config {
        Config {
            port: 8080,
            buffer_duration_ms: 5_000,
            ack_interval: 50,
            ssl_key_path: None,
            ssl_cert_path: None,
            jwt_public_key_path: None,
            pubsub_backend: PubSubBackend::InMemory,
            support_exotel: true,
            exo_bridge_enabled: true,
            exo_max_buffer_ms: 2_000,
            asr_provider: "mock".to_string(),
            asr_api_key: None,
            provider_tuning: crate::config::ProviderTuning::default(),
            log_level: log::LevelFilter::Info,
        }
    }

    #[tokio::test]
    async fn bootstrap_with_defaults_succeeds_and_shuts_down() {
        let services = bootstrap_services(in_memory_config()).unwrap();
        services.shutdown().await;
    }

    #[test]
    fn durable_log_without_override_is_fatal() {
        let mut config = in_memory_config();
        config.pubsub_backend = PubSubBackend::DurableLog {
            url: "redis://localhost".to_string(),
        };
        assert!(bootstrap_services(config).is_err());
    }

    #[test]
    fn non_mock_provider_without_override_is_fatal() {
        let mut config = in_memory_config();
        config.asr_provider = "real-vendor".to_string();
        assert!(bootstrap_services(config).is_err());
    }
}
