//! Startup configuration (component K / §10.C).
//!
//! Parsed once, eagerly, from environment variables before any service is
//! constructed. Every numeric knob is range-checked and every cross-field
//! constraint is verified before the process binds a socket; any violation
//! is `ConfigError`, which the binary treats as fatal.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::protocol_constants::DEFAULT_COMMIT_VAD_SILENCE;

/// Selects the pub/sub backend (component D).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubBackend {
    /// Default: a durable keyed log.
    DurableLog { url: String },
    /// A message broker.
    Broker { url: String },
    /// In-memory adapter, test-only.
    InMemory,
}

/// Provider-specific tuning knobs (§6 "Provider tuning").
#[derive(Debug, Clone)]
pub struct ProviderTuning {
    pub model: String,
    pub language: String,
    pub vad_silence: Duration,
    pub vad_threshold: f64,
    pub min_speech_ms: u64,
    pub min_silence_ms: u64,
    pub amplification_factor: i32,
    pub keepalive_enabled: bool,
    pub max_reconnect: u32,
    pub include_timestamps: bool,
    /// Whether the configured provider uses an explicit commit sentinel
    /// rather than committing implicitly on every chunk (§4.G step 6).
    pub explicit_commit: bool,
}

impl Default for ProviderTuning {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            language: "en-US".to_string(),
            vad_silence: DEFAULT_COMMIT_VAD_SILENCE,
            vad_threshold: 0.5,
            min_speech_ms: 250,
            min_silence_ms: 500,
            amplification_factor: 4,
            keepalive_enabled: true,
            max_reconnect: crate::protocol_constants::MAX_RECONNECT_ATTEMPTS,
            include_timestamps: false,
            explicit_commit: true,
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub buffer_duration_ms: u64,
    pub ack_interval: u32,
    pub ssl_key_path: Option<PathBuf>,
    pub ssl_cert_path: Option<PathBuf>,
    pub jwt_public_key_path: Option<PathBuf>,
    pub pubsub_backend: PubSubBackend,
    pub support_exotel: bool,
    pub exo_bridge_enabled: bool,
    pub exo_max_buffer_ms: u64,
    pub asr_provider: String,
    pub asr_api_key: Option<String>,
    pub provider_tuning: ProviderTuning,
    pub log_level: log::LevelFilter,
}

fn parse_range<T>(key: &'static str, raw: &str, min: T, max: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let value: T = raw.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        reason: format!("{raw:?} is not a valid number"),
    })?;
    if value < min || value > max {
        return Err(ConfigError::InvalidValue {
            key,
            reason: format!("{value} out of range [{min}..{max}]"),
        });
    }
    Ok(value)
}

fn env_var(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &'static str, default: bool) -> bool {
    env_var(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Loads and validates configuration from the process environment.
    ///
    /// # Errors
    /// Returns `ConfigError` on any invalid value, missing required
    /// secret, or violated cross-field constraint. The caller should treat
    /// this as fatal and exit before binding any socket.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env_var("PORT") {
            Some(raw) => parse_range("PORT", &raw, 1u16, 65535u16)?,
            None => 8080,
        };

        let buffer_duration_ms = match env_var("BUFFER_DURATION_MS") {
            Some(raw) => parse_range("BUFFER_DURATION_MS", &raw, 100u64, 30_000u64)?,
            None => 5_000,
        };

        let ack_interval = match env_var("ACK_INTERVAL") {
            Some(raw) => parse_range("ACK_INTERVAL", &raw, 1u32, 1_000u32)?,
            None => 50,
        };

        let ssl_key_path = env_var("SSL_KEY_PATH").map(PathBuf::from);
        let ssl_cert_path = env_var("SSL_CERT_PATH").map(PathBuf::from);
        if ssl_key_path.is_some() != ssl_cert_path.is_some() {
            return Err(ConfigError::CrossField(
                "SSL_KEY_PATH and SSL_CERT_PATH must both be set or both unset".to_string(),
            ));
        }

        let jwt_public_key_path = env_var("JWT_PUBLIC_KEY_PATH").map(PathBuf::from);

        let pubsub_backend = match env_var("PUBSUB_ADAPTER").as_deref() {
            None | Some("durable-log") => PubSubBackend::DurableLog {
                url: env_var("PUBSUB_URL").ok_or(ConfigError::Missing {
                    key: "PUBSUB_URL",
                })?,
            },
            Some("broker") => PubSubBackend::Broker {
                url: env_var("PUBSUB_URL").ok_or(ConfigError::Missing {
                    key: "PUBSUB_URL",
                })?,
            },
            Some("in-memory") => PubSubBackend::InMemory,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "PUBSUB_ADAPTER",
                    reason: format!("unknown backend {other:?}"),
                })
            }
        };

        let support_exotel = env_bool("SUPPORT_EXOTEL", false);
        let exo_bridge_enabled = env_bool("EXO_BRIDGE_ENABLED", false);

        let exo_max_buffer_ms = match env_var("EXO_MAX_BUFFER_MS") {
            Some(raw) => parse_range("EXO_MAX_BUFFER_MS", &raw, 100u64, 10_000u64)?,
            None => 2_000,
        };

        let asr_provider = env_var("ASR_PROVIDER").unwrap_or_else(|| "mock".to_string());
        let asr_api_key = env_var("ASR_API_KEY");
        if asr_provider != "mock" && asr_api_key.is_none() {
            return Err(ConfigError::Missing { key: "ASR_API_KEY" });
        }

        let mut provider_tuning = ProviderTuning::default();
        if let Some(raw) = env_var("ASR_MODEL") {
            provider_tuning.model = raw;
        }
        if let Some(raw) = env_var("ASR_LANGUAGE") {
            provider_tuning.language = raw;
        }
        if let Some(raw) = env_var("ASR_VAD_SILENCE_MS") {
            let ms: u64 = parse_range("ASR_VAD_SILENCE_MS", &raw, 1u64, 10_000u64)?;
            provider_tuning.vad_silence = Duration::from_millis(ms);
        }
        if let Some(raw) = env_var("ASR_VAD_THRESHOLD") {
            provider_tuning.vad_threshold =
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "ASR_VAD_THRESHOLD",
                    reason: format!("{raw:?} is not a valid float"),
                })?;
        }
        if let Some(raw) = env_var("ASR_MIN_SPEECH_MS") {
            provider_tuning.min_speech_ms = parse_range("ASR_MIN_SPEECH_MS", &raw, 0u64, 10_000u64)?;
        }
        if let Some(raw) = env_var("ASR_MIN_SILENCE_MS") {
            provider_tuning.min_silence_ms =
                parse_range("ASR_MIN_SILENCE_MS", &raw, 0u64, 10_000u64)?;
        }
        if let Some(raw) = env_var("ASR_AMPLIFICATION_FACTOR") {
            provider_tuning.amplification_factor =
                parse_range("ASR_AMPLIFICATION_FACTOR", &raw, 1i32, 32i32)?;
        }
        provider_tuning.keepalive_enabled = env_bool("ASR_KEEPALIVE_ENABLED", true);
        if let Some(raw) = env_var("ASR_MAX_RECONNECT") {
            provider_tuning.max_reconnect = parse_range("ASR_MAX_RECONNECT", &raw, 0u32, 10u32)?;
        }
        provider_tuning.include_timestamps = env_bool("ASR_INCLUDE_TIMESTAMPS", false);
        provider_tuning.explicit_commit = env_bool("ASR_EXPLICIT_COMMIT", true);

        let log_level = match env_var("LOG_LEVEL").as_deref() {
            None | Some("info") => log::LevelFilter::Info,
            Some("debug") => log::LevelFilter::Debug,
            Some("warn") => log::LevelFilter::Warn,
            Some("error") => log::LevelFilter::Error,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "LOG_LEVEL",
                    reason: format!("unknown level {other:?}"),
                })
            }
        };

        Ok(Self {
            port,
            buffer_duration_ms,
            ack_interval,
            ssl_key_path,
            ssl_cert_path,
            jwt_public_key_path,
            pubsub_backend,
            support_exotel,
            exo_bridge_enabled,
            exo_max_buffer_ms,
            asr_provider,
            asr_api_key,
            provider_tuning,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "PORT",
            "BUFFER_DURATION_MS",
            "ACK_INTERVAL",
            "SSL_KEY_PATH",
            "SSL_CERT_PATH",
            "PUBSUB_ADAPTER",
            "PUBSUB_URL",
            "SUPPORT_EXOTEL",
            "EXO_BRIDGE_ENABLED",
            "EXO_MAX_BUFFER_MS",
            "ASR_PROVIDER",
            "ASR_API_KEY",
            "LOG_LEVEL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn defaults_with_in_memory_pubsub_are_valid() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("PUBSUB_ADAPTER", "in-memory");
        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.pubsub_backend, PubSubBackend::InMemory);
    }

    #[test]
    fn non_memory_backend_requires_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("PUBSUB_ADAPTER", "durable-log");
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.code(), "config_missing_value");
        clear_env();
    }

    #[test]
    fn ssl_requires_both_paths() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("PUBSUB_ADAPTER", "in-memory");
        env::set_var("SSL_KEY_PATH", "/tmp/key.pem");
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.code(), "config_cross_field");
        clear_env();
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("PUBSUB_ADAPTER", "in-memory");
        env::set_var("PORT", "70000");
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.code(), "config_invalid_value");
        clear_env();
    }

    #[test]
    fn non_mock_provider_requires_api_key() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("PUBSUB_ADAPTER", "in-memory");
        env::set_var("ASR_PROVIDER", "real-provider");
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.code(), "config_missing_value");
        clear_env();
    }
}
