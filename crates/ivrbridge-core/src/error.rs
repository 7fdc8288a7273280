//! Centralized error types for the ivrbridge core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Startup configuration failures. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("missing required value for {key}")]
    Missing { key: &'static str },

    #[error("{0}")]
    CrossField(String),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidValue { .. } => "config_invalid_value",
            Self::Missing { .. } => "config_missing_value",
            Self::CrossField(_) => "config_cross_field",
        }
    }
}

/// Protocol/transport errors reaching the ingress boundary (§7 "Protocol").
///
/// These are soft failures at the frame level: the caller logs and drops the
/// offending frame rather than tearing down the connection, except where the
/// error surfaces through an HTTP response (e.g. a failed upgrade).
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum IngestError {
    #[error("malformed control payload: {0}")]
    MalformedControl(String),

    #[error("invalid base64 payload")]
    InvalidBase64,

    #[error("disallowed encoding: {0}")]
    DisallowedEncoding(String),

    #[error("odd-length PCM16 payload ({0} bytes)")]
    OddLength(usize),

    #[error("implausible frame size ({payload_len} bytes at {sample_rate_hz}Hz)")]
    ImplausibleFrameSize { payload_len: usize, sample_rate_hz: u32 },

    #[error("unauthorized")]
    Unauthorized,

    #[error("unknown interaction: {0}")]
    UnknownInteraction(String),
}

impl ErrorCode for IngestError {
    fn code(&self) -> &'static str {
        match self {
            Self::MalformedControl(_) => "malformed_control",
            Self::InvalidBase64 => "invalid_base64",
            Self::DisallowedEncoding(_) => "disallowed_encoding",
            Self::OddLength(_) => "odd_length_payload",
            Self::ImplausibleFrameSize { .. } => "implausible_frame_size",
            Self::Unauthorized => "unauthorized",
            Self::UnknownInteraction(_) => "unknown_interaction",
        }
    }
}

impl IngestError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UnknownInteraction(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Categorized provider errors (§4.G, §7).
///
/// Permanent errors never trigger reconnect; transient errors do, bounded by
/// `MAX_RECONNECT_ATTEMPTS`; quota is treated as permanent for the session but
/// does not affect other calls; unknown errors are logged and ignored.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("permanent provider error: {0}")]
    Permanent(String),

    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider quota exceeded: {0}")]
    Quota(String),

    #[error("unrecognized provider error: {0}")]
    Unknown(String),
}

impl ErrorCode for ProviderError {
    fn code(&self) -> &'static str {
        match self {
            Self::Permanent(_) => "provider_permanent",
            Self::Transient(_) => "provider_transient",
            Self::Quota(_) => "provider_quota",
            Self::Unknown(_) => "provider_unknown",
        }
    }
}

impl ProviderError {
    /// True for errors the circuit breaker should count as failures and the
    /// session manager should retry with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Crate-wide error type for code paths that need one return type (bootstrap,
/// top-level composition). Individual components keep returning their own
/// typed error; this exists only to unify them at call sites that cross
/// domains.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for PipelineError {
    fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Ingest(e) => e.code(),
            Self::Provider(e) => e.code(),
            Self::Internal(_) => "internal_error",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_401() {
        let err = IngestError::Unauthorized;
        assert_eq!(err.code(), "unauthorized");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unknown_interaction_maps_to_404() {
        let err = IngestError::UnknownInteraction("abc".into());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn transient_provider_error_is_transient() {
        assert!(ProviderError::Transient("timeout".into()).is_transient());
        assert!(!ProviderError::Permanent("bad creds".into()).is_transient());
    }
}
