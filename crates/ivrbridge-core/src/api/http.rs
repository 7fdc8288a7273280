//! `GET /health` (component C).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::circuit_breaker::BreakerState;

use super::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum HealthStatus {
    Ok,
    Degraded,
    Down,
}

#[derive(Serialize)]
struct HealthMetrics {
    active_sessions: usize,
}

#[derive(Serialize)]
struct HealthBody {
    status: HealthStatus,
    pubsub_ok: bool,
    exotel_bridge: bool,
    metrics: HealthMetrics,
}

/// §6 "HTTP": 200 healthy, 200 `"degraded"` on pub/sub failure, 503
/// otherwise. The "otherwise" condition is the provider control-plane
/// circuit breaker sitting Open: every new session would fail to create,
/// which is a harder failure than a degraded pub/sub path.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pubsub_ok = state.pubsub.is_healthy();
    let breaker_open = state.circuit_breaker.state() == BreakerState::Open;

    let (status, code) = if breaker_open {
        (HealthStatus::Down, StatusCode::SERVICE_UNAVAILABLE)
    } else if !pubsub_ok {
        (HealthStatus::Degraded, StatusCode::OK)
    } else {
        (HealthStatus::Ok, StatusCode::OK)
    };

    let body = HealthBody {
        status,
        pubsub_ok,
        exotel_bridge: state.exo_bridge_enabled,
        metrics: HealthMetrics {
            active_sessions: state.session_manager.active_interaction_ids().len(),
        },
    };
    (code, Json(body))
}
