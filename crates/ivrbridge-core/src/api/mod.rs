//! Ingress Server (component C): one WebSocket path dispatching between the
//! native and telephony protocols, plus `GET /health`.

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use jsonwebtoken::DecodingKey;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::asr::ProviderSessionManager;
use crate::circuit_breaker::CircuitBreaker;
use crate::pubsub::PubSubAdapter;
use crate::registry::CallRegistry;

/// Shared state reachable from every handler.
pub struct AppState {
    pub pubsub: Arc<dyn PubSubAdapter>,
    pub call_registry: Arc<CallRegistry>,
    pub session_manager: Arc<ProviderSessionManager>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub buffer_duration_ms: u64,
    pub ack_interval: u32,
    pub amplification_factor: i32,
    pub support_exotel: bool,
    pub exo_bridge_enabled: bool,
    pub jwt_decoding_key: Option<Arc<DecodingKey>>,
}

/// Builds the full router: `/v1/ingest` (WebSocket) and `/health`.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ingest", get(ws::ws_handler))
        .route("/health", get(http::health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
