//! WebSocket upgrade dispatch and the two per-connection protocol loops
//! (component C).
//!
//! Grounded on the axum `ws` feature's split-socket idiom: a
//! `WebSocketUpgrade` extractor decides the protocol from the
//! `Authorization` header before handing the socket off to whichever loop
//! owns it for the rest of the connection's life.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::Deserialize;

use crate::error::IngestError;
use crate::frame::looks_like_control_json;
use crate::native::{NativeEvent, NativeIngestHandler, NativeReply};
use crate::telephony::events::TelephonyEvent;
use crate::telephony::TelephonySessionHandler;

use super::AppState;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
}

enum Route {
    Native,
    Telephony,
    Unauthorized,
}

fn classify(headers: &HeaderMap, state: &AppState) -> Route {
    let auth = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    match auth {
        Some(value) if value.starts_with("Bearer ") => {
            let Some(key) = &state.jwt_decoding_key else {
                return Route::Unauthorized;
            };
            let token = &value["Bearer ".len()..];
            match decode::<Claims>(token, key, &Validation::new(Algorithm::RS256)) {
                Ok(_) => Route::Native,
                Err(_) => Route::Unauthorized,
            }
        }
        Some(value) if value.starts_with("Basic ") => {
            if state.support_exotel && state.exo_bridge_enabled {
                Route::Telephony
            } else {
                Route::Unauthorized
            }
        }
        None => {
            if state.support_exotel && state.exo_bridge_enabled {
                Route::Telephony
            } else {
                Route::Unauthorized
            }
        }
        Some(_) => Route::Unauthorized,
    }
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match classify(&headers, &state) {
        Route::Native => ws.on_upgrade(move |socket| run_native(socket, state)),
        Route::Telephony => ws.on_upgrade(move |socket| run_telephony(socket, state)),
        Route::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized").into_response(),
    }
}

async fn run_native(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let mut handler = NativeIngestHandler::new(
        state.pubsub.clone(),
        state.ack_interval,
        state.buffer_duration_ms,
        state.amplification_factor,
    );

    while let Some(Ok(message)) = stream.next().await {
        let reply = match message {
            Message::Text(text) => match serde_json::from_str::<NativeEvent>(&text) {
                Ok(NativeEvent::Start(start)) => match handler.handle_start(start) {
                    Ok(reply) => Some(reply),
                    Err(err) if is_fatal_native_error(&err) => {
                        log::warn!("[ingress] fatal native start error: {err}");
                        close_with_error(&mut sink, &err.to_string()).await;
                        return;
                    }
                    Err(err) => {
                        log::warn!("[ingress] native start rejected: {err}");
                        None
                    }
                },
                Err(err) => {
                    log::warn!("[ingress] malformed native start: {err}");
                    None
                }
            },
            Message::Binary(payload) => match handler.handle_binary_frame(Bytes::from(payload)).await {
                Ok(reply) => reply,
                Err(err) if is_fatal_native_error(&err) => {
                    log::warn!("[ingress] fatal native frame error: {err}");
                    close_with_error(&mut sink, &err.to_string()).await;
                    return;
                }
                Err(err) => {
                    log::warn!("[ingress] native frame rejected: {err}");
                    None
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => None,
        };

        if let Some(reply) = reply {
            if send_json(&mut sink, &reply).await.is_err() {
                break;
            }
        }
    }
}

/// Errors that leave the connection in a state no further frame can
/// recover from: an undeclared encoding or a frame arriving before `start`
/// both mean the session was never (or can never be) established.
/// Per-frame data errors (odd length, implausible size) stay soft per
/// §4.A and the loop just drops the frame and continues.
fn is_fatal_native_error(err: &IngestError) -> bool {
    matches!(
        err,
        IngestError::DisallowedEncoding(_) | IngestError::MalformedControl(_)
    )
}

/// §6 "Close code 1011 on fatal handler errors".
async fn close_with_error(sink: &mut futures_util::stream::SplitSink<WebSocket, Message>, reason: &str) {
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::ERROR,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn run_telephony(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let mut handler = TelephonySessionHandler::new(
        state.pubsub.clone(),
        state.call_registry.clone(),
        state.buffer_duration_ms,
        state.amplification_factor,
    );

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => Some(text.to_string()),
            Message::Binary(payload) if looks_like_control_json(&payload) => {
                String::from_utf8(payload.to_vec()).ok()
            }
            Message::Binary(_) => None,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => None,
        };

        let Some(text) = text else { continue };
        match serde_json::from_str::<TelephonyEvent>(&text) {
            Ok(event) => {
                if let Err(err) = handler.handle_event(event).await {
                    log::warn!("[ingress] telephony event rejected: {err}");
                }
            }
            Err(err) => log::warn!("[ingress] malformed telephony event: {err}"),
        }
    }

    handler.handle_socket_close().await;
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "stream ended".into(),
        })))
        .await;
}

async fn send_json(
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    reply: &NativeReply,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(reply).unwrap_or_default();
    sink.send(Message::Text(text.into())).await
}
