//! WebSocket live sessions.
//!
//! The first client frame is a JSON handshake `{userId, token, channel?}`.
//! After verification the session lands in the registry and only the
//! server writes meaningful frames: binary audio and text control frames.
//! The server pings every 30 s and closes sessions that stop ponging.

use crate::auth;
use crate::registry::{OutboundFrame, OUTBOUND_BUFFER};
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::header::HOST;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_WAIT: Duration = Duration::from_secs(60);

/// First frame sent by the client.
#[derive(Debug, Deserialize)]
struct Handshake {
    #[serde(rename = "userId", default)]
    user_id: i64,
    #[serde(default)]
    token: String,
    #[serde(default)]
    channel: String,
}

/// GET /ws
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !origin_allowed(&state, &headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Empty origins are allowed (non-browser clients); configured origins and
/// same-host origins pass; everything else is rejected.
fn origin_allowed(state: &Arc<AppState>, headers: &HeaderMap) -> bool {
    let origin = headers
        .get("origin")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if origin.is_empty() {
        return true;
    }

    if state.allowed_ws_origins.iter().any(|allowed| allowed == origin) {
        return true;
    }

    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if !host.is_empty() && (origin == format!("http://{host}") || origin == format!("https://{host}"))
    {
        return true;
    }

    tracing::warn!(origin, host, "websocket origin blocked");
    false
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let raw = match tokio::time::timeout(HANDSHAKE_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => text.to_string(),
        _ => {
            tracing::debug!("websocket closed before handshake");
            return;
        }
    };

    let handshake: Handshake = match serde_json::from_str(&raw) {
        Ok(handshake) => handshake,
        Err(_) => {
            let _ = socket.send(Message::Text("Handshake inválido".into())).await;
            return;
        }
    };
    if handshake.user_id <= 0 || handshake.token.trim().is_empty() {
        let _ = socket.send(Message::Text("Handshake inválido".into())).await;
        return;
    }

    let declared_channel = handshake.channel.trim();
    let user = match auth::verify_session_handshake(
        &state,
        handshake.user_id,
        handshake.token.trim(),
        declared_channel,
    )
    .await
    {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(user = handshake.user_id, error = %e, "session handshake rejected");
            let _ = socket
                .send(Message::Text("Sesión no autorizada".into()))
                .await;
            return;
        }
    };

    let channel = if declared_channel.is_empty() {
        user.current_channel_code().to_string()
    } else {
        declared_channel.to_string()
    };

    let (tx, rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_BUFFER);
    let session_id = state.registry.register(user.id, &channel, tx);

    tracing::info!(user = user.id, channel = %channel, "live session established");

    let ack = json!({
        "message": "Conexión establecida",
        "channel": channel,
    })
    .to_string();
    if socket.send(Message::Text(ack.into())).await.is_err() {
        state.registry.remove(user.id, session_id);
        return;
    }

    let (sender, receiver) = socket.split();
    let last_pong = Arc::new(Mutex::new(Instant::now()));

    let write_task = tokio::spawn(write_pump(sender, rx, Arc::clone(&last_pong)));
    read_pump(receiver, last_pong).await;

    state.registry.remove(user.id, session_id);
    write_task.abort();
    tracing::info!(user = user.id, channel = %channel, "live session closed");
}

/// Forwards registry frames to the socket and keeps the ping schedule.
async fn write_pump(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
    last_pong: Arc<Mutex<Instant>>,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so pings start
    // one interval from now.
    ping.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(OutboundFrame::Audio(payload)) => {
                    if sender
                        .send(Message::Binary(payload.as_ref().clone().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(OutboundFrame::Control(text)) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(OutboundFrame::Close) | None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                let stale = last_pong
                    .lock()
                    .map(|at| at.elapsed() > PONG_WAIT)
                    .unwrap_or(true);
                if stale {
                    tracing::info!("client stopped ponging, closing session");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Drains the client side of the socket. Clients do not send audio on
/// this path; only pongs and close frames matter.
async fn read_pump(mut receiver: SplitStream<WebSocket>, last_pong: Arc<Mutex<Instant>>) {
    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Pong(_) => {
                if let Ok(mut at) = last_pong.lock() {
                    *at = Instant::now();
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}
