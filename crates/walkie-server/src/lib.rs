//! Walkie server library logic.
//!
//! Wires the membership service, the voice pipeline, the in-memory
//! connection registry and audio queue into an axum application. The
//! binary in `main.rs` loads configuration, runs migrations, and serves
//! the router built here.

pub mod api_audio;
pub mod api_channels;
pub mod api_ws;
pub mod audio_queue;
pub mod auth;
pub mod commands;
pub mod config;
pub mod registry;
pub mod transmission;

use audio_queue::AudioQueue;
use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use registry::ConnectionRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use walkie_db::DbPool;
use walkie_voice::{IntentAnalyzer, SpeechToText};

/// Largest request body `/audio/ingest` accepts (20 MiB of WAV).
pub const MAX_INGEST_BYTES: usize = 20 * 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Live WebSocket sessions, indexed by user and by channel.
    pub registry: ConnectionRegistry,
    /// Per-recipient pending audio with TTL eviction.
    pub audio_queue: AudioQueue,
    /// Speech-to-text upstream. `None` when not configured.
    pub stt: Option<Arc<dyn SpeechToText>>,
    /// Intent classifier.
    pub classifier: Arc<dyn IntentAnalyzer>,
    /// Auth tokens older than this are expired.
    pub token_ttl: Duration,
    /// Origins allowed to open WebSocket connections.
    pub allowed_ws_origins: Vec<String>,
    /// Broadcast used to cancel deferred tasks on shutdown.
    pub shutdown_tx: broadcast::Sender<()>,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth", post(auth::authenticate_handler))
        .route(
            "/audio/ingest",
            post(api_audio::audio_ingest_handler)
                .layer(DefaultBodyLimit::max(MAX_INGEST_BYTES + 64 * 1024)),
        )
        .route("/audio/poll", get(api_audio::audio_poll_handler))
        .route("/channels/public", get(api_channels::list_public_channels_handler))
        .route("/channel-users", get(api_channels::channel_users_handler))
        .route("/ws", get(api_ws::ws_handler))
        .layer(Extension(Arc::new(state)))
}
