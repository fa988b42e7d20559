//! Walkie server binary — the main entry point for the walkie platform.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, and graceful shutdown on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use walkie_server::{app, config, AppState};
use walkie_voice::{ClassifierConfig, HttpSttClient, IntentClassifier, SpeechToText, SttConfig};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("WALKIE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("walkie.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = walkie_db::create_pool(
        &config.database.url,
        walkie_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.url in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = walkie_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let classifier = IntentClassifier::new(ClassifierConfig::new(
        config.ai.base_url.clone(),
        config.ai.model.clone(),
        config.ai.api_key.clone(),
    ))
    .expect("failed to build intent classifier");

    let stt: Option<Arc<dyn SpeechToText>> =
        match HttpSttClient::new(SttConfig::new(config.stt.endpoint.clone())) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "speech-to-text disabled");
                None
            }
        };

    let shutdown_tx = tokio::sync::broadcast::channel(1).0;
    let state = AppState {
        pool,
        registry: walkie_server::registry::ConnectionRegistry::new(),
        audio_queue: walkie_server::audio_queue::AudioQueue::default(),
        stt,
        classifier: Arc::new(classifier),
        token_ttl: Duration::from_secs(config.auth.token_ttl_secs),
        allowed_ws_origins: config.ws.allowed_origins.clone(),
        shutdown_tx: shutdown_tx.clone(),
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting walkie server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Deferred transmission stops die with the process instead of firing
    // into closed sockets.
    let _ = shutdown_tx.send(());

    tracing::info!("walkie server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
