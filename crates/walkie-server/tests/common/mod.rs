//! Shared setup for walkie-server integration tests.
//!
//! Builds a real application over a file-backed temporary database, with
//! stubbed STT and classifier collaborators, served on an ephemeral TCP
//! port so WebSocket tests can drive it with a real client.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use walkie_channels::{connect_user, create_user, store_credentials};
use walkie_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use walkie_server::audio_queue::AudioQueue;
use walkie_server::registry::ConnectionRegistry;
use walkie_server::{app, AppState};
use walkie_types::ClassificationResult;
use walkie_voice::{IntentAnalyzer, SpeechToText, VoiceError};

/// STT double: a fixed transcript, or an upstream failure when `None`.
pub struct StubSpeech(pub Option<String>);

#[async_trait]
impl SpeechToText for StubSpeech {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, VoiceError> {
        match &self.0 {
            Some(text) => Ok(text.clone()),
            None => Err(VoiceError::Stt("stub transcriber down".to_string())),
        }
    }
}

/// Classifier double: a fixed result, or an upstream failure when `None`.
/// Counts how many times it was consulted.
pub struct StubClassifier {
    pub result: Option<ClassificationResult>,
    pub calls: AtomicUsize,
}

impl StubClassifier {
    pub fn returning(result: ClassificationResult) -> Arc<Self> {
        Arc::new(Self {
            result: Some(result),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            result: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentAnalyzer for StubClassifier {
    async fn analyze(
        &self,
        _transcript: &str,
        _channels: &[String],
        _current_state: &str,
        _pending_channel: &str,
    ) -> Result<ClassificationResult, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Some(result) => Ok(result.clone()),
            None => Err(VoiceError::Classifier("stub classifier down".to_string())),
        }
    }
}

/// A running application instance.
pub struct TestApp {
    pub addr: SocketAddr,
    pub router: Router,
    pub pool: DbPool,
    pub state: AppState,
    _dir: tempfile::TempDir,
}

/// Builds and serves the application with the given collaborators.
pub async fn spawn_app(
    stt: Option<Arc<dyn SpeechToText>>,
    classifier: Arc<dyn IntentAnalyzer>,
) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("walkie.db");
    let pool = create_pool(
        db_path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("pool creation");
    {
        let conn = pool.get().expect("connection");
        run_migrations(&conn).expect("migrations");
    }

    let state = AppState {
        pool: pool.clone(),
        registry: ConnectionRegistry::new(),
        audio_queue: AudioQueue::default(),
        stt,
        classifier,
        token_ttl: Duration::from_secs(86_400),
        allowed_ws_origins: Vec::new(),
        shutdown_tx: tokio::sync::broadcast::channel(1).0,
    };

    let router = app(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let serve_router = router.clone();
    tokio::spawn(async move {
        axum::serve(listener, serve_router).await.expect("server failed");
    });

    TestApp {
        addr,
        router,
        pool,
        state,
        _dir: dir,
    }
}

/// Creates a user whose token is the given string, and returns their id.
pub fn seed_user(pool: &DbPool, name: &str, token: &str) -> i64 {
    let conn = pool.get().expect("connection");
    let user = create_user(&conn, name, None, Utc::now()).expect("create user");
    store_credentials(
        &conn,
        user.id,
        &walkie_server::auth::token_digest(token),
        Utc::now(),
    )
    .expect("store credentials");
    user.id
}

/// Joins a user to a channel directly through the membership service.
pub fn join_channel(pool: &DbPool, user_id: i64, code: &str) {
    let mut conn = pool.get().expect("connection");
    connect_user(&mut conn, user_id, code, Utc::now()).expect("connect user");
}

/// Leaves only `canal-1` and `canal-2` seeded, for scenarios that assert
/// on the exact channel list phrase.
pub fn keep_two_channels(pool: &DbPool) {
    let conn = pool.get().expect("connection");
    conn.execute(
        "DELETE FROM channels WHERE code NOT IN ('canal-1', 'canal-2')",
        [],
    )
    .expect("trim channels");
}

/// A syntactically valid WAV clip with roughly the given duration at
/// 16 kHz 16-bit mono.
pub fn wav_clip(seconds: f64) -> Vec<u8> {
    let data_bytes = (seconds * 32_000.0) as usize;
    let mut wav = Vec::with_capacity(44 + data_bytes);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&((36 + data_bytes) as u32).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&16_000u32.to_le_bytes());
    wav.extend_from_slice(&32_000u32.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_bytes as u32).to_le_bytes());
    wav.resize(44 + data_bytes, 0);
    wav
}
