//! Audio ingest pipeline and the polling fallback.
//!
//! A single POST carries one voice clip through a strictly sequential
//! pipeline: authenticate, read and validate the WAV, transcribe,
//! filter, classify, then either execute a command or fan the clip out
//! to channel peers. Upstream degradation never turns into a 5xx — the
//! clip is still broadcast when the speaker is in a channel, otherwise
//! the client gets the "unintelligible" envelope.

use crate::auth::{self, AuthError};
use crate::commands::{execute_command, CommandError, CommandResponse};
use crate::transmission::{
    broadcast_audio, estimate_duration, schedule_stop_transmission, start_transmission,
};
use crate::{AppState, MAX_INGEST_BYTES};
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use walkie_channels::{available_channels, channel_active_users, User};
use walkie_voice::{contains_restricted_phrase, is_likely_coherent, IntentAnalyzer, SpeechToText};

/// Wall-clock limit for one ingest request.
const REQUEST_DEADLINE: Duration = Duration::from_secs(120);

/// Out-of-channel conversational state label.
const STATE_NO_CHANNEL: &str = "sin_canal";

/// Per-request stage timing, logged as structured events.
struct StageTimer {
    user_id: i64,
    start: Instant,
}

impl StageTimer {
    fn new(user_id: i64) -> Self {
        Self {
            user_id,
            start: Instant::now(),
        }
    }

    fn total_ms(&self) -> f64 {
        ms_since(self.start)
    }

    fn finish(&self, reason: &str) {
        tracing::info!(
            user = self.user_id,
            stage = "finished",
            total_ms = self.total_ms(),
            reason,
            "ingest finished"
        );
    }
}

fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// First four bytes `RIFF`, bytes 8..12 `WAVE`, and room for the header.
fn is_valid_wav(data: &[u8]) -> bool {
    data.len() >= 44 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// The `{status:"ignored"}` envelope for clips that cannot be acted on.
fn unintelligible() -> Response {
    Json(CommandResponse {
        status: "ignored".to_string(),
        intent: "conversation".to_string(),
        message: "audio poco comprensible".to_string(),
        data: None,
    })
    .into_response()
}

fn plain_error(status: StatusCode, message: &str) -> Response {
    (status, message.to_string()).into_response()
}

/// Reads the clip out of the request: either the raw body or the `file`
/// field of a multipart form, capped at [`MAX_INGEST_BYTES`].
async fn read_audio(request: Request) -> Result<Vec<u8>, String> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.starts_with("multipart/") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| format!("multipart inválido: {e}"))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| format!("multipart inválido: {e}"))?
        {
            if field.name() == Some("file") {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| format!("no se pudo leer el campo file: {e}"))?;
                return Ok(bytes.to_vec());
            }
        }
        Err("falta el campo file".to_string())
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), MAX_INGEST_BYTES)
            .await
            .map_err(|e| format!("no se pudo leer el cuerpo: {e}"))?;
        Ok(bytes.to_vec())
    }
}

/// POST /audio/ingest
pub async fn audio_ingest_handler(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
) -> Response {
    let headers = request.headers().clone();

    // 1. Authenticate; this also loads the user with their channel.
    let auth_start = Instant::now();
    let user = match auth::resolve_user_from_headers(&state, &headers).await {
        Ok(user) => user,
        Err(AuthError::MissingToken) => {
            return plain_error(StatusCode::BAD_REQUEST, "X-Auth-Token requerido");
        }
        Err(e @ (AuthError::InvalidToken | AuthError::TokenExpired)) => {
            return plain_error(e.status(), "X-Auth-Token inválido o expirado");
        }
        Err(AuthError::Internal) => {
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "error interno");
        }
    };

    // 2. Bind the request deadline; upstream calls inherit what is left.
    let deadline = Instant::now() + REQUEST_DEADLINE;
    let timer = StageTimer::new(user.id);
    tracing::info!(
        user = user.id,
        stage = "auth",
        duration_ms = ms_since(auth_start),
        total_ms = timer.total_ms(),
        channel = user.current_channel_code(),
        "ingest request authenticated"
    );

    // 3. Read the audio.
    let stage_start = Instant::now();
    let audio = match read_audio(request).await {
        Ok(audio) if !audio.is_empty() => audio,
        Ok(_) | Err(_) => {
            timer.finish("audio_read_error");
            return plain_error(StatusCode::BAD_REQUEST, "Audio requerido");
        }
    };
    tracing::info!(
        user = user.id,
        stage = "received",
        duration_ms = ms_since(stage_start),
        total_ms = timer.total_ms(),
        size_bytes = audio.len(),
        "audio received"
    );

    // 4. Validate the container.
    if !is_valid_wav(&audio) {
        timer.finish("invalid_wav");
        return plain_error(
            StatusCode::BAD_REQUEST,
            "Formato de audio inválido. Se requiere WAV",
        );
    }

    let audio = Arc::new(audio);

    // 5. Transcribe within the deadline.
    let Some(stt) = state.stt.clone() else {
        timer.finish("stt_unavailable");
        return plain_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Servicio de transcripción no disponible",
        );
    };

    let stage_start = Instant::now();
    let transcript =
        match tokio::time::timeout(remaining(deadline), stt.transcribe(&audio)).await {
            Ok(Ok(text)) => text.trim().to_string(),
            Ok(Err(e)) => {
                tracing::warn!(user = user.id, error = %e, "transcription failed");
                return degrade_to_conversation(&state, &user, audio, &timer, "stt_error").await;
            }
            Err(_) => {
                tracing::warn!(user = user.id, "transcription deadline exceeded");
                return degrade_to_conversation(&state, &user, audio, &timer, "stt_timeout").await;
            }
        };
    tracing::info!(
        user = user.id,
        stage = "stt",
        duration_ms = ms_since(stage_start),
        total_ms = timer.total_ms(),
        text_len = transcript.chars().count(),
        "transcription complete"
    );

    // 6. Coherence filter.
    let stage_start = Instant::now();
    let coherent = is_likely_coherent(&transcript);
    tracing::info!(
        user = user.id,
        stage = "coherence",
        duration_ms = ms_since(stage_start),
        total_ms = timer.total_ms(),
        coherent,
        "coherence checked"
    );
    if !coherent {
        timer.finish("incoherent");
        if user.is_in_channel() {
            return StatusCode::NO_CONTENT.into_response();
        }
        return unintelligible();
    }

    // 7. Blocklist filter. Hits stop here regardless of channel state.
    if contains_restricted_phrase(&transcript) {
        tracing::warn!(user = user.id, text = %transcript, "restricted phrase blocked");
        timer.finish("prompt_injection_detected");
        return unintelligible();
    }

    let current_state = if user.is_in_channel() {
        user.current_channel_code().to_string()
    } else {
        STATE_NO_CHANNEL.to_string()
    };

    // 8. Load the public channel codes for the classifier.
    let stage_start = Instant::now();
    let pool = state.pool.clone();
    let channel_codes: Vec<String> = match tokio::task::spawn_blocking(move || {
        let conn = pool.get().ok()?;
        available_channels(&conn)
            .map(|channels| channels.into_iter().map(|c| c.code).collect())
            .ok()
    })
    .await
    {
        Ok(Some(codes)) => codes,
        _ => {
            tracing::warn!(user = user.id, "failed to load channel codes");
            return degrade_to_conversation(&state, &user, audio, &timer, "channels_error").await;
        }
    };
    tracing::info!(
        user = user.id,
        stage = "list_channels",
        duration_ms = ms_since(stage_start),
        total_ms = timer.total_ms(),
        count = channel_codes.len(),
        "channel codes loaded"
    );

    // 9. Classify within the deadline.
    let stage_start = Instant::now();
    let result = match tokio::time::timeout(
        remaining(deadline),
        state
            .classifier
            .analyze(&transcript, &channel_codes, &current_state, ""),
    )
    .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::warn!(user = user.id, error = %e, text = %transcript, "classification failed");
            return degrade_to_conversation(&state, &user, audio, &timer, "ai_error").await;
        }
        Err(_) => {
            tracing::warn!(user = user.id, "classification deadline exceeded");
            return degrade_to_conversation(&state, &user, audio, &timer, "ai_timeout").await;
        }
    };
    tracing::info!(
        user = user.id,
        stage = "ai",
        duration_ms = ms_since(stage_start),
        total_ms = timer.total_ms(),
        intent = result.intent.as_str(),
        is_command = result.is_command,
        "transcript classified"
    );

    // 10. Dispatch.
    if result.is_command {
        let stage_start = Instant::now();
        let response = execute_command(&state, &user, &result).await;
        tracing::info!(
            user = user.id,
            stage = "execute_command",
            duration_ms = ms_since(stage_start),
            total_ms = timer.total_ms(),
            intent = result.intent.as_str(),
            error = response.is_err(),
            "command executed"
        );

        return match response {
            Ok(envelope) => {
                timer.finish("command_response");
                Json(envelope).into_response()
            }
            Err(e @ CommandError::MissingChannelArg) => {
                timer.finish("command_error");
                plain_error(StatusCode::BAD_REQUEST, &e.to_string())
            }
            Err(CommandError::Channel(e)) => {
                timer.finish("command_error");
                plain_error(StatusCode::BAD_REQUEST, &e.to_string())
            }
            Err(e @ CommandError::Unavailable) => {
                timer.finish("command_error");
                plain_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
        };
    }

    if !user.is_in_channel() {
        tracing::info!(user = user.id, "conversation outside a channel, ignoring");
        timer.finish("no_channel");
        return unintelligible();
    }

    // 11. Broadcast.
    let stage_start = Instant::now();
    broadcast_conversation(&state, &user, audio).await;
    tracing::info!(
        user = user.id,
        stage = "broadcast",
        duration_ms = ms_since(stage_start),
        total_ms = timer.total_ms(),
        channel = user.current_channel_code(),
        "conversation broadcast"
    );
    timer.finish("broadcast_done");
    StatusCode::NO_CONTENT.into_response()
}

/// Best-effort branch taken when STT or the classifier degrade: a speaker
/// inside a channel still gets their clip delivered; anyone else gets the
/// unintelligible envelope.
async fn degrade_to_conversation(
    state: &Arc<AppState>,
    user: &User,
    audio: Arc<Vec<u8>>,
    timer: &StageTimer,
    reason: &str,
) -> Response {
    if user.is_in_channel() {
        tracing::info!(
            user = user.id,
            channel = user.current_channel_code(),
            reason,
            "forwarding clip without classification"
        );
        broadcast_conversation(state, user, audio).await;
        timer.finish(reason);
        return StatusCode::NO_CONTENT.into_response();
    }
    timer.finish(reason);
    unintelligible()
}

/// The conversation fan-out: floor signaling, live push, deferred floor
/// release, and queueing for polling peers.
async fn broadcast_conversation(state: &Arc<AppState>, user: &User, payload: Arc<Vec<u8>>) {
    let channel = user.current_channel_code().to_string();
    if channel.is_empty() {
        return;
    }

    start_transmission(&state.registry, &channel, user.id);
    broadcast_audio(&state.registry, &channel, user.id, &payload);

    let duration = estimate_duration(&payload);
    schedule_stop_transmission(state, channel.clone(), user.id, duration);

    let pool = state.pool.clone();
    let code = channel.clone();
    let members = tokio::task::spawn_blocking(move || {
        let conn = pool.get().ok()?;
        channel_active_users(&conn, &code).ok()
    })
    .await;

    match members {
        Ok(Some(members)) => {
            let recipients: Vec<i64> = members.iter().map(|m| m.id).collect();
            state
                .audio_queue
                .enqueue(user.id, &channel, payload, duration, &recipients);
        }
        _ => {
            tracing::warn!(
                user = user.id,
                channel = %channel,
                "could not load channel members, clip not queued"
            );
        }
    }
}

/// GET /audio/poll
///
/// Returns the oldest pending clip for the caller, skipping entries whose
/// channel the caller has since left.
pub async fn audio_poll_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let user = match auth::resolve_user_from_headers(&state, &headers).await {
        Ok(user) => user,
        Err(_) => {
            return plain_error(StatusCode::UNAUTHORIZED, "X-Auth-Token inválido o expirado");
        }
    };

    loop {
        let Some(pending) = state.audio_queue.dequeue(user.id) else {
            return StatusCode::NO_CONTENT.into_response();
        };

        if pending.channel != user.current_channel_code() {
            tracing::debug!(
                user = user.id,
                channel = %pending.channel,
                "discarding stale pending clip"
            );
            continue;
        }

        tracing::info!(
            user = user.id,
            sender = pending.sender_id,
            channel = %pending.channel,
            "delivering pending clip via poll"
        );

        return (
            StatusCode::OK,
            [
                (CONTENT_TYPE, "audio/wav".to_string()),
                (
                    HeaderName::from_static("x-audio-from"),
                    pending.sender_id.to_string(),
                ),
                (
                    HeaderName::from_static("x-channel"),
                    pending.channel.clone(),
                ),
            ],
            pending.payload.as_ref().clone(),
        )
            .into_response();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_validation() {
        let mut valid = Vec::new();
        valid.extend_from_slice(b"RIFF");
        valid.extend_from_slice(&[0u8; 4]);
        valid.extend_from_slice(b"WAVE");
        valid.resize(44, 0);
        assert!(is_valid_wav(&valid));

        assert!(!is_valid_wav(b"RIFF"));
        assert!(!is_valid_wav(b"not audio at all, clearly"));

        let mut short = valid.clone();
        short.truncate(40);
        assert!(!is_valid_wav(&short));

        let mut wrong_format = valid;
        wrong_format[8..12].copy_from_slice(b"AIFF");
        assert!(!is_valid_wav(&wrong_format));
    }
}
