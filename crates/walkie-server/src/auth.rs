//! Token resolution and the `/auth` endpoint.
//!
//! Clients present a bearer token in `X-Auth-Token`. Only the SHA-256
//! digest of the token is stored; a token whose owner has been inactive
//! longer than the configured TTL is expired. Successful resolution bumps
//! the owner's last-active timestamp.

use crate::AppState;
use argon2::password_hash::rand_core::OsRng as PasswordOsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use walkie_channels::{
    create_user, find_user_by_display_name, find_user_by_token_digest, touch_activity,
    update_pin_digest, User,
};

/// Header carrying the bearer token.
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Errors from token resolution.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("X-Auth-Token requerido")]
    MissingToken,

    #[error("token inválido")]
    InvalidToken,

    #[error("token expirado")]
    TokenExpired,

    #[error("error interno")]
    Internal,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken => StatusCode::BAD_REQUEST,
            Self::InvalidToken | Self::TokenExpired => StatusCode::UNAUTHORIZED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Generates a fresh 256-bit bearer token, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 hex digest of a token, the only form ever persisted.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn hash_pin(pin: i64) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut PasswordOsRng);
    Argon2::default()
        .hash_password(pin.to_string().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::Internal)
}

fn verify_pin(pin: i64, digest: &str) -> bool {
    PasswordHash::new(digest)
        .map(|parsed| {
            Argon2::default()
                .verify_password(pin.to_string().as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Resolves the `X-Auth-Token` header to its owning user and bumps the
/// owner's last-active timestamp.
pub async fn resolve_user_from_headers(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<User, AuthError> {
    let token = headers
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)?;

    resolve_token(state, token, None).await
}

/// Verifies a live-session handshake: the token must resolve to the
/// declared user, and a declared channel must be the one that user
/// currently owns.
pub async fn verify_session_handshake(
    state: &Arc<AppState>,
    user_id: i64,
    token: &str,
    declared_channel: &str,
) -> Result<User, AuthError> {
    let user = resolve_token(state, token, Some(user_id)).await?;

    if !declared_channel.is_empty() && declared_channel != user.current_channel_code() {
        return Err(AuthError::InvalidToken);
    }

    Ok(user)
}

async fn resolve_token(
    state: &Arc<AppState>,
    token: &str,
    expected_user: Option<i64>,
) -> Result<User, AuthError> {
    let digest = token_digest(token);
    let pool = state.pool.clone();
    let ttl = state.token_ttl;

    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| AuthError::Internal)?;

        let user = find_user_by_token_digest(&conn, &digest)
            .map_err(|_| AuthError::Internal)?
            .ok_or(AuthError::InvalidToken)?;

        if let Some(expected) = expected_user {
            if user.id != expected {
                return Err(AuthError::InvalidToken);
            }
        }

        let ttl = chrono::Duration::from_std(ttl).map_err(|_| AuthError::Internal)?;
        if Utc::now().signed_duration_since(user.last_active_at) > ttl {
            return Err(AuthError::TokenExpired);
        }

        touch_activity(&conn, user.id, Utc::now()).map_err(|_| AuthError::Internal)?;
        Ok(user)
    })
    .await
    .map_err(|_| AuthError::Internal)?
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub pin: i64,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn auth_message(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

/// POST /auth
///
/// Finds or creates the user by display name, verifies (or first-time
/// sets) the PIN, rotates the auth token and returns it.
pub async fn authenticate_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        return auth_message(StatusCode::BAD_REQUEST, "JSON inválido");
    };

    let nombre = request.nombre.trim().to_string();
    if nombre.is_empty() || request.pin <= 0 {
        return auth_message(StatusCode::BAD_REQUEST, "nombre y pin son requeridos");
    }

    let token = generate_token();
    let digest = token_digest(&token);
    let pin = request.pin;
    let pool = state.pool.clone();

    enum Outcome {
        Ok,
        BadCredentials,
        Internal,
    }

    let outcome = tokio::task::spawn_blocking(move || {
        let Ok(conn) = pool.get() else {
            return Outcome::Internal;
        };

        let user = match find_user_by_display_name(&conn, &nombre) {
            Ok(Some(user)) => {
                match user.pin_digest.as_deref().filter(|d| !d.is_empty()) {
                    Some(stored) => {
                        if !verify_pin(pin, stored) {
                            return Outcome::BadCredentials;
                        }
                    }
                    None => {
                        let Ok(pin_digest) = hash_pin(pin) else {
                            return Outcome::Internal;
                        };
                        if update_pin_digest(&conn, user.id, &pin_digest).is_err() {
                            return Outcome::Internal;
                        }
                    }
                }
                user
            }
            Ok(None) => {
                let Ok(pin_digest) = hash_pin(pin) else {
                    return Outcome::Internal;
                };
                match create_user(&conn, &nombre, Some(&pin_digest), Utc::now()) {
                    Ok(user) => user,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to create user");
                        return Outcome::Internal;
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to look up user");
                return Outcome::Internal;
            }
        };

        match walkie_channels::store_credentials(&conn, user.id, &digest, Utc::now()) {
            Ok(()) => Outcome::Ok,
            Err(e) => {
                tracing::error!(error = %e, "failed to store credentials");
                Outcome::Internal
            }
        }
    })
    .await
    .unwrap_or(Outcome::Internal);

    match outcome {
        Outcome::Ok => Json(AuthResponse {
            message: "usuario registrado exitosamente".to_string(),
            token: Some(token),
        })
        .into_response(),
        Outcome::BadCredentials => auth_message(StatusCode::UNAUTHORIZED, "credenciales inválidas"),
        Outcome::Internal => {
            auth_message(StatusCode::INTERNAL_SERVER_ERROR, "no se pudo registrar usuario")
        }
    }
}
