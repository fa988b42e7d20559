//! Public channel listing endpoints.

use crate::AppState;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use walkie_channels::{available_channels, channel_active_users, ChannelError};

#[derive(Debug, Serialize)]
pub struct PublicChannel {
    pub code: String,
    pub name: String,
    #[serde(rename = "maxUsers")]
    pub max_users: i64,
}

#[derive(Debug, Serialize)]
pub struct ChannelUser {
    pub id: i64,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelUsersParams {
    #[serde(default)]
    pub channel: String,
}

fn error_message(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

/// GET /channels/public
pub async fn list_public_channels_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    let pool = state.pool.clone();
    let channels = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!(error = %e, "failed to get db connection for channel list");
        })?;
        available_channels(&conn).map_err(|e| {
            tracing::error!(error = %e, "failed to list channels");
        })
    })
    .await
    .unwrap_or(Err(()));

    match channels {
        Ok(channels) => {
            let out: Vec<PublicChannel> = channels
                .into_iter()
                .map(|c| PublicChannel {
                    code: c.code,
                    name: c.name,
                    max_users: c.max_users,
                })
                .collect();
            Json(out).into_response()
        }
        Err(()) => error_message(
            StatusCode::INTERNAL_SERVER_ERROR,
            "No se pudo listar canales",
        ),
    }
}

/// GET /channel-users?channel=CODE
pub async fn channel_users_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ChannelUsersParams>,
) -> Response {
    let code = params.channel.trim().to_string();
    if code.is_empty() {
        return error_message(StatusCode::BAD_REQUEST, "Canal inválido");
    }

    enum ListError {
        NotFound,
        Internal,
    }

    let pool = state.pool.clone();
    let members = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| ListError::Internal)?;
        channel_active_users(&conn, &code).map_err(|e| match e {
            ChannelError::ChannelNotFound(_) => ListError::NotFound,
            other => {
                tracing::error!(error = %other, "failed to list channel users");
                ListError::Internal
            }
        })
    })
    .await
    .unwrap_or(Err(ListError::Internal));

    match members {
        Ok(members) => {
            let out: Vec<ChannelUser> = members
                .into_iter()
                .map(|m| ChannelUser {
                    id: m.id,
                    display_name: m.display_name,
                })
                .collect();
            Json(out).into_response()
        }
        Err(ListError::NotFound) => error_message(StatusCode::NOT_FOUND, "Canal no encontrado"),
        Err(ListError::Internal) => error_message(
            StatusCode::INTERNAL_SERVER_ERROR,
            "No se pudo obtener los usuarios del canal",
        ),
    }
}
