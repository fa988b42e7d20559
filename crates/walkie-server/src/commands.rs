//! Spoken command execution.
//!
//! Maps a command classification onto the membership service and the live
//! session registry, and renders the natural-language reply the client
//! reads back to the speaker.

use crate::AppState;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use walkie_channels::{available_channels, connect_user, disconnect_current, ChannelError, User};
use walkie_types::{ClassificationResult, Intent};

/// JSON envelope returned for executed commands.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub status: String,
    pub intent: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandResponse {
    fn ok(intent: &str, message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            intent: intent.to_string(),
            message: message.into(),
            data: None,
        }
    }
}

/// Errors surfaced to the client as 400s with a short Spanish message.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no se especificó canal para conectar")]
    MissingChannelArg,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("servicio de usuarios no disponible")]
    Unavailable,
}

/// Executes a command classification on behalf of a user.
pub async fn execute_command(
    state: &Arc<AppState>,
    user: &User,
    result: &ClassificationResult,
) -> Result<CommandResponse, CommandError> {
    match result.intent {
        Intent::RequestChannelList => handle_channel_list(state).await,
        Intent::RequestChannelConnect => {
            let target = result
                .channels
                .first()
                .ok_or(CommandError::MissingChannelArg)?;
            handle_channel_connect(state, user, target).await
        }
        Intent::RequestChannelDisconnect => handle_channel_disconnect(state, user).await,
        // Anything else flagged as a command just echoes the model's reply.
        Intent::Conversation => Ok(CommandResponse::ok(
            result.intent.as_str(),
            result.reply.clone(),
        )),
    }
}

async fn handle_channel_list(state: &Arc<AppState>) -> Result<CommandResponse, CommandError> {
    let pool = state.pool.clone();
    let channels = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| CommandError::Unavailable)?;
        available_channels(&conn).map_err(CommandError::Channel)
    })
    .await
    .map_err(|_| CommandError::Unavailable)??;

    let numbers: Vec<String> = channels
        .iter()
        .map(|c| c.code.strip_prefix("canal-").unwrap_or(&c.code).to_string())
        .collect();
    let codes: Vec<&str> = channels.iter().map(|c| c.code.as_str()).collect();
    let names: Vec<&str> = channels.iter().map(|c| c.name.as_str()).collect();

    let mut response = CommandResponse::ok(
        Intent::RequestChannelList.as_str(),
        build_channel_list_phrase(&numbers),
    );
    response.data = Some(json!({
        "channels": codes,
        "channel_names": names,
    }));
    Ok(response)
}

async fn handle_channel_connect(
    state: &Arc<AppState>,
    user: &User,
    channel_code: &str,
) -> Result<CommandResponse, CommandError> {
    let pool = state.pool.clone();
    let code = channel_code.to_string();
    let user_id = user.id;

    let channel = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|_| CommandError::Unavailable)?;
        connect_user(&mut conn, user_id, &code, Utc::now()).map_err(CommandError::Channel)
    })
    .await
    .map_err(|_| CommandError::Unavailable)??;

    // The live session follows the persisted state.
    state.registry.move_user(user.id, &channel.code);

    let number = channel
        .code
        .strip_prefix("canal-")
        .unwrap_or(&channel.code)
        .to_string();
    Ok(CommandResponse::ok(
        Intent::RequestChannelConnect.as_str(),
        format!("Conectado al canal {number}"),
    ))
}

async fn handle_channel_disconnect(
    state: &Arc<AppState>,
    user: &User,
) -> Result<CommandResponse, CommandError> {
    if !user.is_in_channel() {
        return Ok(CommandResponse::ok(
            Intent::RequestChannelDisconnect.as_str(),
            "No estás conectado a ningún canal",
        ));
    }

    let pool = state.pool.clone();
    let user_id = user.id;
    let left = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|_| CommandError::Unavailable)?;
        disconnect_current(&mut conn, user_id, Utc::now()).map_err(CommandError::Channel)
    })
    .await
    .map_err(|_| CommandError::Unavailable)??;

    state.registry.move_user(user.id, "");

    let code = left.unwrap_or_else(|| user.current_channel_code().to_string());
    let number = code.strip_prefix("canal-").unwrap_or(&code).to_string();
    Ok(CommandResponse::ok(
        Intent::RequestChannelDisconnect.as_str(),
        format!("Desconectado del canal {number}"),
    ))
}

/// Renders the channel list for voice: "Canales disponibles: 1, 2, y 3".
fn build_channel_list_phrase(numbers: &[String]) -> String {
    match numbers {
        [] => "No hay canales disponibles".to_string(),
        [only] => format!("Canales disponibles: {only}"),
        [first, second] => format!("Canales disponibles: {first} y {second}"),
        _ => {
            let mut phrase = String::from("Canales disponibles: ");
            let last = numbers.len() - 1;
            for (i, number) in numbers.iter().enumerate() {
                if i == last {
                    phrase.push_str(&format!("y {number}"));
                } else {
                    phrase.push_str(&format!("{number}, "));
                }
            }
            phrase
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn channel_list_phrase_cases() {
        assert_eq!(build_channel_list_phrase(&[]), "No hay canales disponibles");
        assert_eq!(
            build_channel_list_phrase(&numbers(&["1"])),
            "Canales disponibles: 1"
        );
        assert_eq!(
            build_channel_list_phrase(&numbers(&["1", "2"])),
            "Canales disponibles: 1 y 2"
        );
        assert_eq!(
            build_channel_list_phrase(&numbers(&["1", "2", "3"])),
            "Canales disponibles: 1, 2, y 3"
        );
    }
}
