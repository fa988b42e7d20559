//! Shared types for the walkie platform.
//!
//! This crate provides the value types exchanged between the voice
//! classification layer and the server: the closed intent set and the
//! classification result produced for every transcript.
//!
//! No crate in the workspace depends on anything *except* `walkie-types`
//! for cross-cutting type definitions, which keeps the dependency graph
//! clean and prevents circular dependencies.

use serde::{Deserialize, Serialize};

/// The closed set of intents a transcript can classify into.
///
/// Anything the upstream model returns outside this set is coerced to
/// [`Intent::Conversation`] before it leaves the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// The speaker asked for the list of available channels.
    RequestChannelList,
    /// The speaker asked to join a specific channel.
    RequestChannelConnect,
    /// The speaker asked to leave the current channel.
    RequestChannelDisconnect,
    /// Anything that is not an explicit command.
    Conversation,
}

impl Intent {
    /// Returns the wire label for this intent.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestChannelList => "request_channel_list",
            Self::RequestChannelConnect => "request_channel_connect",
            Self::RequestChannelDisconnect => "request_channel_disconnect",
            Self::Conversation => "conversation",
        }
    }

    /// Attempts to parse a wire label into a member of the closed set.
    ///
    /// Returns `None` for anything outside the set (including intents
    /// that older model prompts used to emit, such as `request_user_list`).
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "request_channel_list" => Some(Self::RequestChannelList),
            "request_channel_connect" => Some(Self::RequestChannelConnect),
            "request_channel_disconnect" => Some(Self::RequestChannelDisconnect),
            "conversation" => Some(Self::Conversation),
            _ => None,
        }
    }
}

/// Result of classifying a single transcript.
///
/// Mirrors the JSON contract the upstream model is prompted to produce:
/// `is_command` plus one intent from the closed set, an echoed reply for
/// non-commands, optional channel targets, the conversational state the
/// request carried, and an optional pending-channel hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_command: bool,
    pub intent: Intent,
    #[serde(default)]
    pub reply: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pending_channel: String,
}

impl ClassificationResult {
    /// A non-command result that echoes the transcript back as the reply.
    pub fn conversation(transcript: &str, state: &str) -> Self {
        Self {
            is_command: false,
            intent: Intent::Conversation,
            reply: transcript.to_string(),
            channels: Vec::new(),
            state: state.to_string(),
            pending_channel: String::new(),
        }
    }

    /// A command result with no channel targets.
    pub fn command(intent: Intent, state: &str) -> Self {
        Self {
            is_command: true,
            intent,
            reply: String::new(),
            channels: Vec::new(),
            state: state.to_string(),
            pending_channel: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_labels_round_trip() {
        for intent in [
            Intent::RequestChannelList,
            Intent::RequestChannelConnect,
            Intent::RequestChannelDisconnect,
            Intent::Conversation,
        ] {
            assert_eq!(Intent::parse(intent.as_str()), Some(intent));
        }
    }

    #[test]
    fn unknown_labels_stay_outside_the_closed_set() {
        assert_eq!(Intent::parse("request_user_list"), None);
        assert_eq!(Intent::parse("request_current_channel"), None);
        assert_eq!(Intent::parse(""), None);
    }

    #[test]
    fn result_deserializes_from_model_json() {
        let raw = r#"{
            "is_command": true,
            "intent": "request_channel_connect",
            "reply": "",
            "channels": ["canal-2"],
            "state": "sin_canal"
        }"#;
        let result: ClassificationResult = serde_json::from_str(raw).unwrap();
        assert!(result.is_command);
        assert_eq!(result.intent, Intent::RequestChannelConnect);
        assert_eq!(result.channels, vec!["canal-2"]);
        assert_eq!(result.pending_channel, "");
    }

    #[test]
    fn empty_channels_are_omitted_when_serializing() {
        let result = ClassificationResult::conversation("hola", "canal-1");
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("channels"));
        assert!(!json.contains("pending_channel"));
    }
}
