//! Wire shapes for the WebSocket transport (§6).
//!
//! `WsClientMessage` / `WsServerMessage` are `serde`-tagged enums whose
//! variants are exactly the client/server event sets from §6, following the
//! reference codebase's `#[serde(tag = "type", ...)]` convention for its own
//! chat event enums (`ChatEvent` in `server.rs`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `set_chat_mode { mode }` (§6) — out of scope for the core state machine,
/// but still a legal client event the transport must parse and route to a
/// profile-provider mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Tarot,
    Astro,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    UserMessage { message: String },
    TypingStatus { is_typing: bool },
    StopAiResponse {},
    EndChat {},
    SetChatMode {
        mode: ChatMode,
        #[serde(default)]
        initial_message: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    MessageReceived {
        id: String,
        text: String,
        sender: &'static str,
        timestamp: DateTime<Utc>,
    },
    AiBlock {
        text: String,
        group: i64,
        timestamp: DateTime<Utc>,
    },
    AiComplete {},
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_round_trips_through_json() {
        let json = r#"{"type":"user_message","message":"hi"}"#;
        let msg: WsClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, WsClientMessage::UserMessage { message } if message == "hi"));
    }

    #[test]
    fn set_chat_mode_parses_optional_initial_message() {
        let json = r#"{"type":"set_chat_mode","mode":"tarot"}"#;
        let msg: WsClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            WsClientMessage::SetChatMode { mode, initial_message } => {
                assert_eq!(mode, ChatMode::Tarot);
                assert!(initial_message.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ai_block_serializes_with_tag() {
        let msg = WsServerMessage::AiBlock {
            text: "hey".into(),
            group: 1,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"ai_block""#));
        assert!(json.contains(r#""group":1"#));
    }
}
