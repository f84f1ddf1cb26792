//! Server → client events.
//!
//! Every event is one JSON object tagged by `type`, with a server
//! `timestamp` added at serialization time:
//! ```json
//! { "type": "new_message", "timestamp": "2025-03-01T12:00:00Z", "message": { ... } }
//! ```

use crate::models::{
    AuthenticatedUser, ChatSession, ChatStatus, DetectedViolation, Message, UserRole,
    ViolationType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated {
        user: AuthenticatedUser,
    },

    AuthError {
        message: String,
    },

    /// Reply to `join_chat`
    ChatHistory {
        chat: ChatSession,
        messages: Vec<Message>,
    },

    /// Broadcast to every subscriber of the chat, sender included
    NewMessage {
        message: Message,
    },

    /// Sent to the sender only
    MessageBlocked {
        chat_id: Uuid,
        message: Message,
        violations: Vec<DetectedViolation>,
        blocked_content: Vec<String>,
        suggestions: Vec<String>,
    },

    MessagesRead {
        chat_id: Uuid,
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },

    UserTyping {
        chat_id: Uuid,
        user_id: Uuid,
        user_name: String,
        is_typing: bool,
    },

    UserOnline {
        chat_id: Uuid,
        user_id: Uuid,
        user_type: UserRole,
    },

    UserOffline {
        chat_id: Uuid,
        user_id: Uuid,
        user_type: UserRole,
    },

    ChatClosed {
        chat_id: Uuid,
        status: ChatStatus,
        reason: String,
    },

    /// Moderator warning delivered to the offending user
    ModerationWarning {
        violation_id: Uuid,
        chat_id: Uuid,
        violation_type: ViolationType,
        message: String,
    },

    Error {
        code: String,
        message: String,
        /// Command that failed, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>, command: Option<&str>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
            command: command.map(str::to_string),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::Authenticated { .. } => "authenticated",
            ServerEvent::AuthError { .. } => "auth_error",
            ServerEvent::ChatHistory { .. } => "chat_history",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::MessageBlocked { .. } => "message_blocked",
            ServerEvent::MessagesRead { .. } => "messages_read",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::UserOnline { .. } => "user_online",
            ServerEvent::UserOffline { .. } => "user_offline",
            ServerEvent::ChatClosed { .. } => "chat_closed",
            ServerEvent::ModerationWarning { .. } => "moderation_warning",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Wire form of the event.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        }
        serde_json::to_string(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_payload_is_tagged_with_timestamp() {
        let chat_id = Uuid::new_v4();
        let event = ServerEvent::ChatClosed {
            chat_id,
            status: ChatStatus::Blocked,
            reason: "blocked by moderator".into(),
        };

        let value: Value = serde_json::from_str(&event.to_payload().unwrap()).unwrap();
        assert_eq!(value["type"], "chat_closed");
        assert_eq!(value["status"], "blocked");
        assert_eq!(value["chat_id"], chat_id.to_string());
        assert!(value["timestamp"].is_string());
        assert_eq!(event.event_type(), "chat_closed");
    }

    #[test]
    fn test_error_event_omits_missing_command() {
        let event = ServerEvent::error("FORBIDDEN", "not a participant", None);
        let value: Value = serde_json::from_str(&event.to_payload().unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "FORBIDDEN");
        assert!(value.get("command").is_none());
    }
}
