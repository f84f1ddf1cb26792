use crate::models::{MessageType, UserRole};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound commands from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Must be the first command on a connection
    Authenticate {
        user_id: Uuid,
        user_type: UserRole,
        credential: String,
    },
    JoinChat {
        chat_id: Uuid,
    },
    LeaveChat {
        chat_id: Uuid,
    },
    SendMessage {
        chat_id: Uuid,
        content: String,
        #[serde(default)]
        message_type: MessageType,
    },
    MarkAsRead {
        chat_id: Uuid,
        message_ids: Vec<Uuid>,
    },
    Typing {
        chat_id: Uuid,
        is_typing: bool,
    },
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Authenticate { .. } => "authenticate",
            ClientCommand::JoinChat { .. } => "join_chat",
            ClientCommand::LeaveChat { .. } => "leave_chat",
            ClientCommand::SendMessage { .. } => "send_message",
            ClientCommand::MarkAsRead { .. } => "mark_as_read",
            ClientCommand::Typing { .. } => "typing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_message_defaults_to_text() {
        let chat_id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"send_message","chat_id":"{chat_id}","content":"hola"}}"#);
        let cmd: ClientCommand = serde_json::from_str(&raw).unwrap();

        match cmd {
            ClientCommand::SendMessage {
                chat_id: parsed,
                content,
                message_type,
            } => {
                assert_eq!(parsed, chat_id);
                assert_eq!(content, "hola");
                assert_eq!(message_type, MessageType::Text);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_authenticate() {
        let user_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"authenticate","user_id":"{user_id}","user_type":"store_manager","credential":"abc"}}"#
        );
        let cmd: ClientCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd.name(), "authenticate");
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"delete_chat"}"#).is_err());
    }
}
