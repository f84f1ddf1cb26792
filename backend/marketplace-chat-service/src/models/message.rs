use super::user::UserRole;
use super::violation::DetectedViolation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
    AutoResponse,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::System => "system",
            MessageType::AutoResponse => "auto_response",
        }
    }

    /// `system` and `auto_response` are produced by the server only.
    pub fn is_client_sendable(&self) -> bool {
        matches!(self, MessageType::Text | MessageType::Image | MessageType::File)
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Text
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "system" => Ok(MessageType::System),
            "auto_response" => Ok(MessageType::AutoResponse),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Blocked,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Blocked => "blocked",
        }
    }

    /// Delivery states only move forward (sent -> delivered -> read);
    /// blocked is terminal.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        matches!(
            (self, next),
            (MessageStatus::Sent, MessageStatus::Delivered)
                | (MessageStatus::Sent, MessageStatus::Read)
                | (MessageStatus::Delivered, MessageStatus::Read)
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "blocked" => Ok(MessageStatus::Blocked),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub user_id: Uuid,
    pub user_type: UserRole,
    pub user_name: String,
}

/// Moderation verdict attached to every persisted message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationInfo {
    pub is_blocked: bool,
    #[serde(default)]
    pub violations: Vec<DetectedViolation>,
    #[serde(default)]
    pub blocked_content: Vec<String>,
    pub auto_moderated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    /// Server-assigned position in the chat's log, strictly increasing
    pub sequence: i64,
    pub sender: SenderInfo,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
    pub validation: ValidationInfo,
    pub status: MessageStatus,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Server notice appended to a chat's history (closure, block).
    pub fn system(chat_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            sequence: 0,
            sender: SenderInfo {
                user_id: Uuid::nil(),
                user_type: UserRole::Admin,
                user_name: "system".to_string(),
            },
            message_type: MessageType::System,
            content: content.into(),
            original_content: None,
            validation: ValidationInfo::default(),
            status: MessageStatus::Sent,
            read_by: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.status == MessageStatus::Blocked
    }

    /// Blocked messages are only ever shown to their sender.
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        !self.is_blocked() || self.sender.user_id == user_id
    }

    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    /// Append a read receipt unless the reader already has one or wrote the
    /// message. Returns whether anything changed.
    ///
    /// Status only becomes `read` when the reader sits on the other side of
    /// the conversation; a second store manager opening the chat leaves a
    /// receipt without marking the store's own replies as read.
    pub fn record_read(&mut self, user_id: Uuid, role: UserRole, read_at: DateTime<Utc>) -> bool {
        if self.is_blocked() || self.sender.user_id == user_id || self.is_read_by(user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt { user_id, read_at });
        if role != self.sender.user_type && self.status.can_advance_to(MessageStatus::Read) {
            self.status = MessageStatus::Read;
        }
        true
    }
}
