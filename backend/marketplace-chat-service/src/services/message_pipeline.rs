//! classify -> persist -> broadcast for one outgoing message.

use super::channel_manager::ChannelManager;
use super::chat_locks::ChatLocks;
use crate::db::ChatStore;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    AuthenticatedUser, ChatSession, Message, MessageStatus, MessageType, SenderInfo, Violation,
    ViolationAction, ViolationStatus,
};
use crate::moderation::{classify, Classification, RuleSource};
use crate::websocket::ServerEvent;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// What happened to a message that passed validation.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Persisted and broadcast to the room
    Delivered(Message),
    /// Persisted as blocked; only the sender learns about it
    Blocked {
        message: Message,
        violation: Violation,
        classification: Classification,
    },
}

impl SendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            SendOutcome::Delivered(message) => message,
            SendOutcome::Blocked { message, .. } => message,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, SendOutcome::Blocked { .. })
    }

    /// Event the sender should receive about its own message.
    pub fn sender_event(&self) -> ServerEvent {
        match self {
            SendOutcome::Delivered(message) => ServerEvent::NewMessage {
                message: message.clone(),
            },
            SendOutcome::Blocked {
                message,
                classification,
                ..
            } => ServerEvent::MessageBlocked {
                chat_id: message.chat_id,
                message: message.clone(),
                violations: classification.violations.clone(),
                blocked_content: classification.blocked_content.clone(),
                suggestions: classification.suggestions.clone(),
            },
        }
    }
}

pub struct MessagePipeline {
    store: Arc<dyn ChatStore>,
    channels: Arc<ChannelManager>,
    rules: Arc<RuleSource>,
    locks: Arc<ChatLocks>,
    max_message_length: usize,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<dyn ChatStore>,
        channels: Arc<ChannelManager>,
        rules: Arc<RuleSource>,
        locks: Arc<ChatLocks>,
        max_message_length: usize,
    ) -> Self {
        Self {
            store,
            channels,
            rules,
            locks,
            max_message_length,
        }
    }

    /// Send a message on behalf of `sender`.
    ///
    /// Rejections (`Forbidden`, `ChatClosed`, `BadRequest`) happen before
    /// anything is written. A blocked message is not an error: it is stored,
    /// recorded in the ledger and reported back through [`SendOutcome::Blocked`].
    pub async fn send(
        &self,
        sender: &AuthenticatedUser,
        chat_id: Uuid,
        content: &str,
        message_type: MessageType,
    ) -> AppResult<SendOutcome> {
        self.validate(content, message_type)?;

        let chat = self.channels.authorize(sender, chat_id).await?;
        ensure_active(&chat)?;

        let rules = self.rules.snapshot().await;
        let classification = {
            let _timer = metrics::CLASSIFY_DURATION_SECONDS.start_timer();
            classify(&rules, content)
        };

        let guard = self.locks.acquire(chat_id).await;
        let outcome = self
            .persist(sender, chat_id, content, message_type, classification)
            .await;
        drop(guard);
        self.locks.release_idle(chat_id);

        outcome
    }

    /// Runs with the chat lock held.
    async fn persist(
        &self,
        sender: &AuthenticatedUser,
        chat_id: Uuid,
        content: &str,
        message_type: MessageType,
        classification: Classification,
    ) -> AppResult<SendOutcome> {
        // a close or block may have landed while we were classifying
        let chat = self.channels.get_chat(chat_id).await?;
        ensure_active(&chat)?;

        if classification.is_valid {
            self.deliver(sender, &chat, content, message_type).await
        } else {
            self.block(sender, &chat, content, message_type, classification)
                .await
        }
    }

    fn validate(&self, content: &str, message_type: MessageType) -> AppResult<()> {
        if !message_type.is_client_sendable() {
            return Err(AppError::BadRequest(format!(
                "message type {} is reserved for the server",
                message_type.as_str()
            )));
        }
        if content.trim().is_empty() {
            return Err(AppError::BadRequest("message content is empty".into()));
        }
        if content.chars().count() > self.max_message_length {
            return Err(AppError::BadRequest(format!(
                "message exceeds {} characters",
                self.max_message_length
            )));
        }
        Ok(())
    }

    async fn deliver(
        &self,
        sender: &AuthenticatedUser,
        chat: &ChatSession,
        content: &str,
        message_type: MessageType,
    ) -> AppResult<SendOutcome> {
        let draft = new_message(sender, chat.id, content.to_string(), message_type);
        let mut message = self.store.insert_message(draft, None).await?;

        if let Err(e) = self.store.touch_chat(chat.id, message.created_at).await {
            tracing::warn!(chat_id = %chat.id, error = %e, "failed to update last activity");
        }

        let reached = self
            .channels
            .registry()
            .broadcast(chat.id, &ServerEvent::NewMessage {
                message: message.clone(),
            })
            .await;

        // someone other than the sender had the room open
        if reached.iter().any(|user_id| *user_id != sender.user_id) {
            match self
                .store
                .advance_message_status(message.id, MessageStatus::Sent, MessageStatus::Delivered)
                .await
            {
                Ok(true) => message.status = MessageStatus::Delivered,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(message_id = %message.id, error = %e, "delivery status not updated")
                }
            }
        }

        metrics::MESSAGES_SENT_TOTAL.inc();
        tracing::debug!(
            chat_id = %chat.id,
            message_id = %message.id,
            sequence = message.sequence,
            recipients = reached.len(),
            "message delivered"
        );
        Ok(SendOutcome::Delivered(message))
    }

    async fn block(
        &self,
        sender: &AuthenticatedUser,
        chat: &ChatSession,
        content: &str,
        message_type: MessageType,
        classification: Classification,
    ) -> AppResult<SendOutcome> {
        let mut draft = new_message(sender, chat.id, classification.redact(content), message_type);
        draft.original_content = Some(content.to_string());
        draft.validation = classification.validation_info();
        draft.status = MessageStatus::Blocked;

        let violation = ledger_entry(chat, &draft, &classification)?;
        let message = self
            .store
            .insert_message(draft, Some(violation.clone()))
            .await?;

        metrics::record_message_blocked(violation.violation_type.as_str());
        tracing::info!(
            chat_id = %chat.id,
            message_id = %message.id,
            violation_id = %violation.id,
            violation_type = %violation.violation_type,
            severity = %violation.severity,
            "message blocked"
        );

        Ok(SendOutcome::Blocked {
            message,
            violation,
            classification,
        })
    }
}

fn ensure_active(chat: &ChatSession) -> AppResult<()> {
    if chat.status.is_active() {
        Ok(())
    } else {
        Err(AppError::ChatClosed {
            status: chat.status.to_string(),
        })
    }
}

fn new_message(
    sender: &AuthenticatedUser,
    chat_id: Uuid,
    content: String,
    message_type: MessageType,
) -> Message {
    Message {
        id: Uuid::new_v4(),
        chat_id,
        sequence: 0,
        sender: SenderInfo {
            user_id: sender.user_id,
            user_type: sender.role,
            user_name: sender.display_name.clone(),
        },
        message_type,
        content,
        original_content: None,
        validation: Default::default(),
        status: MessageStatus::Sent,
        read_by: Vec::new(),
        created_at: Utc::now(),
    }
}

/// One ledger entry per blocked message, named after the most severe hit.
pub fn ledger_entry(
    chat: &ChatSession,
    message: &Message,
    classification: &Classification,
) -> AppResult<Violation> {
    let (Some(primary), Some(severity)) = (classification.primary(), classification.max_severity())
    else {
        return Err(AppError::Internal("blocked message without violations".into()));
    };

    Ok(Violation {
        id: Uuid::new_v4(),
        chat_id: chat.id,
        message_id: message.id,
        store_id: chat.participants.store_id,
        sender_id: message.sender.user_id,
        client_name: chat.client_name.clone(),
        product_name: chat.product_name().map(str::to_string),
        violation_type: primary.violation_type,
        violation_details: classification.details(),
        blocked_content: classification.blocked_content.clone(),
        severity,
        status: ViolationStatus::Pending,
        action: ViolationAction::None,
        reviewed_by: None,
        reviewed_at: None,
        review_note: None,
        created_at: message.created_at,
    })
}
