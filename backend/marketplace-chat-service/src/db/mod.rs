//! Persistence for chats, messages and the violation ledger.
//!
//! Every read-modify-write the service relies on (status transitions, read
//! receipts, moderator review) is a single guarded operation of the store, so
//! concurrent callers can never both succeed.

pub mod memory;
pub mod postgres;

use crate::error::AppResult;
use crate::models::{
    AuthenticatedUser, ChatSession, ChatStats, ChatStatus, Message, MessageStatus, Page,
    ReviewOutcome, Violation, ViolationFilter, ViolationStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::InMemoryChatStore;
pub use postgres::PgChatStore;

/// Result of a guarded moderator review.
#[derive(Debug, Clone)]
pub enum ReviewApplied {
    Applied {
        violation: Violation,
        /// Set when the decision blocked a chat that was not blocked yet
        blocked_chat: Option<ChatSession>,
    },
    /// The entry had already left `pending`
    Rejected { current: ViolationStatus },
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn insert_chat(&self, chat: &ChatSession) -> AppResult<()>;

    /// Active session for this client/store/product triple, if any.
    async fn find_active_chat(
        &self,
        client_id: Uuid,
        store_id: Uuid,
        product_id: Option<Uuid>,
    ) -> AppResult<Option<ChatSession>>;

    async fn get_chat(&self, chat_id: Uuid) -> AppResult<Option<ChatSession>>;

    /// Most recently active first.
    async fn list_chats_by_store(&self, store_id: Uuid, page: Page) -> AppResult<Vec<ChatSession>>;

    /// Active chats the user participates in.
    async fn list_active_chats_for(&self, user: &AuthenticatedUser) -> AppResult<Vec<ChatSession>>;

    async fn touch_chat(&self, chat_id: Uuid, at: DateTime<Utc>) -> AppResult<()>;

    /// Move a chat to `to` only if its current status is one of `from`.
    /// `None` when the guard did not hold.
    async fn transition_chat_status(
        &self,
        chat_id: Uuid,
        from: &[ChatStatus],
        to: ChatStatus,
    ) -> AppResult<Option<ChatSession>>;

    /// Persist a message, assigning the next sequence number of its chat.
    /// A blocked message and its ledger entry are written together.
    async fn insert_message(&self, message: Message, violation: Option<Violation>)
        -> AppResult<Message>;

    /// Last `limit` messages of a chat in sequence order.
    async fn list_messages(&self, chat_id: Uuid, limit: i64) -> AppResult<Vec<Message>>;

    /// Compare-and-set on a message's delivery status.
    async fn advance_message_status(
        &self,
        message_id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    ) -> AppResult<bool>;

    /// Record read receipts for `reader` on the given messages of a chat.
    /// Returns the ids that gained a receipt; repeated calls return nothing.
    async fn mark_read(
        &self,
        chat_id: Uuid,
        message_ids: &[Uuid],
        reader: &AuthenticatedUser,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>>;

    async fn get_violation(&self, violation_id: Uuid) -> AppResult<Option<Violation>>;

    /// Newest first.
    async fn list_violations(&self, filter: &ViolationFilter) -> AppResult<Vec<Violation>>;

    /// Apply a moderator decision if the entry is still pending. A `block`
    /// decision also blocks the chat in the same step.
    async fn review_violation(
        &self,
        violation_id: Uuid,
        outcome: &ReviewOutcome,
    ) -> AppResult<ReviewApplied>;

    async fn chat_stats(&self, store_id: Uuid, since: DateTime<Utc>) -> AppResult<ChatStats>;
}

/// Chat statuses a `block` decision may start from.
pub(crate) const BLOCKABLE: &[ChatStatus] = &[ChatStatus::Active, ChatStatus::Closed];
