//! Chat rooms: membership checks, history, subscriptions and terminal
//! transitions (close / block).

use super::chat_locks::ChatLocks;
use crate::db::ChatStore;
use crate::error::{AppError, AppResult};
use crate::gateway::{ConnectionId, PresenceTracker};
use crate::models::{
    AuthenticatedUser, ChatSession, ChatStats, ChatStatus, Message, Page, ProductRef, UserRole,
};
use crate::websocket::{ConnectionRegistry, ServerEvent};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

pub struct ChannelManager {
    store: Arc<dyn ChatStore>,
    registry: ConnectionRegistry,
    presence: Arc<PresenceTracker>,
    locks: Arc<ChatLocks>,
    history_limit: i64,
}

impl ChannelManager {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: ConnectionRegistry,
        presence: Arc<PresenceTracker>,
        locks: Arc<ChatLocks>,
        history_limit: i64,
    ) -> Self {
        Self {
            store,
            registry,
            presence,
            locks,
            history_limit,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get or create the active chat between a client and a store about a
    /// product.
    pub async fn open_chat(
        &self,
        client: &AuthenticatedUser,
        store_id: Uuid,
        product: Option<ProductRef>,
    ) -> AppResult<ChatSession> {
        if client.role != UserRole::Client {
            return Err(AppError::Forbidden);
        }

        let product_id = product.as_ref().map(|p| p.id);
        if let Some(existing) = self
            .store
            .find_active_chat(client.user_id, store_id, product_id)
            .await?
        {
            return Ok(self.with_presence(existing));
        }

        let chat = ChatSession::open(client, store_id, product);
        self.store.insert_chat(&chat).await?;
        tracing::info!(
            chat_id = %chat.id,
            store_id = %store_id,
            client_id = %client.user_id,
            "chat opened"
        );
        Ok(self.with_presence(chat))
    }

    pub async fn get_chat(&self, chat_id: Uuid) -> AppResult<ChatSession> {
        let chat = self
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| AppError::NotFound("chat".into()))?;
        Ok(self.with_presence(chat))
    }

    /// Load a chat the user takes part in.
    pub async fn authorize(&self, user: &AuthenticatedUser, chat_id: Uuid) -> AppResult<ChatSession> {
        let chat = self.get_chat(chat_id).await?;
        if !chat.is_participant(user) {
            return Err(AppError::Forbidden);
        }
        Ok(chat)
    }

    /// History as `user` is allowed to see it: blocked messages only for
    /// their sender. Admins see everything for review.
    pub async fn history(&self, user: &AuthenticatedUser, chat_id: Uuid) -> AppResult<Vec<Message>> {
        if !user.is_admin() {
            self.authorize(user, chat_id).await?;
        } else {
            self.get_chat(chat_id).await?;
        }
        self.visible_history(user, chat_id).await
    }

    async fn visible_history(&self, user: &AuthenticatedUser, chat_id: Uuid) -> AppResult<Vec<Message>> {
        let messages = self.store.list_messages(chat_id, self.history_limit).await?;
        if user.is_admin() {
            return Ok(messages);
        }
        Ok(messages
            .into_iter()
            .filter(|m| m.is_visible_to(user.user_id))
            .collect())
    }

    /// Join a chat room. Closed and blocked chats still return their
    /// history but the connection is not subscribed.
    pub async fn join(
        &self,
        user: &AuthenticatedUser,
        connection: ConnectionId,
        chat_id: Uuid,
    ) -> AppResult<(ChatSession, Vec<Message>)> {
        self.authorize(user, chat_id).await?;

        // status check and subscribe must not straddle a close or block
        let guard = self.lock_chat(chat_id).await;
        let subscribed = self.subscribe_if_active(connection, chat_id).await;
        self.unlock_chat(chat_id, guard);
        let (chat, subscribed) = subscribed?;

        let messages = self.visible_history(user, chat_id).await?;
        if chat.status.is_active() {
            if !subscribed {
                return Err(AppError::Auth("connection is not authenticated".into()));
            }
            tracing::debug!(chat_id = %chat_id, user_id = %user.user_id, "joined chat");
        } else {
            tracing::debug!(
                chat_id = %chat_id,
                status = %chat.status,
                "read-only join of inactive chat"
            );
        }
        Ok((chat, messages))
    }

    async fn subscribe_if_active(
        &self,
        connection: ConnectionId,
        chat_id: Uuid,
    ) -> AppResult<(ChatSession, bool)> {
        let chat = self.get_chat(chat_id).await?;
        if !chat.status.is_active() {
            return Ok((chat, false));
        }
        let subscribed = self.registry.subscribe(chat_id, connection).await;
        Ok((chat, subscribed))
    }

    pub async fn leave(&self, connection: ConnectionId, chat_id: Uuid) {
        self.registry.unsubscribe(chat_id, connection).await;
    }

    pub async fn list_store_chats(
        &self,
        user: &AuthenticatedUser,
        store_id: Uuid,
        page: Page,
    ) -> AppResult<Vec<ChatSession>> {
        if !user.manages_store(store_id) {
            return Err(AppError::Forbidden);
        }
        let chats = self.store.list_chats_by_store(store_id, page.clamped()).await?;
        Ok(chats.into_iter().map(|c| self.with_presence(c)).collect())
    }

    /// Dashboard figures for a store; violations are counted from the start
    /// of the current UTC day.
    pub async fn store_stats(&self, user: &AuthenticatedUser, store_id: Uuid) -> AppResult<ChatStats> {
        if !user.manages_store(store_id) {
            return Err(AppError::Forbidden);
        }
        self.store.chat_stats(store_id, start_of_day(Utc::now())).await
    }

    /// Close an active chat. Closing an already closed chat is a no-op.
    pub async fn close_chat(
        &self,
        actor: &AuthenticatedUser,
        chat_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<ChatSession> {
        let chat = self.get_chat(chat_id).await?;
        if !actor.manages_store(chat.participants.store_id) {
            return Err(AppError::Forbidden);
        }

        let guard = self.lock_chat(chat_id).await;
        let closed = match self
            .store
            .transition_chat_status(chat_id, &[ChatStatus::Active], ChatStatus::Closed)
            .await?
        {
            Some(closed) => closed,
            None => {
                self.unlock_chat(chat_id, guard);
                let current = self.get_chat(chat_id).await?;
                return match current.status {
                    ChatStatus::Closed => Ok(current),
                    other => Err(AppError::InvalidState(format!("chat is {other}"))),
                };
            }
        };

        let reason = reason.unwrap_or_else(|| format!("closed by {}", actor.role));
        let announced = self.finish_termination(&closed, &reason).await;
        self.unlock_chat(chat_id, guard);
        announced?;

        tracing::info!(chat_id = %chat_id, actor = %actor.user_id, "chat closed");
        Ok(self.with_presence(closed))
    }

    /// Hold a chat's send lock while its status is changed elsewhere (a
    /// moderator block), so no message slips in between.
    pub async fn lock_chat(&self, chat_id: Uuid) -> OwnedMutexGuard<()> {
        self.locks.acquire(chat_id).await
    }

    pub fn unlock_chat(&self, chat_id: Uuid, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.locks.release_idle(chat_id);
    }

    /// Announce a chat whose status already moved to a terminal state.
    /// The caller holds the lock from [`Self::lock_chat`].
    pub async fn announce_termination(
        &self,
        chat: &ChatSession,
        reason: &str,
        _locked: &OwnedMutexGuard<()>,
    ) -> AppResult<()> {
        self.finish_termination(chat, reason).await
    }

    /// Must run under the chat lock.
    async fn finish_termination(&self, chat: &ChatSession, reason: &str) -> AppResult<()> {
        let notice = Message::system(chat.id, format!("Chat {}: {}", chat.status, reason));
        let notice = self.store.insert_message(notice, None).await?;

        self.registry
            .broadcast(chat.id, &ServerEvent::NewMessage { message: notice })
            .await;
        self.registry
            .broadcast(
                chat.id,
                &ServerEvent::ChatClosed {
                    chat_id: chat.id,
                    status: chat.status,
                    reason: reason.to_string(),
                },
            )
            .await;
        let dropped = self.registry.close_room(chat.id).await;

        tracing::info!(
            chat_id = %chat.id,
            status = %chat.status,
            dropped_subscriptions = dropped,
            "chat terminated"
        );
        Ok(())
    }

    fn with_presence(&self, mut chat: ChatSession) -> ChatSession {
        chat.presence = self.presence.flags_for(&chat);
        chat
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_start_of_day() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 17, 45, 12).unwrap();
        assert_eq!(
            start_of_day(now),
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
        );
    }
}
