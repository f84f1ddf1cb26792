use crate::error::{AppError, AppResult};
use crate::gateway::ConnectionId;
use crate::models::AuthenticatedUser;
use crate::websocket::typing::TypingEntry;
use crate::websocket::{ConnectionRegistry, ServerEvent, TypingTracker};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Relays typing indicators to the other side of a chat and expires them.
pub struct TypingBroadcaster {
    tracker: TypingTracker,
    registry: ConnectionRegistry,
}

impl TypingBroadcaster {
    pub fn new(ttl: Duration, registry: ConnectionRegistry) -> Self {
        Self {
            tracker: TypingTracker::new(ttl),
            registry,
        }
    }

    pub fn tracker(&self) -> &TypingTracker {
        &self.tracker
    }

    /// Only connections subscribed to the chat may signal typing. A repeated
    /// `is_typing: true` refreshes the TTL without re-broadcasting.
    pub async fn set_typing(
        &self,
        user: &AuthenticatedUser,
        connection: ConnectionId,
        chat_id: Uuid,
        is_typing: bool,
    ) -> AppResult<()> {
        if !self.registry.is_subscribed(chat_id, connection).await {
            return Err(AppError::Forbidden);
        }

        let changed = if is_typing {
            self.tracker
                .start(connection, chat_id, user.user_id, &user.display_name, Instant::now())
        } else {
            self.tracker.stop(connection, chat_id).is_some()
        };

        if changed {
            self.announce(chat_id, user.user_id, &user.display_name, is_typing)
                .await;
        }
        Ok(())
    }

    /// Stop every indicator a closing connection left behind.
    pub async fn clear_connection(&self, connection: ConnectionId) {
        for (chat_id, entry) in self.tracker.clear_connection(connection) {
            self.announce(chat_id, entry.user_id, &entry.user_name, false)
                .await;
        }
    }

    /// Evict expired indicators. Returns how many were stopped.
    pub async fn sweep(&self, now: Instant) -> usize {
        let expired = self.tracker.evict_expired(now);
        let count = expired.len();
        for (chat_id, TypingEntry { user_id, user_name, .. }) in expired {
            self.announce(chat_id, user_id, &user_name, false).await;
        }
        count
    }

    pub fn spawn_sweeper(self: Arc<Self>, tick: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let expired = self.sweep(Instant::now()).await;
                if expired > 0 {
                    tracing::trace!(expired, "typing indicators expired");
                }
            }
        })
    }

    async fn announce(&self, chat_id: Uuid, user_id: Uuid, user_name: &str, is_typing: bool) {
        let event = ServerEvent::UserTyping {
            chat_id,
            user_id,
            user_name: user_name.to_string(),
            is_typing,
        };
        self.registry.broadcast_except(chat_id, user_id, &event).await;
    }
}
