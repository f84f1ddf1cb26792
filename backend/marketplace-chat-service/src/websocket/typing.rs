use crate::gateway::ConnectionId;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    pub user_id: Uuid,
    pub user_name: String,
    pub expires_at: Instant,
}

/// Typing state per (connection, chat).
///
/// Entries expire after a fixed TTL unless refreshed, so a client that
/// vanishes mid-sentence stops "typing" on its own.
pub struct TypingTracker {
    entries: DashMap<(ConnectionId, Uuid), TypingEntry>,
    ttl: Duration,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start or refresh. Returns true when the user was not typing before.
    pub fn start(
        &self,
        connection: ConnectionId,
        chat_id: Uuid,
        user_id: Uuid,
        user_name: &str,
        now: Instant,
    ) -> bool {
        let entry = TypingEntry {
            user_id,
            user_name: user_name.to_string(),
            expires_at: now + self.ttl,
        };
        self.entries.insert((connection, chat_id), entry).is_none()
    }

    pub fn stop(&self, connection: ConnectionId, chat_id: Uuid) -> Option<TypingEntry> {
        self.entries
            .remove(&(connection, chat_id))
            .map(|(_, entry)| entry)
    }

    /// Drop every entry of a connection (disconnect).
    pub fn clear_connection(&self, connection: ConnectionId) -> Vec<(Uuid, TypingEntry)> {
        let keys: Vec<(ConnectionId, Uuid)> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == connection)
            .map(|e| *e.key())
            .collect();

        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .map(|((_, chat_id), entry)| (chat_id, entry))
            .collect()
    }

    /// Remove and return entries whose TTL ran out.
    pub fn evict_expired(&self, now: Instant) -> Vec<(Uuid, TypingEntry)> {
        let expired: Vec<(ConnectionId, Uuid)> = self
            .entries
            .iter()
            .filter(|e| e.value().expires_at <= now)
            .map(|e| *e.key())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.entries.remove_if(&key, |_, entry| entry.expires_at <= now))
            .map(|((_, chat_id), entry)| (chat_id, entry))
            .collect()
    }

    pub fn is_typing(&self, connection: ConnectionId, chat_id: Uuid) -> bool {
        self.entries.contains_key(&(connection, chat_id))
    }
}
