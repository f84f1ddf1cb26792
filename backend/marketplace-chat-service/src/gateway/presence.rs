use super::connection::ConnectionId;
use crate::models::{AuthenticatedUser, ChatSession, PresenceFlags, UserRole};
use dashmap::DashMap;
use std::collections::HashSet;
use uuid::Uuid;

/// Change in a user's online status caused by one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// First connection of the user
    CameOnline,
    /// Last connection of the user went away
    WentOffline,
    Unchanged,
}

/// Counts live connections per user.
///
/// A user is online while at least one authenticated connection exists, so
/// a second tab neither re-announces nor a closed tab prematurely hides them.
#[derive(Default)]
pub struct PresenceTracker {
    users: DashMap<Uuid, HashSet<ConnectionId>>,
    /// store id -> manager connections, for the store side of a chat
    stores: DashMap<Uuid, HashSet<ConnectionId>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, user: &AuthenticatedUser, connection: ConnectionId) -> PresenceChange {
        if let (UserRole::StoreManager, Some(store_id)) = (user.role, user.store_id) {
            self.stores.entry(store_id).or_default().insert(connection);
        }

        let mut entry = self.users.entry(user.user_id).or_default();
        let first = entry.is_empty();
        entry.insert(connection);

        if first {
            PresenceChange::CameOnline
        } else {
            PresenceChange::Unchanged
        }
    }

    pub fn disconnect(&self, user: &AuthenticatedUser, connection: ConnectionId) -> PresenceChange {
        if let Some(store_id) = user.store_id {
            self.stores.remove_if_mut(&store_id, |_, conns| {
                conns.remove(&connection);
                conns.is_empty()
            });
        }

        let mut went_offline = false;
        let mut removed = false;
        self.users.remove_if_mut(&user.user_id, |_, conns| {
            removed = conns.remove(&connection);
            went_offline = removed && conns.is_empty();
            conns.is_empty()
        });

        if went_offline {
            PresenceChange::WentOffline
        } else {
            PresenceChange::Unchanged
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.users
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    pub fn is_store_online(&self, store_id: Uuid) -> bool {
        self.stores
            .get(&store_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    pub fn flags_for(&self, chat: &ChatSession) -> PresenceFlags {
        PresenceFlags {
            client_online: self.is_online(chat.participants.client_id),
            store_online: self.is_store_online(chat.participants.store_id),
        }
    }

    pub fn online_users(&self) -> usize {
        self.users.len()
    }
}
