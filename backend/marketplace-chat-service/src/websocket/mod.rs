use crate::gateway::ConnectionId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod message_types;
pub mod session;
pub mod typing;

pub use events::ServerEvent;
pub use message_types::ClientCommand;
pub use session::ChatConnection;
pub use typing::TypingTracker;

/// Room entry: one subscribed connection
struct Subscriber {
    connection_id: ConnectionId,
    user_id: Uuid,
    sender: UnboundedSender<String>,
}

struct ConnectionEntry {
    user_id: Option<Uuid>,
    sender: UnboundedSender<String>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    // chat_id -> subscribed connections
    rooms: HashMap<Uuid, Vec<Subscriber>>,
}

/// Connection registry for realtime clients
///
/// Tracks every open connection and which chat rooms it is subscribed to.
/// Broadcasts only reach current subscribers; connections whose channel is
/// gone are pruned on the next send.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and return the receiving end of its
    /// outbound channel.
    pub async fn register(&self, connection_id: ConnectionId) -> UnboundedReceiver<String> {
        let (tx, rx) = unbounded_channel();
        let mut guard = self.inner.write().await;
        guard.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id: None,
                sender: tx,
                rooms: HashSet::new(),
            },
        );

        tracing::debug!(
            connection_id = %connection_id,
            total = guard.connections.len(),
            "connection registered"
        );
        rx
    }

    /// Attach the authenticated identity to a connection.
    pub async fn bind_user(&self, connection_id: ConnectionId, user_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        match guard.connections.get_mut(&connection_id) {
            Some(entry) => {
                entry.user_id = Some(user_id);
                true
            }
            None => false,
        }
    }

    /// Subscribe an authenticated connection to a chat room. Idempotent.
    pub async fn subscribe(&self, chat_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;
        let RegistryInner { connections, rooms } = &mut *guard;

        let Some(entry) = connections.get_mut(&connection_id) else {
            return false;
        };
        let Some(user_id) = entry.user_id else {
            return false;
        };

        if entry.rooms.insert(chat_id) {
            rooms.entry(chat_id).or_default().push(Subscriber {
                connection_id,
                user_id,
                sender: entry.sender.clone(),
            });
            tracing::debug!(
                chat_id = %chat_id,
                connection_id = %connection_id,
                subscribers = rooms.get(&chat_id).map(|v| v.len()).unwrap_or(0),
                "subscribed to chat"
            );
        }
        true
    }

    pub async fn unsubscribe(&self, chat_id: Uuid, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.connections.get_mut(&connection_id) {
            entry.rooms.remove(&chat_id);
        }
        remove_from_room(&mut guard.rooms, chat_id, connection_id);
    }

    /// Remove a connection and all of its subscriptions.
    ///
    /// Must be called when a connection closes; returns the bound user.
    pub async fn remove_connection(&self, connection_id: ConnectionId) -> Option<Uuid> {
        let mut guard = self.inner.write().await;
        let entry = guard.connections.remove(&connection_id)?;

        for chat_id in &entry.rooms {
            remove_from_room(&mut guard.rooms, *chat_id, connection_id);
        }

        tracing::debug!(
            connection_id = %connection_id,
            rooms = entry.rooms.len(),
            remaining = guard.connections.len(),
            "connection removed"
        );
        entry.user_id
    }

    /// Send an event to every subscriber of a chat.
    ///
    /// Returns the distinct users it reached.
    pub async fn broadcast(&self, chat_id: Uuid, event: &ServerEvent) -> Vec<Uuid> {
        self.broadcast_filtered(chat_id, event, None).await
    }

    /// Like [`broadcast`](Self::broadcast), skipping every connection of `user_id`.
    pub async fn broadcast_except(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        event: &ServerEvent,
    ) -> Vec<Uuid> {
        self.broadcast_filtered(chat_id, event, Some(user_id)).await
    }

    async fn broadcast_filtered(
        &self,
        chat_id: Uuid,
        event: &ServerEvent,
        skip_user: Option<Uuid>,
    ) -> Vec<Uuid> {
        let Some(payload) = encode(event) else {
            return Vec::new();
        };

        let mut reached = Vec::new();
        let mut guard = self.inner.write().await;
        if let Some(subscribers) = guard.rooms.get_mut(&chat_id) {
            let before = subscribers.len();

            subscribers.retain(|s| {
                if Some(s.user_id) == skip_user {
                    return true;
                }
                let alive = s.sender.send(payload.clone()).is_ok();
                if alive && !reached.contains(&s.user_id) {
                    reached.push(s.user_id);
                }
                alive
            });

            let after = subscribers.len();
            if before != after {
                tracing::debug!(
                    chat_id = %chat_id,
                    dead = before - after,
                    active = after,
                    "pruned dead subscribers"
                );
            }
            if subscribers.is_empty() {
                guard.rooms.remove(&chat_id);
            }
        }
        reached
    }

    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        let Some(payload) = encode(event) else {
            return false;
        };
        let guard = self.inner.read().await;
        guard
            .connections
            .get(&connection_id)
            .map(|entry| entry.sender.send(payload).is_ok())
            .unwrap_or(false)
    }

    /// Deliver to every open connection of a user, subscribed or not.
    pub async fn send_to_user(&self, user_id: Uuid, event: &ServerEvent) -> usize {
        let Some(payload) = encode(event) else {
            return 0;
        };
        let guard = self.inner.read().await;
        guard
            .connections
            .values()
            .filter(|entry| entry.user_id == Some(user_id))
            .filter(|entry| entry.sender.send(payload.clone()).is_ok())
            .count()
    }

    /// Drop every subscription of a chat. Connections stay open.
    pub async fn close_room(&self, chat_id: Uuid) -> usize {
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.rooms.remove(&chat_id) else {
            return 0;
        };
        for subscriber in &subscribers {
            if let Some(entry) = guard.connections.get_mut(&subscriber.connection_id) {
                entry.rooms.remove(&chat_id);
            }
        }
        subscribers.len()
    }

    pub async fn is_subscribed(&self, chat_id: Uuid, connection_id: ConnectionId) -> bool {
        let guard = self.inner.read().await;
        guard
            .connections
            .get(&connection_id)
            .map(|entry| entry.rooms.contains(&chat_id))
            .unwrap_or(false)
    }

    /// Get subscriber count for a chat (for debugging/metrics)
    pub async fn subscriber_count(&self, chat_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.rooms.get(&chat_id).map(|v| v.len()).unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

fn remove_from_room(
    rooms: &mut HashMap<Uuid, Vec<Subscriber>>,
    chat_id: Uuid,
    connection_id: ConnectionId,
) {
    if let Some(subscribers) = rooms.get_mut(&chat_id) {
        subscribers.retain(|s| s.connection_id != connection_id);
        if subscribers.is_empty() {
            rooms.remove(&chat_id);
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match event.to_payload() {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::error!(event = event.event_type(), error = %e, "failed to encode event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatStatus;

    fn closed(chat_id: Uuid) -> ServerEvent {
        ServerEvent::ChatClosed {
            chat_id,
            status: ChatStatus::Closed,
            reason: "closed".into(),
        }
    }

    async fn connected(registry: &ConnectionRegistry, user_id: Uuid) -> (ConnectionId, UnboundedReceiver<String>) {
        let id = ConnectionId::new();
        let rx = registry.register(id).await;
        registry.bind_user(id, user_id).await;
        (id, rx)
    }

    #[tokio::test]
    async fn test_subscribe_requires_identity() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let _rx = registry.register(id).await;
        assert!(!registry.subscribe(Uuid::new_v4(), id).await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers_only() {
        let registry = ConnectionRegistry::new();
        let chat = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (a, mut rx_a) = connected(&registry, alice).await;
        let (_b, mut rx_b) = connected(&registry, bob).await;
        registry.subscribe(chat, a).await;
        registry.subscribe(chat, a).await;

        let reached = registry.broadcast(chat, &closed(chat)).await;
        assert_eq!(reached, vec![alice]);
        assert!(rx_a.try_recv().is_ok());
        // idempotent subscribe: one copy only
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_user() {
        let registry = ConnectionRegistry::new();
        let chat = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (a, mut rx_a) = connected(&registry, alice).await;
        let (b, mut rx_b) = connected(&registry, bob).await;
        registry.subscribe(chat, a).await;
        registry.subscribe(chat, b).await;

        let reached = registry.broadcast_except(chat, alice, &closed(chat)).await;
        assert_eq!(reached, vec![bob]);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_remove_connection_cleans_rooms() {
        let registry = ConnectionRegistry::new();
        let chat = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (id, _rx) = connected(&registry, user).await;
        registry.subscribe(chat, id).await;
        assert_eq!(registry.subscriber_count(chat).await, 1);

        assert_eq!(registry.remove_connection(id).await, Some(user));
        assert_eq!(registry.subscriber_count(chat).await, 0);
        assert_eq!(registry.connection_count().await, 0);
        assert!(registry.remove_connection(id).await.is_none());
    }

    #[tokio::test]
    async fn test_dead_subscribers_are_pruned() {
        let registry = ConnectionRegistry::new();
        let chat = Uuid::new_v4();
        let (id, rx) = connected(&registry, Uuid::new_v4()).await;
        registry.subscribe(chat, id).await;
        drop(rx);

        assert!(registry.broadcast(chat, &closed(chat)).await.is_empty());
        assert_eq!(registry.subscriber_count(chat).await, 0);
    }

    #[tokio::test]
    async fn test_close_room_keeps_connections() {
        let registry = ConnectionRegistry::new();
        let chat = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (id, mut rx) = connected(&registry, user).await;
        registry.subscribe(chat, id).await;

        assert_eq!(registry.close_room(chat).await, 1);
        assert!(!registry.is_subscribed(chat, id).await);
        assert_eq!(registry.send_to_user(user, &closed(chat)).await, 1);
        assert!(rx.try_recv().is_ok());
    }
}
