use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per chat.
///
/// Serializes "assign sequence, persist, broadcast" within a chat while
/// different chats proceed in parallel.
#[derive(Default)]
pub struct ChatLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, chat_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(chat_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop the mutex of a chat nobody holds or waits on.
    pub fn release_idle(&self, chat_id: Uuid) {
        self.locks
            .remove_if(&chat_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_chat_is_serialized() {
        let locks = Arc::new(ChatLocks::new());
        let chat = Uuid::new_v4();

        let guard = locks.acquire(chat).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(chat).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_chats_do_not_block() {
        let locks = ChatLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(Uuid::new_v4()))
            .await
            .expect("second chat should not wait");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_release_idle_keeps_held_locks() {
        let locks = ChatLocks::new();
        let chat = Uuid::new_v4();
        let guard = locks.acquire(chat).await;
        locks.release_idle(chat);
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.release_idle(chat);
        assert!(locks.is_empty());
    }
}
