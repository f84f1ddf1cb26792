use super::{ChatStore, ReviewApplied, BLOCKABLE};
use crate::error::{AppError, AppResult};
use crate::models::{
    AuthenticatedUser, ChatSession, ChatStats, ChatStatus, Message, MessageStatus, MessageType,
    Page, ReviewDecision, ReviewOutcome, UserRole, Violation, ViolationFilter, ViolationStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    chats: HashMap<Uuid, ChatSession>,
    /// Per chat, in sequence order
    messages: HashMap<Uuid, Vec<Message>>,
    message_chat: HashMap<Uuid, Uuid>,
    violations: HashMap<Uuid, Violation>,
}

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct InMemoryChatStore {
    inner: RwLock<Inner>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn insert_chat(&self, chat: &ChatSession) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if inner.chats.contains_key(&chat.id) {
            return Err(AppError::InvalidState(format!("chat {} already exists", chat.id)));
        }
        inner.chats.insert(chat.id, chat.clone());
        Ok(())
    }

    async fn find_active_chat(
        &self,
        client_id: Uuid,
        store_id: Uuid,
        product_id: Option<Uuid>,
    ) -> AppResult<Option<ChatSession>> {
        let inner = self.inner.read().await;
        Ok(inner
            .chats
            .values()
            .filter(|c| {
                c.status.is_active()
                    && c.participants.client_id == client_id
                    && c.participants.store_id == store_id
                    && c.product.as_ref().map(|p| p.id) == product_id
            })
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn get_chat(&self, chat_id: Uuid) -> AppResult<Option<ChatSession>> {
        Ok(self.inner.read().await.chats.get(&chat_id).cloned())
    }

    async fn list_chats_by_store(&self, store_id: Uuid, page: Page) -> AppResult<Vec<ChatSession>> {
        let inner = self.inner.read().await;
        let mut chats: Vec<ChatSession> = inner
            .chats
            .values()
            .filter(|c| c.participants.store_id == store_id)
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

        Ok(chats
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn list_active_chats_for(&self, user: &AuthenticatedUser) -> AppResult<Vec<ChatSession>> {
        let inner = self.inner.read().await;
        Ok(inner
            .chats
            .values()
            .filter(|c| c.status.is_active() && c.is_participant(user))
            .cloned()
            .collect())
    }

    async fn touch_chat(&self, chat_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| AppError::NotFound("chat".into()))?;
        if at > chat.last_activity {
            chat.last_activity = at;
        }
        Ok(())
    }

    async fn transition_chat_status(
        &self,
        chat_id: Uuid,
        from: &[ChatStatus],
        to: ChatStatus,
    ) -> AppResult<Option<ChatSession>> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| AppError::NotFound("chat".into()))?;

        if !from.contains(&chat.status) {
            return Ok(None);
        }
        chat.status = to;
        chat.last_activity = Utc::now();
        Ok(Some(chat.clone()))
    }

    async fn insert_message(
        &self,
        mut message: Message,
        violation: Option<Violation>,
    ) -> AppResult<Message> {
        let mut inner = self.inner.write().await;
        if !inner.chats.contains_key(&message.chat_id) {
            return Err(AppError::NotFound("chat".into()));
        }

        let log = inner.messages.entry(message.chat_id).or_default();
        message.sequence = log.last().map(|m| m.sequence + 1).unwrap_or(1);
        log.push(message.clone());

        inner.message_chat.insert(message.id, message.chat_id);
        if let Some(violation) = violation {
            inner.violations.insert(violation.id, violation);
        }
        Ok(message)
    }

    async fn list_messages(&self, chat_id: Uuid, limit: i64) -> AppResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let log = match inner.messages.get(&chat_id) {
            Some(log) => log,
            None => return Ok(Vec::new()),
        };
        let skip = log.len().saturating_sub(limit.max(0) as usize);
        Ok(log[skip..].to_vec())
    }

    async fn advance_message_status(
        &self,
        message_id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    ) -> AppResult<bool> {
        let mut inner = self.inner.write().await;
        let chat_id = match inner.message_chat.get(&message_id) {
            Some(id) => *id,
            None => return Err(AppError::NotFound("message".into())),
        };

        let message = inner
            .messages
            .get_mut(&chat_id)
            .and_then(|log| log.iter_mut().find(|m| m.id == message_id));

        match message {
            Some(m) if m.status == from && from.can_advance_to(to) => {
                m.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(AppError::NotFound("message".into())),
        }
    }

    async fn mark_read(
        &self,
        chat_id: Uuid,
        message_ids: &[Uuid],
        reader: &AuthenticatedUser,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let wanted: HashSet<Uuid> = message_ids.iter().copied().collect();
        let mut inner = self.inner.write().await;

        let Some(log) = inner.messages.get_mut(&chat_id) else {
            return Ok(Vec::new());
        };

        Ok(log
            .iter_mut()
            .filter(|m| wanted.contains(&m.id))
            .filter_map(|m| m.record_read(reader.user_id, reader.role, at).then_some(m.id))
            .collect())
    }

    async fn get_violation(&self, violation_id: Uuid) -> AppResult<Option<Violation>> {
        Ok(self.inner.read().await.violations.get(&violation_id).cloned())
    }

    async fn list_violations(&self, filter: &ViolationFilter) -> AppResult<Vec<Violation>> {
        let inner = self.inner.read().await;
        let mut violations: Vec<Violation> = inner
            .violations
            .values()
            .filter(|v| filter.status.map_or(true, |s| v.status == s))
            .filter(|v| filter.store_id.map_or(true, |s| v.store_id == s))
            .cloned()
            .collect();
        violations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(violations
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn review_violation(
        &self,
        violation_id: Uuid,
        outcome: &ReviewOutcome,
    ) -> AppResult<ReviewApplied> {
        let mut inner = self.inner.write().await;

        let violation = inner
            .violations
            .get_mut(&violation_id)
            .ok_or_else(|| AppError::NotFound("violation".into()))?;

        if violation.review(outcome).is_err() {
            return Ok(ReviewApplied::Rejected {
                current: violation.status,
            });
        }
        let violation = violation.clone();

        let mut blocked_chat = None;
        if outcome.decision == ReviewDecision::Block {
            if let Some(chat) = inner.chats.get_mut(&violation.chat_id) {
                if BLOCKABLE.contains(&chat.status) {
                    chat.status = ChatStatus::Blocked;
                    chat.last_activity = outcome.reviewed_at;
                    blocked_chat = Some(chat.clone());
                }
            }
        }

        Ok(ReviewApplied::Applied {
            violation,
            blocked_chat,
        })
    }

    async fn chat_stats(&self, store_id: Uuid, since: DateTime<Utc>) -> AppResult<ChatStats> {
        let inner = self.inner.read().await;
        let chats: Vec<&ChatSession> = inner
            .chats
            .values()
            .filter(|c| c.participants.store_id == store_id)
            .collect();

        let mut unread = 0;
        let mut response_times = Vec::new();
        for chat in &chats {
            let Some(log) = inner.messages.get(&chat.id) else {
                continue;
            };
            unread += log
                .iter()
                .filter(|m| {
                    m.sender.user_type == UserRole::Client
                        && matches!(m.status, MessageStatus::Sent | MessageStatus::Delivered)
                })
                .count() as i64;
            response_times.extend(response_times_of(log));
        }

        let violations_today = inner
            .violations
            .values()
            .filter(|v| v.store_id == store_id && v.created_at >= since)
            .count() as i64;

        let avg_response_time = (!response_times.is_empty())
            .then(|| response_times.iter().sum::<f64>() / response_times.len() as f64);

        Ok(ChatStats {
            total: chats.len() as i64,
            active: chats.iter().filter(|c| c.status.is_active()).count() as i64,
            unread,
            violations_today,
            avg_response_time,
        })
    }
}

/// Seconds from the first unanswered client message to the next store reply.
fn response_times_of(log: &[Message]) -> Vec<f64> {
    let mut waiting_since: Option<DateTime<Utc>> = None;
    let mut times = Vec::new();

    for message in log
        .iter()
        .filter(|m| !m.is_blocked() && m.message_type != MessageType::System)
    {
        match message.sender.user_type {
            UserRole::Client => {
                waiting_since.get_or_insert(message.created_at);
            }
            UserRole::StoreManager => {
                if let Some(asked) = waiting_since.take() {
                    let elapsed = message.created_at - asked;
                    let secs = elapsed.num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
                    times.push(secs.max(0.0));
                }
            }
            UserRole::Admin => {}
        }
    }
    times
}
