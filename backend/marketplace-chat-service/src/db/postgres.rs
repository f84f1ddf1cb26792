use super::{ChatStore, ReviewApplied, BLOCKABLE};
use crate::error::{AppError, AppResult};
use crate::models::{
    AuthenticatedUser, ChatSession, ChatStats, ChatStatus, Message, MessageStatus, Page,
    Participants, PresenceFlags, ProductRef, ReadReceipt, ReviewDecision, ReviewOutcome,
    SenderInfo, UserRole, ValidationInfo, Violation, ViolationFilter, ViolationStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const CHAT_COLUMNS: &str = "id, client_id, store_id, client_name, product_id, product_name, \
                            status, last_activity, created_at";
const MESSAGE_COLUMNS: &str = "id, chat_id, sequence, sender_id, sender_role, sender_name, \
                               message_type, content, original_content, validation, status, \
                               read_by, created_at";
const VIOLATION_COLUMNS: &str = "id, chat_id, message_id, store_id, sender_id, client_name, \
                                 product_name, violation_type, violation_details, blocked_content, \
                                 severity, status, action, reviewed_by, reviewed_at, review_note, \
                                 created_at";

pub async fn init_pool(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse<T: FromStr<Err = String>>(value: &str) -> AppResult<T> {
    value
        .parse()
        .map_err(|e: String| AppError::Database(format!("corrupt row: {e}")))
}

#[derive(FromRow)]
struct ChatRow {
    id: Uuid,
    client_id: Uuid,
    store_id: Uuid,
    client_name: String,
    product_id: Option<Uuid>,
    product_name: Option<String>,
    status: String,
    last_activity: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChatRow> for ChatSession {
    type Error = AppError;

    fn try_from(row: ChatRow) -> AppResult<Self> {
        Ok(ChatSession {
            id: row.id,
            participants: Participants {
                client_id: row.client_id,
                store_id: row.store_id,
            },
            client_name: row.client_name,
            product: row.product_id.map(|id| ProductRef {
                id,
                name: row.product_name.unwrap_or_default(),
            }),
            status: parse(&row.status)?,
            last_activity: row.last_activity,
            created_at: row.created_at,
            presence: PresenceFlags::default(),
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    chat_id: Uuid,
    sequence: i64,
    sender_id: Uuid,
    sender_role: String,
    sender_name: String,
    message_type: String,
    content: String,
    original_content: Option<String>,
    validation: Json<ValidationInfo>,
    status: String,
    read_by: Json<Vec<ReadReceipt>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> AppResult<Self> {
        Ok(Message {
            id: row.id,
            chat_id: row.chat_id,
            sequence: row.sequence,
            sender: SenderInfo {
                user_id: row.sender_id,
                user_type: parse(&row.sender_role)?,
                user_name: row.sender_name,
            },
            message_type: parse(&row.message_type)?,
            content: row.content,
            original_content: row.original_content,
            validation: row.validation.0,
            status: parse(&row.status)?,
            read_by: row.read_by.0,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ViolationRow {
    id: Uuid,
    chat_id: Uuid,
    message_id: Uuid,
    store_id: Uuid,
    sender_id: Uuid,
    client_name: String,
    product_name: Option<String>,
    violation_type: String,
    violation_details: String,
    blocked_content: Json<Vec<String>>,
    severity: String,
    status: String,
    action: String,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    review_note: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ViolationRow> for Violation {
    type Error = AppError;

    fn try_from(row: ViolationRow) -> AppResult<Self> {
        Ok(Violation {
            id: row.id,
            chat_id: row.chat_id,
            message_id: row.message_id,
            store_id: row.store_id,
            sender_id: row.sender_id,
            client_name: row.client_name,
            product_name: row.product_name,
            violation_type: parse(&row.violation_type)?,
            violation_details: row.violation_details,
            blocked_content: row.blocked_content.0,
            severity: parse(&row.severity)?,
            status: parse(&row.status)?,
            action: parse(&row.action)?,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            review_note: row.review_note,
            created_at: row.created_at,
        })
    }
}

fn status_list(statuses: &[ChatStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn insert_chat(&self, chat: &ChatSession) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (
                id, client_id, store_id, client_name, product_id, product_name,
                status, last_activity, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(chat.id)
        .bind(chat.participants.client_id)
        .bind(chat.participants.store_id)
        .bind(&chat.client_name)
        .bind(chat.product.as_ref().map(|p| p.id))
        .bind(chat.product_name())
        .bind(chat.status.as_str())
        .bind(chat.last_activity)
        .bind(chat.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(chat_id = %chat.id, store_id = %chat.participants.store_id, "chat created");
        Ok(())
    }

    async fn find_active_chat(
        &self,
        client_id: Uuid,
        store_id: Uuid,
        product_id: Option<Uuid>,
    ) -> AppResult<Option<ChatSession>> {
        let row = sqlx::query_as::<_, ChatRow>(&format!(
            r#"
            SELECT {CHAT_COLUMNS}
            FROM chat_sessions
            WHERE client_id = $1
              AND store_id = $2
              AND product_id IS NOT DISTINCT FROM $3
              AND status = 'active'
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(client_id)
        .bind(store_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChatSession::try_from).transpose()
    }

    async fn get_chat(&self, chat_id: Uuid) -> AppResult<Option<ChatSession>> {
        let row = sqlx::query_as::<_, ChatRow>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chat_sessions WHERE id = $1"
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChatSession::try_from).transpose()
    }

    async fn list_chats_by_store(&self, store_id: Uuid, page: Page) -> AppResult<Vec<ChatSession>> {
        let rows = sqlx::query_as::<_, ChatRow>(&format!(
            r#"
            SELECT {CHAT_COLUMNS}
            FROM chat_sessions
            WHERE store_id = $1
            ORDER BY last_activity DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(store_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatSession::try_from).collect()
    }

    async fn list_active_chats_for(&self, user: &AuthenticatedUser) -> AppResult<Vec<ChatSession>> {
        let rows = match (user.role, user.store_id) {
            (UserRole::Client, _) => {
                sqlx::query_as::<_, ChatRow>(&format!(
                    "SELECT {CHAT_COLUMNS} FROM chat_sessions WHERE client_id = $1 AND status = 'active'"
                ))
                .bind(user.user_id)
                .fetch_all(&self.pool)
                .await?
            }
            (UserRole::StoreManager, Some(store_id)) => {
                sqlx::query_as::<_, ChatRow>(&format!(
                    "SELECT {CHAT_COLUMNS} FROM chat_sessions WHERE store_id = $1 AND status = 'active'"
                ))
                .bind(store_id)
                .fetch_all(&self.pool)
                .await?
            }
            _ => Vec::new(),
        };

        rows.into_iter().map(ChatSession::try_from).collect()
    }

    async fn touch_chat(&self, chat_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            "UPDATE chat_sessions SET last_activity = GREATEST(last_activity, $2) WHERE id = $1",
        )
        .bind(chat_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition_chat_status(
        &self,
        chat_id: Uuid,
        from: &[ChatStatus],
        to: ChatStatus,
    ) -> AppResult<Option<ChatSession>> {
        let row = sqlx::query_as::<_, ChatRow>(&format!(
            r#"
            UPDATE chat_sessions
            SET status = $3, last_activity = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING {CHAT_COLUMNS}
            "#
        ))
        .bind(chat_id)
        .bind(status_list(from))
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => {
                // distinguish a failed guard from a missing chat
                if self.get_chat(chat_id).await?.is_none() {
                    return Err(AppError::NotFound("chat".into()));
                }
                Ok(None)
            }
        }
    }

    async fn insert_message(
        &self,
        message: Message,
        violation: Option<Violation>,
    ) -> AppResult<Message> {
        let mut tx = self.pool.begin().await?;

        // row lock serializes sequence assignment across instances
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM chat_sessions WHERE id = $1 FOR UPDATE")
                .bind(message.chat_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(AppError::NotFound("chat".into()));
        }

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            INSERT INTO chat_messages (
                id, chat_id, sequence, sender_id, sender_role, sender_name, message_type,
                content, original_content, validation, status, read_by, created_at
            )
            SELECT $1, $2, COALESCE(MAX(sequence), 0) + 1, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
            FROM chat_messages
            WHERE chat_id = $2
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(message.id)
        .bind(message.chat_id)
        .bind(message.sender.user_id)
        .bind(message.sender.user_type.as_str())
        .bind(&message.sender.user_name)
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(&message.original_content)
        .bind(Json(&message.validation))
        .bind(message.status.as_str())
        .bind(Json(&message.read_by))
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(v) = &violation {
            sqlx::query(
                r#"
                INSERT INTO chat_violations (
                    id, chat_id, message_id, store_id, sender_id, client_name, product_name,
                    violation_type, violation_details, blocked_content, severity, status,
                    action, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(v.id)
            .bind(v.chat_id)
            .bind(v.message_id)
            .bind(v.store_id)
            .bind(v.sender_id)
            .bind(&v.client_name)
            .bind(&v.product_name)
            .bind(v.violation_type.as_str())
            .bind(&v.violation_details)
            .bind(Json(&v.blocked_content))
            .bind(v.severity.as_str())
            .bind(v.status.as_str())
            .bind(v.action.as_str())
            .bind(v.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        row.try_into()
    }

    async fn list_messages(&self, chat_id: Uuid, limit: i64) -> AppResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT * FROM (
                SELECT {MESSAGE_COLUMNS}
                FROM chat_messages
                WHERE chat_id = $1
                ORDER BY sequence DESC
                LIMIT $2
            ) recent
            ORDER BY sequence ASC
            "#
        ))
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn advance_message_status(
        &self,
        message_id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    ) -> AppResult<bool> {
        if !from.can_advance_to(to) {
            return Ok(false);
        }

        let result = sqlx::query("UPDATE chat_messages SET status = $3 WHERE id = $1 AND status = $2")
            .bind(message_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_read(
        &self,
        chat_id: Uuid,
        message_ids: &[Uuid],
        reader: &AuthenticatedUser,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        // one statement: the containment guard makes a repeat a no-op
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE chat_messages
            SET read_by = read_by || jsonb_build_array(
                    jsonb_build_object('user_id', $3::text, 'read_at', $5::text)
                ),
                status = CASE
                    WHEN sender_role <> $4 AND status IN ('sent', 'delivered') THEN 'read'
                    ELSE status
                END
            WHERE chat_id = $1
              AND id = ANY($2)
              AND status <> 'blocked'
              AND sender_id <> $6
              AND NOT read_by @> jsonb_build_array(jsonb_build_object('user_id', $3::text))
            RETURNING id
            "#,
        )
        .bind(chat_id)
        .bind(message_ids)
        .bind(reader.user_id.to_string())
        .bind(reader.role.as_str())
        .bind(at.to_rfc3339())
        .bind(reader.user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn get_violation(&self, violation_id: Uuid) -> AppResult<Option<Violation>> {
        let row = sqlx::query_as::<_, ViolationRow>(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM chat_violations WHERE id = $1"
        ))
        .bind(violation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Violation::try_from).transpose()
    }

    async fn list_violations(&self, filter: &ViolationFilter) -> AppResult<Vec<Violation>> {
        let rows = sqlx::query_as::<_, ViolationRow>(&format!(
            r#"
            SELECT {VIOLATION_COLUMNS}
            FROM chat_violations
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR store_id = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.store_id)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Violation::try_from).collect()
    }

    async fn review_violation(
        &self,
        violation_id: Uuid,
        outcome: &ReviewOutcome,
    ) -> AppResult<ReviewApplied> {
        let mut tx = self.pool.begin().await?;
        let decision = outcome.decision;

        let updated = sqlx::query_as::<_, ViolationRow>(&format!(
            r#"
            UPDATE chat_violations
            SET status = $2, action = $3, reviewed_by = $4, reviewed_at = $5, review_note = $6
            WHERE id = $1 AND status = 'pending'
            RETURNING {VIOLATION_COLUMNS}
            "#
        ))
        .bind(violation_id)
        .bind(decision.target_status().as_str())
        .bind(decision.recorded_action().as_str())
        .bind(outcome.reviewed_by)
        .bind(outcome.reviewed_at)
        .bind(&outcome.note)
        .fetch_optional(&mut *tx)
        .await?;

        let violation: Violation = match updated {
            Some(row) => row.try_into()?,
            None => {
                let current: Option<String> =
                    sqlx::query_scalar("SELECT status FROM chat_violations WHERE id = $1")
                        .bind(violation_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                tx.rollback().await?;
                return match current {
                    Some(status) => Ok(ReviewApplied::Rejected {
                        current: parse::<ViolationStatus>(&status)?,
                    }),
                    None => Err(AppError::NotFound("violation".into())),
                };
            }
        };

        let blocked_chat = if decision == ReviewDecision::Block {
            sqlx::query_as::<_, ChatRow>(&format!(
                r#"
                UPDATE chat_sessions
                SET status = 'blocked', last_activity = $3
                WHERE id = $1 AND status = ANY($2)
                RETURNING {CHAT_COLUMNS}
                "#
            ))
            .bind(violation.chat_id)
            .bind(status_list(BLOCKABLE))
            .bind(outcome.reviewed_at)
            .fetch_optional(&mut *tx)
            .await?
            .map(ChatSession::try_from)
            .transpose()?
        } else {
            None
        };

        tx.commit().await?;

        Ok(ReviewApplied::Applied {
            violation,
            blocked_chat,
        })
    }

    async fn chat_stats(&self, store_id: Uuid, since: DateTime<Utc>) -> AppResult<ChatStats> {
        let (total, active): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'active')
            FROM chat_sessions
            WHERE store_id = $1
            "#,
        )
        .bind(store_id)
        .fetch_one(&self.pool)
        .await?;

        let unread: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM chat_messages m
            JOIN chat_sessions c ON c.id = m.chat_id
            WHERE c.store_id = $1
              AND m.sender_role = 'client'
              AND m.status IN ('sent', 'delivered')
            "#,
        )
        .bind(store_id)
        .fetch_one(&self.pool)
        .await?;

        let violations_today: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_violations WHERE store_id = $1 AND created_at >= $2",
        )
        .bind(store_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        // turn = store replies before this row; each turn pairs the first
        // client message with the reply that closes it
        let avg_response_time: Option<f64> = sqlx::query_scalar(
            r#"
            WITH ordered AS (
                SELECT m.chat_id, m.sender_role, m.created_at,
                       COUNT(*) FILTER (WHERE m.sender_role = 'store_manager') OVER (
                           PARTITION BY m.chat_id ORDER BY m.sequence
                           ROWS BETWEEN UNBOUNDED PRECEDING AND 1 PRECEDING
                       ) AS turn
                FROM chat_messages m
                JOIN chat_sessions c ON c.id = m.chat_id
                WHERE c.store_id = $1
                  AND m.status <> 'blocked'
                  AND m.message_type <> 'system'
            ), turns AS (
                SELECT MIN(created_at) FILTER (WHERE sender_role = 'client') AS asked_at,
                       MIN(created_at) FILTER (WHERE sender_role = 'store_manager') AS answered_at
                FROM ordered
                GROUP BY chat_id, turn
            )
            SELECT AVG(EXTRACT(EPOCH FROM (answered_at - asked_at)))::FLOAT8
            FROM turns
            WHERE asked_at IS NOT NULL AND answered_at > asked_at
            "#,
        )
        .bind(store_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ChatStats {
            total,
            active,
            unread,
            violations_today,
            avg_response_time,
        })
    }
}
