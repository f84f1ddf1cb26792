use super::channel_manager::ChannelManager;
use crate::db::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::AuthenticatedUser;
use crate::websocket::ServerEvent;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound of ids accepted in one `mark_as_read`
pub const MAX_READ_BATCH: usize = 500;

pub struct ReadReceiptService {
    store: Arc<dyn ChatStore>,
    channels: Arc<ChannelManager>,
}

impl ReadReceiptService {
    pub fn new(store: Arc<dyn ChatStore>, channels: Arc<ChannelManager>) -> Self {
        Self { store, channels }
    }

    /// Record that `reader` has seen the given messages.
    ///
    /// Own messages, blocked messages, ids of other chats and ids already
    /// read are skipped. Returns the ids that gained a receipt; a
    /// `messages_read` event goes to the room only when that list is not
    /// empty.
    pub async fn mark_as_read(
        &self,
        reader: &AuthenticatedUser,
        chat_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<Vec<Uuid>> {
        if message_ids.len() > MAX_READ_BATCH {
            return Err(AppError::BadRequest(format!(
                "at most {MAX_READ_BATCH} message ids per call"
            )));
        }
        self.channels.authorize(reader, chat_id).await?;

        let mut seen = HashSet::new();
        let ids: Vec<Uuid> = message_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let read_at = Utc::now();
        let newly_read = self.store.mark_read(chat_id, &ids, reader, read_at).await?;
        if newly_read.is_empty() {
            return Ok(newly_read);
        }

        self.channels
            .registry()
            .broadcast(
                chat_id,
                &ServerEvent::MessagesRead {
                    chat_id,
                    reader_id: reader.user_id,
                    message_ids: newly_read.clone(),
                    read_at,
                },
            )
            .await;

        tracing::debug!(
            chat_id = %chat_id,
            reader_id = %reader.user_id,
            count = newly_read.len(),
            "messages read"
        );
        Ok(newly_read)
    }
}
