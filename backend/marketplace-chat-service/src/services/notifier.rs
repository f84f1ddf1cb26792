use crate::error::AppResult;
use crate::models::Violation;
use crate::websocket::{ConnectionRegistry, ServerEvent};
use async_trait::async_trait;

/// Delivers moderator warnings to the offending user.
#[async_trait]
pub trait UserNotifier: Send + Sync {
    /// Returns how many live endpoints were reached.
    async fn warn(&self, violation: &Violation) -> AppResult<usize>;
}

/// Pushes a `moderation_warning` event to the user's open connections.
pub struct RealtimeNotifier {
    registry: ConnectionRegistry,
}

impl RealtimeNotifier {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }
}

pub fn warning_text(violation: &Violation) -> String {
    format!(
        "A moderator reviewed your message and issued a warning ({}). Sharing contact or payment details outside the platform can get this chat blocked.",
        violation.violation_type
    )
}

#[async_trait]
impl UserNotifier for RealtimeNotifier {
    async fn warn(&self, violation: &Violation) -> AppResult<usize> {
        let event = ServerEvent::ModerationWarning {
            violation_id: violation.id,
            chat_id: violation.chat_id,
            violation_type: violation.violation_type,
            message: warning_text(violation),
        };

        let reached = self.registry.send_to_user(violation.sender_id, &event).await;
        if reached == 0 {
            tracing::info!(
                violation_id = %violation.id,
                user_id = %violation.sender_id,
                "warned user is offline"
            );
        }
        Ok(reached)
    }
}
