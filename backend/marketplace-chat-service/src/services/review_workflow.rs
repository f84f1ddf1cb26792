//! Moderator review of the violation ledger.
//!
//! `pending` is left exactly once, straight into `resolved` (warning,
//! block) or `dismissed`. The store applies the transition as a guarded
//! update, so a second or concurrent action loses with `InvalidState` and
//! changes nothing.

use super::channel_manager::ChannelManager;
use super::notifier::UserNotifier;
use crate::db::{ChatStore, ReviewApplied};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    AuthenticatedUser, Page, ReviewDecision, ReviewOutcome, Violation, ViolationFilter,
    ViolationStatus,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

pub struct ReviewWorkflow {
    store: Arc<dyn ChatStore>,
    channels: Arc<ChannelManager>,
    notifier: Arc<dyn UserNotifier>,
}

impl ReviewWorkflow {
    pub fn new(
        store: Arc<dyn ChatStore>,
        channels: Arc<ChannelManager>,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        Self {
            store,
            channels,
            notifier,
        }
    }

    pub async fn list(
        &self,
        moderator: &AuthenticatedUser,
        status: Option<ViolationStatus>,
        store_id: Option<Uuid>,
        page: Page,
    ) -> AppResult<Vec<Violation>> {
        require_admin(moderator)?;
        let page = page.clamped();
        self.store
            .list_violations(&ViolationFilter {
                status,
                store_id,
                limit: page.limit,
                offset: page.offset,
            })
            .await
    }

    pub async fn get(&self, moderator: &AuthenticatedUser, violation_id: Uuid) -> AppResult<Violation> {
        require_admin(moderator)?;
        self.store
            .get_violation(violation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("violation".into()))
    }

    pub async fn act(
        &self,
        moderator: &AuthenticatedUser,
        violation_id: Uuid,
        decision: ReviewDecision,
        note: Option<String>,
    ) -> AppResult<Violation> {
        let target = self.get(moderator, violation_id).await?;

        let outcome = ReviewOutcome {
            decision,
            reviewed_by: moderator.user_id,
            reviewed_at: Utc::now(),
            note: note.filter(|n| !n.trim().is_empty()),
        };

        // a block must not race a send on the same chat
        let guard = self.channels.lock_chat(target.chat_id).await;
        let result = self.apply(moderator, violation_id, outcome, &guard).await;
        self.channels.unlock_chat(target.chat_id, guard);
        result
    }

    async fn apply(
        &self,
        moderator: &AuthenticatedUser,
        violation_id: Uuid,
        outcome: ReviewOutcome,
        locked: &OwnedMutexGuard<()>,
    ) -> AppResult<Violation> {
        let decision = outcome.decision;
        let (violation, blocked_chat) = match self
            .store
            .review_violation(violation_id, &outcome)
            .await?
        {
            ReviewApplied::Applied {
                violation,
                blocked_chat,
            } => (violation, blocked_chat),
            ReviewApplied::Rejected { current } => {
                tracing::info!(
                    violation_id = %violation_id,
                    status = %current,
                    "review rejected: violation already handled"
                );
                return Err(AppError::InvalidState(format!("violation is {current}")));
            }
        };

        metrics::record_violation_action(decision.as_str());
        tracing::info!(
            violation_id = %violation.id,
            chat_id = %violation.chat_id,
            moderator_id = %moderator.user_id,
            decision = decision.as_str(),
            "violation reviewed"
        );

        match decision {
            ReviewDecision::Warning => {
                if let Err(e) = self.notifier.warn(&violation).await {
                    tracing::warn!(violation_id = %violation.id, error = %e, "warning not delivered");
                }
            }
            ReviewDecision::Block => {
                if let Some(chat) = blocked_chat {
                    let reason = format!("blocked by moderation ({})", violation.violation_type);
                    if let Err(e) = self.channels.announce_termination(&chat, &reason, locked).await {
                        tracing::error!(chat_id = %chat.id, error = %e, "block announcement failed");
                    }
                }
            }
            ReviewDecision::Dismiss => {}
        }

        Ok(violation)
    }
}

fn require_admin(user: &AuthenticatedUser) -> AppResult<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
