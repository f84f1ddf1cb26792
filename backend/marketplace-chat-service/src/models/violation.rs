use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    Phone,
    Email,
    ExternalLink,
    ForbiddenKeyword,
    FraudPattern,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::Phone => "phone",
            ViolationType::Email => "email",
            ViolationType::ExternalLink => "external_link",
            ViolationType::ForbiddenKeyword => "forbidden_keyword",
            ViolationType::FraudPattern => "fraud_pattern",
        }
    }

    /// Triage priority of a rule of this type before policy adjustments.
    pub fn default_severity(&self) -> Severity {
        match self {
            ViolationType::Phone | ViolationType::FraudPattern => Severity::High,
            ViolationType::Email | ViolationType::ExternalLink => Severity::Medium,
            ViolationType::ForbiddenKeyword => Severity::Low,
        }
    }

    /// Types that reveal a way to reach the user outside the platform.
    pub fn is_contact_info(&self) -> bool {
        matches!(
            self,
            ViolationType::Phone | ViolationType::Email | ViolationType::ExternalLink
        )
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone" => Ok(ViolationType::Phone),
            "email" => Ok(ViolationType::Email),
            "external_link" => Ok(ViolationType::ExternalLink),
            "forbidden_keyword" => Ok(ViolationType::ForbiddenKeyword),
            "fraud_pattern" => Ok(ViolationType::FraudPattern),
            other => Err(format!("unknown violation type: {other}")),
        }
    }
}

/// Ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Violation review status with state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
    Pending,
    Reviewed,
    Resolved,
    Dismissed,
}

impl ViolationStatus {
    /// Moderator actions leave `pending` exactly once, straight into a
    /// terminal state.
    pub fn can_transition_to(&self, new_status: ViolationStatus) -> bool {
        matches!(
            (self, new_status),
            (ViolationStatus::Pending, ViolationStatus::Resolved)
                | (ViolationStatus::Pending, ViolationStatus::Dismissed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ViolationStatus::Resolved | ViolationStatus::Dismissed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationStatus::Pending => "pending",
            ViolationStatus::Reviewed => "reviewed",
            ViolationStatus::Resolved => "resolved",
            ViolationStatus::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for ViolationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ViolationStatus::Pending),
            "reviewed" => Ok(ViolationStatus::Reviewed),
            "resolved" => Ok(ViolationStatus::Resolved),
            "dismissed" => Ok(ViolationStatus::Dismissed),
            other => Err(format!("unknown violation status: {other}")),
        }
    }
}

/// Action recorded on the ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationAction {
    Warning,
    Block,
    None,
}

impl ViolationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationAction::Warning => "warning",
            ViolationAction::Block => "block",
            ViolationAction::None => "none",
        }
    }
}

impl FromStr for ViolationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warning" => Ok(ViolationAction::Warning),
            "block" => Ok(ViolationAction::Block),
            "none" => Ok(ViolationAction::None),
            other => Err(format!("unknown violation action: {other}")),
        }
    }
}

/// What a moderator asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Warning,
    Block,
    Dismiss,
}

impl ReviewDecision {
    pub fn target_status(&self) -> ViolationStatus {
        match self {
            ReviewDecision::Warning | ReviewDecision::Block => ViolationStatus::Resolved,
            ReviewDecision::Dismiss => ViolationStatus::Dismissed,
        }
    }

    pub fn recorded_action(&self) -> ViolationAction {
        match self {
            ReviewDecision::Warning => ViolationAction::Warning,
            ReviewDecision::Block => ViolationAction::Block,
            ReviewDecision::Dismiss => ViolationAction::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Warning => "warning",
            ReviewDecision::Block => "block",
            ReviewDecision::Dismiss => "dismiss",
        }
    }
}

/// One rule hit produced by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedViolation {
    pub rule_id: String,
    pub violation_type: ViolationType,
    pub severity: Severity,
    /// Exact spans of the message that matched, in order of appearance
    pub matches: Vec<String>,
    pub description: String,
}

/// Ledger entry for a blocked message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub message_id: Uuid,
    pub store_id: Uuid,
    pub sender_id: Uuid,
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    pub violation_type: ViolationType,
    pub violation_details: String,
    pub blocked_content: Vec<String>,
    pub severity: Severity,
    pub status: ViolationStatus,
    pub action: ViolationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields written by a moderator transition.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub decision: ReviewDecision,
    pub reviewed_by: Uuid,
    pub reviewed_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl Violation {
    /// Apply a moderator decision (state transition).
    ///
    /// Fails without touching anything when the entry is no longer pending.
    pub fn review(&mut self, outcome: &ReviewOutcome) -> Result<(), String> {
        let next = outcome.decision.target_status();
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "Invalid transition: {} -> {}",
                self.status.as_str(),
                next.as_str()
            ));
        }

        self.status = next;
        self.action = outcome.decision.recorded_action();
        self.reviewed_by = Some(outcome.reviewed_by);
        self.reviewed_at = Some(outcome.reviewed_at);
        self.review_note = outcome.note.clone();

        Ok(())
    }
}

/// Ledger query.
#[derive(Debug, Clone, Default)]
pub struct ViolationFilter {
    pub status: Option<ViolationStatus>,
    pub store_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}
