use serde::{Deserialize, Serialize};

/// Aggregate chat figures for a store's dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatStats {
    pub total: i64,
    pub active: i64,
    /// Client messages the store has not read yet
    pub unread: i64,
    pub violations_today: i64,
    /// Mean seconds between a client message and the next store reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_response_time: Option<f64>,
}
