use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Task,
    Info,
    Question,
    Response,
    Alert,
}

/// Total order: urgent < high < normal < low (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    pub timestamp: String,
    #[serde(default)]
    pub metadata: Value,
    /// Monotonically increasing per-daemon sequence, used as the tiebreaker
    /// for "insertion order" within a priority class.
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPresence {
    pub name: String,
    pub registered_at_ms: u64,
    pub last_seen_at_ms: u64,
    pub connected: bool,
}
