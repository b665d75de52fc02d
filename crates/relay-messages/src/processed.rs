//! Canonical normalized chat unit produced by the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Enumerates supported `ProcessedMessageKind` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessedMessageKind {
    User,
    Assistant,
    System,
    Tool,
    Result,
    Error,
    Abort,
}

impl ProcessedMessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
            Self::Result => "result",
            Self::Error => "error",
            Self::Abort => "abort",
        }
    }
}

/// Token usage carried in message metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

/// Typed metadata attached to a `ProcessedMessage`.
///
/// Unknown upstream fields survive round-trips through `extra` instead of
/// being silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub optimistic: bool,
    #[serde(default)]
    pub is_transient: bool,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

/// Public struct `ProcessedMessage` used across Relay components.
///
/// A value type: mutated only by replacement during merge, never in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMessage {
    pub id: String,
    pub kind: ProcessedMessageKind,
    pub content: String,
    pub timestamp_unix_ms: u64,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl ProcessedMessage {
    /// Identity key used by deduplication: the same id with a different
    /// kind (assistant vs tool) is not a duplicate.
    pub fn dedup_key(&self) -> String {
        format!("{}_{}", self.id, self.kind.as_str())
    }
}
