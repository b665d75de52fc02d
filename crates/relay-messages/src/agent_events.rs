//! Typed view of the agent runtime's streamed events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token usage reported by the agent runtime on terminal result events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl AgentUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// One content block inside an agent message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
}

/// An assistant- or user-role message wrapped inside an agent event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Vec<AgentContentBlock>,
}

impl AgentMessage {
    /// Flattens all text blocks into one string, in block order.
    pub fn flattened_text(&self) -> String {
        let mut text = String::new();
        for block in &self.content {
            if let AgentContentBlock::Text { text: chunk } = block {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(chunk);
            }
        }
        text
    }

    /// Returns the first tool-use block, if any.
    pub fn first_tool_use(&self) -> Option<(&str, &str, &Value)> {
        self.content.iter().find_map(|block| match block {
            AgentContentBlock::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }
}

/// Enumerates supported `AgentEvent` values streamed by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        message: AgentMessage,
        #[serde(default)]
        session_id: Option<String>,
    },
    User {
        message: AgentMessage,
        #[serde(default)]
        session_id: Option<String>,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        usage: Option<AgentUsage>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
}

impl AgentEvent {
    /// Returns the continuity token carried by this event, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System { session_id, .. }
            | Self::Assistant { session_id, .. }
            | Self::User { session_id, .. }
            | Self::Result { session_id, .. } => session_id.as_deref(),
        }
    }
}
