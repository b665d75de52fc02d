//! Per-conversation continuity state: session tokens, context budgeting,
//! compaction policy, and tool-permission grants.

use serde::{Deserialize, Serialize};

use relay_core::current_unix_timestamp_ms;
use relay_protocol::PermissionMode;

mod conversation_store;
mod session_manager;
#[cfg(test)]
mod tests;

pub use conversation_store::{
    ConversationStore, JsonlConversationStore, PermissionGrant, DEFAULT_CONVERSATIONS_FILE,
};
pub use session_manager::{
    estimate_text_tokens, CompactionRequest, SessionContinuity, SessionManager,
    COMPACT_MAX_AGE_MS, COMPACT_THRESHOLD_TOKENS, CONTEXT_HARD_LIMIT_TOKENS,
    CONTEXT_RETENTION_AFTER_COMPACTION,
};

/// Public struct `ConversationSession` used across Relay components.
///
/// The agent session id is an opaque continuity token set at most once per
/// session epoch; compaction or an explicit new chat begins a new epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSession {
    pub conversation_id: String,
    // Records missing the field predate it; treating them as created now
    // avoids a spurious age-based compaction on first load.
    #[serde(default = "current_unix_timestamp_ms")]
    pub created_unix_ms: u64,
    #[serde(default)]
    pub agent_session_id: Option<String>,
    #[serde(default)]
    pub context_tokens: u64,
    #[serde(default)]
    pub last_compacted_unix_ms: Option<u64>,
    #[serde(default)]
    pub permission_mode: PermissionMode,
}

impl ConversationSession {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            created_unix_ms: current_unix_timestamp_ms(),
            agent_session_id: None,
            context_tokens: 0,
            last_compacted_unix_ms: None,
            permission_mode: PermissionMode::Default,
        }
    }
}
