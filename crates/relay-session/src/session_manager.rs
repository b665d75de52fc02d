//! Session continuity and context budgeting.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use relay_core::current_unix_timestamp_ms;

use crate::{ConversationSession, ConversationStore, PermissionGrant};

/// Hard context limit assumed for the agent runtime.
pub const CONTEXT_HARD_LIMIT_TOKENS: u64 = 200_000;
/// Compact once the running estimate crosses 75% of the hard limit.
pub const COMPACT_THRESHOLD_TOKENS: u64 = CONTEXT_HARD_LIMIT_TOKENS / 4 * 3;
/// Compact stale sessions regardless of size after 24 hours.
pub const COMPACT_MAX_AGE_MS: u64 = 24 * 60 * 60 * 1_000;
/// Estimated share of context that survives compaction. An approximation,
/// not a measurement; the runtime does not report the real figure.
pub const CONTEXT_RETENTION_AFTER_COMPACTION: f64 = 0.3;

const COMPACTION_INSTRUCTION: &str =
    "Summarize this conversation so far, retaining key topics, open tasks, and decisions.";

/// Estimates tokens for a text at roughly four characters per token.
pub fn estimate_text_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let chars = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
    chars.saturating_add(3) / 4
}

/// Enumerates supported `SessionContinuity` values for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionContinuity {
    /// First turn, no prior session.
    New,
    /// A persisted session id exists; reuse it.
    Resume { session_id: String },
    /// Mid-epoch, no explicit id captured yet.
    Continue,
}

/// A compaction instruction to run against an existing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionRequest {
    pub conversation_id: String,
    pub session_id: String,
    pub instruction: String,
}

/// Public struct `SessionManager` used across Relay components.
pub struct SessionManager {
    store: Arc<dyn ConversationStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn get_or_create(&self, conversation_id: &str) -> Result<ConversationSession> {
        if let Some(session) = self.store.get(conversation_id)? {
            return Ok(session);
        }
        let session = ConversationSession::new(conversation_id);
        self.store.upsert(&session)?;
        Ok(session)
    }

    /// Resolves the continuity mode for the next invocation.
    ///
    /// A persisted session id always wins over a caller-provided override:
    /// resuming a branched id would fork the continuity chain.
    pub fn continuity(
        &self,
        session: &ConversationSession,
        override_session_id: Option<&str>,
    ) -> SessionContinuity {
        if let Some(persisted) = &session.agent_session_id {
            if override_session_id.is_some_and(|candidate| candidate != persisted) {
                debug!(
                    conversation_id = %session.conversation_id,
                    "ignoring caller session id in favor of the persisted one"
                );
            }
            return SessionContinuity::Resume {
                session_id: persisted.clone(),
            };
        }
        match override_session_id {
            Some(session_id) => SessionContinuity::Resume {
                session_id: session_id.to_string(),
            },
            None if session.context_tokens > 0 => SessionContinuity::Continue,
            None => SessionContinuity::New,
        }
    }

    /// Records the continuity token captured from the stream, once per
    /// epoch: an already-persisted differing id is never overwritten.
    pub fn store_session_id(&self, conversation_id: &str, session_id: &str) -> Result<()> {
        let mut session = self.get_or_create(conversation_id)?;
        match &session.agent_session_id {
            Some(existing) if existing == session_id => Ok(()),
            Some(existing) => {
                debug!(
                    conversation_id,
                    existing, incoming = session_id,
                    "session id already set for this epoch; keeping existing"
                );
                Ok(())
            }
            None => {
                session.agent_session_id = Some(session_id.to_string());
                self.store.upsert(&session)
            }
        }
    }

    /// Adds an estimated token count to the conversation's running total.
    ///
    /// Best-effort bookkeeping: failures are logged and swallowed so a
    /// turn never fails over stale accounting.
    pub fn record_token_usage(&self, conversation_id: &str, estimated_tokens: u64) {
        let result = self.get_or_create(conversation_id).and_then(|mut session| {
            session.context_tokens = session.context_tokens.saturating_add(estimated_tokens);
            self.store.upsert(&session)
        });
        if let Err(error) = result {
            warn!(conversation_id, %error, "token accounting write failed");
        }
    }

    pub fn should_compact(&self, session: &ConversationSession, now_unix_ms: u64) -> bool {
        if session.context_tokens > COMPACT_THRESHOLD_TOKENS {
            return true;
        }
        match session.last_compacted_unix_ms {
            Some(last) => now_unix_ms.saturating_sub(last) > COMPACT_MAX_AGE_MS,
            // Never compacted: age runs from creation, and only a session
            // with accumulated context is worth compacting.
            None => {
                session.context_tokens > 0
                    && session.agent_session_id.is_some()
                    && now_unix_ms.saturating_sub(session.created_unix_ms) > COMPACT_MAX_AGE_MS
            }
        }
    }

    /// Builds the summarize instruction for the controller to run against
    /// the current session. Returns `None` when there is no session to
    /// compact yet.
    pub fn prepare_compaction(&self, session: &ConversationSession) -> Option<CompactionRequest> {
        let session_id = session.agent_session_id.clone()?;
        Some(CompactionRequest {
            conversation_id: session.conversation_id.clone(),
            session_id,
            instruction: COMPACTION_INSTRUCTION.to_string(),
        })
    }

    /// Applies the post-compaction estimate and begins a new session epoch.
    pub fn complete_compaction(&self, conversation_id: &str, now_unix_ms: u64) -> Result<()> {
        let mut session = self.get_or_create(conversation_id)?;
        let retained =
            (session.context_tokens as f64 * CONTEXT_RETENTION_AFTER_COMPACTION) as u64;
        info!(
            conversation_id,
            before = session.context_tokens,
            after = retained,
            "compaction complete; starting a new session epoch"
        );
        session.context_tokens = retained;
        session.last_compacted_unix_ms = Some(now_unix_ms);
        session.agent_session_id = None;
        self.store.upsert(&session)
    }

    /// Full reset: new-chat semantics, drops continuity and grants.
    pub fn reset_conversation(&self, conversation_id: &str) -> Result<bool> {
        self.store.remove(conversation_id)
    }

    pub fn grant_tool(&self, conversation_id: &str, tool_name: &str) -> Result<()> {
        self.store.add_grant(&PermissionGrant {
            conversation_id: conversation_id.to_string(),
            tool_name: tool_name.to_string(),
            granted_unix_ms: current_unix_timestamp_ms(),
        })
    }

    pub fn has_grant(&self, conversation_id: &str, tool_name: &str) -> Result<bool> {
        Ok(self
            .store
            .list_grants(conversation_id)?
            .iter()
            .any(|grant| grant.tool_name == tool_name))
    }
}
