//! JSONL persistence for conversation records and tool-permission grants.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use relay_core::write_text_atomic;

use crate::ConversationSession;

pub const DEFAULT_CONVERSATIONS_FILE: &str = "conversations.jsonl";

const CONVERSATION_STORE_SCHEMA_VERSION: u32 = 1;

/// A per-conversation permanent tool grant ("always allow this tool").
///
/// Keyed by conversation id, deliberately not by session id: grants
/// survive compaction-induced session epochs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionGrant {
    pub conversation_id: String,
    pub tool_name: String,
    pub granted_unix_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConversationMetaRecord {
    schema_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
enum ConversationRecord {
    Meta(ConversationMetaRecord),
    Session(ConversationSession),
    Grant(PermissionGrant),
}

/// Trait contract for `ConversationStore` behavior.
pub trait ConversationStore: Send + Sync {
    fn get(&self, conversation_id: &str) -> Result<Option<ConversationSession>>;
    fn upsert(&self, session: &ConversationSession) -> Result<()>;
    fn remove(&self, conversation_id: &str) -> Result<bool>;
    fn add_grant(&self, grant: &PermissionGrant) -> Result<()>;
    fn list_grants(&self, conversation_id: &str) -> Result<Vec<PermissionGrant>>;
    fn session_count(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
struct StoreState {
    sessions: Vec<ConversationSession>,
    grants: Vec<PermissionGrant>,
}

/// Public struct `JsonlConversationStore` used across Relay components.
#[derive(Debug)]
pub struct JsonlConversationStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonlConversationStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = read_conversation_records(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, state: &StoreState) -> Result<()> {
        let mut lines = Vec::with_capacity(state.sessions.len() + state.grants.len() + 1);
        let meta = ConversationRecord::Meta(ConversationMetaRecord {
            schema_version: CONVERSATION_STORE_SCHEMA_VERSION,
        });
        lines.push(serde_json::to_string(&meta).context("failed to serialize store meta")?);
        for session in &state.sessions {
            lines.push(
                serde_json::to_string(&ConversationRecord::Session(session.clone()))
                    .with_context(|| {
                        format!("failed to serialize conversation {}", session.conversation_id)
                    })?,
            );
        }
        for grant in &state.grants {
            lines.push(
                serde_json::to_string(&ConversationRecord::Grant(grant.clone()))
                    .context("failed to serialize permission grant")?,
            );
        }
        let mut content = lines.join("\n");
        content.push('\n');
        write_text_atomic(&self.path, &content)
    }
}

impl ConversationStore for JsonlConversationStore {
    fn get(&self, conversation_id: &str) -> Result<Option<ConversationSession>> {
        let state = lock_or_recover(&self.state);
        Ok(state
            .sessions
            .iter()
            .find(|session| session.conversation_id == conversation_id)
            .cloned())
    }

    fn upsert(&self, session: &ConversationSession) -> Result<()> {
        if session.conversation_id.trim().is_empty() {
            bail!("conversation id must be non-empty");
        }
        let mut state = lock_or_recover(&self.state);
        match state
            .sessions
            .iter_mut()
            .find(|existing| existing.conversation_id == session.conversation_id)
        {
            Some(existing) => *existing = session.clone(),
            None => state.sessions.push(session.clone()),
        }
        self.save_locked(&state)
    }

    fn remove(&self, conversation_id: &str) -> Result<bool> {
        let mut state = lock_or_recover(&self.state);
        let before = state.sessions.len();
        state
            .sessions
            .retain(|session| session.conversation_id != conversation_id);
        state
            .grants
            .retain(|grant| grant.conversation_id != conversation_id);
        let removed = state.sessions.len() != before;
        if removed {
            self.save_locked(&state)?;
        }
        Ok(removed)
    }

    fn add_grant(&self, grant: &PermissionGrant) -> Result<()> {
        let mut state = lock_or_recover(&self.state);
        let duplicate = state.grants.iter().any(|existing| {
            existing.conversation_id == grant.conversation_id
                && existing.tool_name == grant.tool_name
        });
        if duplicate {
            return Ok(());
        }
        state.grants.push(grant.clone());
        self.save_locked(&state)
    }

    fn list_grants(&self, conversation_id: &str) -> Result<Vec<PermissionGrant>> {
        let state = lock_or_recover(&self.state);
        Ok(state
            .grants
            .iter()
            .filter(|grant| grant.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    fn session_count(&self) -> Result<usize> {
        let state = lock_or_recover(&self.state);
        Ok(state.sessions.len())
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_conversation_records(path: &Path) -> Result<StoreState> {
    if !path.exists() {
        return Ok(StoreState::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read conversation store {}", path.display()))?;
    let mut state = StoreState::default();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = serde_json::from_str::<ConversationRecord>(trimmed).with_context(|| {
            format!(
                "failed to parse conversation record at {}:{}",
                path.display(),
                index + 1
            )
        })?;
        match record {
            ConversationRecord::Meta(meta) => {
                if meta.schema_version != CONVERSATION_STORE_SCHEMA_VERSION {
                    bail!(
                        "unsupported conversation store schema_version {} (expected {})",
                        meta.schema_version,
                        CONVERSATION_STORE_SCHEMA_VERSION
                    );
                }
            }
            ConversationRecord::Session(session) => state.sessions.push(session),
            ConversationRecord::Grant(grant) => state.grants.push(grant),
        }
    }
    Ok(state)
}
