//! JSONL-backed prompt persistence: an append-only audit trail of every
//! interactive prompt and its single terminal transition.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use relay_core::write_text_atomic;

use crate::{Prompt, PromptStatus};

const PROMPT_STORE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PromptMetaRecord {
    schema_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
enum PromptRecord {
    Meta(PromptMetaRecord),
    Prompt(Prompt),
}

/// Aggregate counters over the audit trail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptStoreStats {
    pub total: usize,
    pub pending: usize,
    pub answered: usize,
    pub auto_handled: usize,
    pub timed_out: usize,
}

/// Trait contract for `PromptStore` behavior.
///
/// Prompts are never deleted; resolution happens through exactly one
/// terminal status transition.
pub trait PromptStore: Send + Sync {
    fn create(&self, prompt: &Prompt) -> Result<()>;
    fn get(&self, prompt_id: &str) -> Result<Option<Prompt>>;
    fn update_status(
        &self,
        prompt_id: &str,
        status: PromptStatus,
        selected_option: Option<String>,
    ) -> Result<()>;
    fn list_pending(&self, conversation_id: Option<&str>) -> Result<Vec<Prompt>>;
    fn list_pending_expired(&self, now_unix_ms: u64) -> Result<Vec<Prompt>>;
    fn stats(&self) -> Result<PromptStoreStats>;
}

/// Public struct `JsonlPromptStore` used across Relay components.
#[derive(Debug)]
pub struct JsonlPromptStore {
    path: PathBuf,
    prompts: Mutex<Vec<Prompt>>,
}

impl JsonlPromptStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let prompts = read_prompt_records(&path)?;
        Ok(Self {
            path,
            prompts: Mutex::new(prompts),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, prompts: &[Prompt]) -> Result<()> {
        let mut lines = Vec::with_capacity(prompts.len() + 1);
        let meta = PromptRecord::Meta(PromptMetaRecord {
            schema_version: PROMPT_STORE_SCHEMA_VERSION,
        });
        lines.push(serde_json::to_string(&meta).context("failed to serialize prompt meta")?);
        for prompt in prompts {
            let record = PromptRecord::Prompt(prompt.clone());
            lines.push(
                serde_json::to_string(&record)
                    .with_context(|| format!("failed to serialize prompt {}", prompt.id))?,
            );
        }
        let mut content = lines.join("\n");
        content.push('\n');
        write_text_atomic(&self.path, &content)
    }
}

impl PromptStore for JsonlPromptStore {
    fn create(&self, prompt: &Prompt) -> Result<()> {
        prompt.validate()?;
        let mut prompts = lock_or_recover(&self.prompts);
        if prompts.iter().any(|existing| existing.id == prompt.id) {
            bail!("prompt '{}' already exists", prompt.id);
        }
        prompts.push(prompt.clone());
        self.save_locked(&prompts)
    }

    fn get(&self, prompt_id: &str) -> Result<Option<Prompt>> {
        let prompts = lock_or_recover(&self.prompts);
        Ok(prompts.iter().find(|prompt| prompt.id == prompt_id).cloned())
    }

    fn update_status(
        &self,
        prompt_id: &str,
        status: PromptStatus,
        selected_option: Option<String>,
    ) -> Result<()> {
        let mut prompts = lock_or_recover(&self.prompts);
        let prompt = prompts
            .iter_mut()
            .find(|prompt| prompt.id == prompt_id)
            .with_context(|| format!("prompt '{prompt_id}' not found"))?;
        if prompt.status.is_terminal() {
            bail!(
                "prompt '{}' already resolved as {:?}; terminal transitions happen exactly once",
                prompt_id,
                prompt.status
            );
        }
        if !status.is_terminal() {
            bail!("prompt '{prompt_id}' cannot transition back to pending");
        }
        if let Some(option_id) = &selected_option {
            if prompt.option_by_id(option_id).is_none() {
                bail!(
                    "prompt '{}' has no option '{}' to select",
                    prompt_id,
                    option_id
                );
            }
        }
        prompt.status = status;
        prompt.selected_option = selected_option;
        self.save_locked(&prompts)
    }

    fn list_pending(&self, conversation_id: Option<&str>) -> Result<Vec<Prompt>> {
        let prompts = lock_or_recover(&self.prompts);
        Ok(prompts
            .iter()
            .filter(|prompt| prompt.status == PromptStatus::Pending)
            .filter(|prompt| {
                conversation_id.is_none_or(|wanted| prompt.conversation_id == wanted)
            })
            .cloned()
            .collect())
    }

    fn list_pending_expired(&self, now_unix_ms: u64) -> Result<Vec<Prompt>> {
        let prompts = lock_or_recover(&self.prompts);
        Ok(prompts
            .iter()
            .filter(|prompt| prompt.status == PromptStatus::Pending)
            .filter(|prompt| {
                relay_core::is_expired_unix_ms(prompt.timeout_at_unix_ms, now_unix_ms)
            })
            .cloned()
            .collect())
    }

    fn stats(&self) -> Result<PromptStoreStats> {
        let prompts = lock_or_recover(&self.prompts);
        let mut stats = PromptStoreStats {
            total: prompts.len(),
            ..PromptStoreStats::default()
        };
        for prompt in prompts.iter() {
            match prompt.status {
                PromptStatus::Pending => stats.pending += 1,
                PromptStatus::Answered => stats.answered += 1,
                PromptStatus::AutoHandled => stats.auto_handled += 1,
                PromptStatus::Timeout => stats.timed_out += 1,
            }
        }
        Ok(stats)
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_prompt_records(path: &Path) -> Result<Vec<Prompt>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read prompt store {}", path.display()))?;
    let mut prompts = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = serde_json::from_str::<PromptRecord>(trimmed).with_context(|| {
            format!(
                "failed to parse prompt record at {}:{}",
                path.display(),
                index + 1
            )
        })?;
        match record {
            PromptRecord::Meta(meta) => {
                if meta.schema_version != PROMPT_STORE_SCHEMA_VERSION {
                    bail!(
                        "unsupported prompt store schema_version {} (expected {})",
                        meta.schema_version,
                        PROMPT_STORE_SCHEMA_VERSION
                    );
                }
            }
            PromptRecord::Prompt(prompt) => prompts.push(prompt),
        }
    }
    Ok(prompts)
}
