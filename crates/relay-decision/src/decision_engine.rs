//! Orchestrates strategies against stored prompts and sweeps expired ones.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::{
    Decision, DecisionAction, DecisionStrategy, Prompt, PromptStatus, PromptStore,
};

/// Engine-level sweep window stamped onto every stored prompt.
pub const DEFAULT_PROMPT_TIMEOUT_MS: u64 = 600_000;

/// Outcome of `handle_prompt`: either a terminal decision or a decision
/// explicitly left pending (delegation timeout).
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub decision: Decision,
    pub pending: bool,
}

/// One prompt auto-resolved by the timeout sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweptPrompt {
    pub prompt_id: String,
    pub selected_option: String,
}

/// Public struct `DecisionEngine` used across Relay components.
pub struct DecisionEngine {
    store: Arc<dyn PromptStore>,
    strategies: Vec<Arc<dyn DecisionStrategy>>,
    prompt_timeout_ms: u64,
}

impl DecisionEngine {
    pub fn new(store: Arc<dyn PromptStore>, strategies: Vec<Arc<dyn DecisionStrategy>>) -> Self {
        Self {
            store,
            strategies,
            prompt_timeout_ms: DEFAULT_PROMPT_TIMEOUT_MS,
        }
    }

    pub fn with_prompt_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.prompt_timeout_ms = timeout_ms;
        self
    }

    pub fn store(&self) -> &Arc<dyn PromptStore> {
        &self.store
    }

    /// Persists the prompt, then walks the strategy chain until one commits.
    ///
    /// A store-write failure here is a hard failure: no decision is
    /// attempted without a durable prompt record. Returns `None` when no
    /// strategy commits; the caller must treat the tool call as blocked.
    pub async fn handle_prompt(
        &self,
        mut prompt: Prompt,
        conversation_id: &str,
        session_id: Option<&str>,
        now_unix_ms: u64,
    ) -> Result<Option<Resolution>> {
        prompt.conversation_id = conversation_id.to_string();
        prompt.session_id = session_id.map(str::to_string);
        prompt.status = PromptStatus::Pending;
        prompt.timeout_at_unix_ms = Some(now_unix_ms.saturating_add(self.prompt_timeout_ms));
        self.store
            .create(&prompt)
            .with_context(|| format!("failed to persist prompt {}", prompt.id))?;

        for strategy in &self.strategies {
            if !strategy.can_handle(&prompt) {
                continue;
            }
            let Some(decision) = strategy.decide(&prompt).await else {
                debug!(
                    prompt_id = %prompt.id,
                    strategy = strategy.name(),
                    "strategy declined"
                );
                continue;
            };

            if decision.action == DecisionAction::Timeout {
                // Prompt record stays pending so a human can answer late;
                // the sweep is the only failsafe that closes it.
                return Ok(Some(Resolution {
                    decision,
                    pending: true,
                }));
            }

            let status = if decision.automatic {
                PromptStatus::AutoHandled
            } else {
                PromptStatus::Answered
            };
            self.store
                .update_status(&prompt.id, status, decision.selected_option.clone())?;
            info!(
                prompt_id = %prompt.id,
                strategy = strategy.name(),
                action = ?decision.action,
                automatic = decision.automatic,
                "prompt resolved"
            );
            return Ok(Some(Resolution {
                decision,
                pending: false,
            }));
        }

        Ok(None)
    }

    /// Applies a human response that arrived after the delegation wait had
    /// already given up (the prompt was left pending on purpose).
    ///
    /// Returns false when the prompt is unknown or already terminal.
    pub fn record_manual_response(&self, prompt_id: &str, option_id: &str) -> Result<bool> {
        let Some(prompt) = self.store.get(prompt_id)? else {
            return Ok(false);
        };
        if prompt.status.is_terminal() {
            return Ok(false);
        }
        self.store.update_status(
            prompt_id,
            PromptStatus::Answered,
            Some(option_id.to_string()),
        )?;
        info!(prompt_id, option = option_id, "late manual response recorded");
        Ok(true)
    }

    /// Best-effort failsafe for prompts nobody ever resolves (for example
    /// a disconnected client): picks a default option by priority
    /// recommended > default > first and marks the prompt timed out.
    pub fn sweep_timeouts(&self, now_unix_ms: u64) -> Result<Vec<SweptPrompt>> {
        let expired = self.store.list_pending_expired(now_unix_ms)?;
        let mut swept = Vec::with_capacity(expired.len());
        for prompt in expired {
            let Some(option) = prompt.sweep_default_option() else {
                continue;
            };
            self.store.update_status(
                &prompt.id,
                PromptStatus::Timeout,
                Some(option.id.clone()),
            )?;
            info!(
                prompt_id = %prompt.id,
                option = %option.id,
                "sweep auto-selected default for expired prompt"
            );
            swept.push(SweptPrompt {
                prompt_id: prompt.id.clone(),
                selected_option: option.id.clone(),
            });
        }
        Ok(swept)
    }
}
