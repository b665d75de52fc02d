//! Interactive prompt model, detection, and the decision pipeline.
//!
//! A `Prompt` is a structured request for a human decision, produced either
//! by detecting interactive patterns in assistant output text or by the
//! permission gate before a tool call. Decision strategies are consulted in
//! priority order; the first one that commits resolves the prompt.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod decision_engine;
mod decision_strategies;
mod prompt_detector;
mod prompt_store;

pub use decision_engine::{DecisionEngine, Resolution, SweptPrompt, DEFAULT_PROMPT_TIMEOUT_MS};
pub use decision_strategies::{
    is_dangerous_command, is_safe_command, AllowlistStrategy, DecisionStrategy, DenylistStrategy,
    PromptNotifier, UserDelegationStrategy, DEFAULT_DELEGATION_TIMEOUT,
};
pub use prompt_detector::detect_prompt;
pub use prompt_store::{JsonlPromptStore, PromptStore, PromptStoreStats};

/// Enumerates supported `PromptKind` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    ToolUsage,
    Permission,
    MultipleChoice,
    FileSelection,
}

/// Enumerates supported `PromptStatus` values.
///
/// Exactly one terminal transition is allowed per prompt; `Pending` is the
/// only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    Pending,
    Answered,
    AutoHandled,
    Timeout,
}

impl PromptStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One selectable option attached to a prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptOption {
    pub id: String,
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_recommended: bool,
}

impl PromptOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            value: value.into(),
            is_default: false,
            is_recommended: false,
        }
    }
}

/// Tool name/input/command context the prompt was raised for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Public struct `Prompt` used across Relay components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    pub id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub kind: PromptKind,
    pub title: String,
    pub message: String,
    pub options: Vec<PromptOption>,
    #[serde(default)]
    pub context: PromptContext,
    pub status: PromptStatus,
    #[serde(default)]
    pub timeout_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub selected_option: Option<String>,
    /// The in-flight request that raised this prompt, when known; lets an
    /// aborted request release its delegation wait.
    #[serde(default)]
    pub request_id: Option<String>,
}

impl Prompt {
    /// Rejects prompts that would violate the model invariants: options
    /// must be non-empty and a selected option must reference one of them.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("prompt id must be non-empty");
        }
        if self.options.is_empty() {
            bail!("prompt '{}' must carry at least one option", self.id);
        }
        if let Some(selected) = &self.selected_option {
            if !self.options.iter().any(|option| &option.id == selected) {
                bail!(
                    "prompt '{}' selected option '{}' does not reference a known option",
                    self.id,
                    selected
                );
            }
        }
        Ok(())
    }

    pub fn option_by_id(&self, option_id: &str) -> Option<&PromptOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    pub fn option_by_value(&self, value: &str) -> Option<&PromptOption> {
        self.options.iter().find(|option| option.value == value)
    }

    /// Default-selection priority used by the timeout sweep:
    /// recommended beats default beats first.
    pub fn sweep_default_option(&self) -> Option<&PromptOption> {
        self.options
            .iter()
            .find(|option| option.is_recommended)
            .or_else(|| self.options.iter().find(|option| option.is_default))
            .or_else(|| self.options.first())
    }
}

/// Enumerates supported `DecisionAction` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    NoExplain,
    Select,
    Timeout,
}

/// Resolved outcome of a prompt, produced automatically by a strategy or
/// manually by a human.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub action: DecisionAction,
    #[serde(default)]
    pub selected_option: Option<String>,
    pub confidence: f64,
    pub handler: String,
    pub reason: String,
    pub automatic: bool,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub pending: bool,
}
