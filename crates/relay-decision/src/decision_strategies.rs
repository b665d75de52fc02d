//! Prioritized decision strategies: allowlist, denylist, user delegation.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use regex::RegexSet;
use std::sync::LazyLock;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::{Decision, DecisionAction, Prompt, PromptKind};

/// Per-call human-response window; long by design, a remote human may be
/// away from the keyboard.
pub const DEFAULT_DELEGATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Known-safe tools with fixed auto-approve confidence scores.
const SAFE_TOOL_CONFIDENCE: &[(&str, f64)] = &[
    ("Read", 0.95),
    ("Glob", 0.95),
    ("LS", 0.95),
    ("Grep", 0.90),
    ("WebSearch", 0.85),
    ("mcp__search", 0.80),
    ("mcp__ref__search", 0.80),
];

static SAFE_COMMAND_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"^(npm|pnpm|yarn)\s+(ls|list|view|info|outdated|audit)\b",
        r"^cargo\s+(tree|metadata|--version)\b",
        r"^pip3?\s+(list|show|freeze)\b",
        r"^git\s+(status|log|diff|show|branch|remote)\b",
        r"^(ls|pwd|whoami|date|env|which|cat|head|tail|wc)\b",
        r"^(grep|rg|find)\b",
    ])
    .expect("valid safe command patterns")
});

static DANGEROUS_COMMAND_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"rm\s+(-[a-zA-Z]*r[a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*r)\s+(?:/|~|\$HOME)",
        r"^\s*sudo\b",
        r"chmod\s+777\b",
        r"kill\s+-9\b",
        r"\bmkfs(\.\w+)?\b",
        r"\bdd\s+.*of=/dev/",
        r">\s*/dev/sd[a-z]",
        r"\b(shutdown|reboot|halt)\b",
    ])
    .expect("valid dangerous command patterns")
});

const DANGEROUS_PHRASES: &[&str] = &[
    "drop table",
    "drop database",
    "truncate table",
    "delete production",
    "delete from production",
];

/// Returns true when a shell command matches the destructive denylist.
pub fn is_dangerous_command(command: &str) -> bool {
    let trimmed = command.trim();
    DANGEROUS_COMMAND_PATTERNS.is_match(trimmed)
        || DANGEROUS_PHRASES
            .iter()
            .any(|phrase| trimmed.to_lowercase().contains(phrase))
}

/// Returns true when a shell command matches the read-only allowlist.
pub fn is_safe_command(command: &str) -> bool {
    SAFE_COMMAND_PATTERNS.is_match(command.trim())
}

fn prompt_command(prompt: &Prompt) -> Option<&str> {
    prompt.context.command.as_deref().or_else(|| {
        prompt
            .context
            .tool_input
            .as_ref()
            .and_then(|input| input.get("command"))
            .and_then(|value| value.as_str())
    })
}

fn is_bash_prompt(prompt: &Prompt) -> bool {
    prompt
        .context
        .tool_name
        .as_deref()
        .is_some_and(|name| name == "Bash" || name.ends_with("__bash"))
}

/// Trait contract for `DecisionStrategy` behavior.
///
/// Strategies are ranked; each either commits a decision or declines by
/// returning `None`, letting the next strategy try. The set is open:
/// new strategies slot into the ordered list without touching the engine.
#[async_trait]
pub trait DecisionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_handle(&self, prompt: &Prompt) -> bool;
    async fn decide(&self, prompt: &Prompt) -> Option<Decision>;
}

/// Auto-approves known-safe tools and read-only shell commands.
#[derive(Debug, Default)]
pub struct AllowlistStrategy;

#[async_trait]
impl DecisionStrategy for AllowlistStrategy {
    fn name(&self) -> &'static str {
        "allowlist"
    }

    fn can_handle(&self, prompt: &Prompt) -> bool {
        if prompt.kind != PromptKind::ToolUsage {
            return false;
        }
        if is_bash_prompt(prompt) {
            return prompt_command(prompt).is_some();
        }
        prompt
            .context
            .tool_name
            .as_deref()
            .is_some_and(|name| safe_tool_confidence(name).is_some())
    }

    async fn decide(&self, prompt: &Prompt) -> Option<Decision> {
        let (confidence, reason) = if is_bash_prompt(prompt) {
            let command = prompt_command(prompt)?;
            // Deny overrides allow: the destructive denylist is consulted
            // before any Bash command can be auto-approved.
            if is_dangerous_command(command) {
                return None;
            }
            if !is_safe_command(command) {
                return None;
            }
            (0.85, format!("command matches read-only allowlist: {command}"))
        } else {
            let tool_name = prompt.context.tool_name.as_deref()?;
            let confidence = safe_tool_confidence(tool_name)?;
            (confidence, format!("tool '{tool_name}' is in the safe-tool table"))
        };

        let selected = prompt
            .option_by_value("yes")
            .or_else(|| prompt.options.first())?;
        debug!(prompt_id = %prompt.id, %reason, "allowlist auto-approved");
        Some(Decision {
            action: DecisionAction::Approve,
            selected_option: Some(selected.id.clone()),
            confidence,
            handler: self.name().to_string(),
            reason,
            automatic: true,
            response: Some(selected.label.clone()),
            pending: false,
        })
    }
}

fn safe_tool_confidence(tool_name: &str) -> Option<f64> {
    SAFE_TOOL_CONFIDENCE
        .iter()
        .find(|(name, _)| *name == tool_name)
        .map(|(_, confidence)| *confidence)
}

/// Auto-denies destructive shell patterns and dangerous phrasing.
#[derive(Debug, Default)]
pub struct DenylistStrategy;

#[async_trait]
impl DecisionStrategy for DenylistStrategy {
    fn name(&self) -> &'static str {
        "denylist"
    }

    fn can_handle(&self, prompt: &Prompt) -> bool {
        if let Some(command) = prompt_command(prompt) {
            if is_dangerous_command(command) {
                return true;
            }
        }
        let message = prompt.message.to_lowercase();
        DANGEROUS_PHRASES.iter().any(|phrase| message.contains(phrase))
    }

    async fn decide(&self, prompt: &Prompt) -> Option<Decision> {
        let reason = match prompt_command(prompt) {
            Some(command) if is_dangerous_command(command) => {
                format!("command matches destructive denylist: {command}")
            }
            _ => "prompt text matches dangerous phrasing".to_string(),
        };
        let selected = prompt
            .option_by_value("no_explain")
            .or_else(|| prompt.option_by_value("no"))
            .or_else(|| prompt.options.last())?;
        warn!(prompt_id = %prompt.id, %reason, "denylist blocked tool use");
        Some(Decision {
            action: DecisionAction::NoExplain,
            selected_option: Some(selected.id.clone()),
            confidence: 0.95,
            handler: self.name().to_string(),
            reason,
            automatic: true,
            response: Some(selected.label.clone()),
            pending: false,
        })
    }
}

/// Trait contract for `PromptNotifier` behavior: pushes a prompt to the
/// connected human client over the transport.
#[async_trait]
pub trait PromptNotifier: Send + Sync {
    async fn notify(&self, prompt: &Prompt) -> Result<()>;
}

/// Fallback strategy: delegates the decision to a remote human.
///
/// Registers a one-shot rendezvous keyed by prompt id, pushes the prompt
/// over the transport, and suspends until a response arrives or the window
/// elapses. Timeout is not denial: the prompt stays open for late manual
/// resolution.
pub struct UserDelegationStrategy {
    notifier: Arc<dyn PromptNotifier>,
    timeout: Duration,
    pending: Mutex<HashMap<String, PendingResponse>>,
}

struct PendingResponse {
    request_id: Option<String>,
    resolver: oneshot::Sender<String>,
}

impl UserDelegationStrategy {
    pub fn new(notifier: Arc<dyn PromptNotifier>) -> Self {
        Self::with_timeout(notifier, DEFAULT_DELEGATION_TIMEOUT)
    }

    pub fn with_timeout(notifier: Arc<dyn PromptNotifier>, timeout: Duration) -> Self {
        Self {
            notifier,
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a waiting prompt with the human's selected option.
    ///
    /// Returns false when no wait is registered for the prompt (already
    /// resolved, timed out, or never delegated). Removal is exactly-once:
    /// the entry leaves the registry before the resolver fires.
    pub async fn resolve(&self, prompt_id: &str, option_id: &str) -> bool {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending.remove(prompt_id)
        };
        match entry {
            Some(entry) => entry.resolver.send(option_id.to_string()).is_ok(),
            None => false,
        }
    }

    /// Releases every wait bound to `request_id`; their receivers settle
    /// with a closed-channel error instead of hanging.
    pub async fn release_for_request(&self, request_id: &str) -> usize {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|_, entry| entry.request_id.as_deref() != Some(request_id));
        before - pending.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait]
impl DecisionStrategy for UserDelegationStrategy {
    fn name(&self) -> &'static str {
        "user_delegation"
    }

    fn can_handle(&self, _prompt: &Prompt) -> bool {
        true
    }

    async fn decide(&self, prompt: &Prompt) -> Option<Decision> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                prompt.id.clone(),
                PendingResponse {
                    request_id: prompt.request_id.clone(),
                    resolver: sender,
                },
            );
        }

        if let Err(error) = self.notifier.notify(prompt).await {
            warn!(prompt_id = %prompt.id, %error, "failed to deliver prompt to client");
            self.pending.lock().await.remove(&prompt.id);
            return None;
        }

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(option_id)) => {
                let selected = prompt.option_by_id(&option_id)?;
                info!(prompt_id = %prompt.id, option = %selected.value, "human resolved prompt");
                Some(Decision {
                    action: DecisionAction::Select,
                    selected_option: Some(selected.id.clone()),
                    confidence: 1.0,
                    handler: self.name().to_string(),
                    reason: "resolved by connected client".to_string(),
                    automatic: false,
                    response: Some(selected.label.clone()),
                    pending: false,
                })
            }
            // Channel dropped: the owning request was cancelled. Decline so
            // the caller sees the tool call as blocked rather than denied.
            Ok(Err(_)) => {
                debug!(prompt_id = %prompt.id, "delegation wait released by cancellation");
                None
            }
            Err(_) => {
                // Deliberate asymmetry: timing out keeps the prompt open
                // instead of resolving to a denial.
                self.pending.lock().await.remove(&prompt.id);
                info!(prompt_id = %prompt.id, "delegation window elapsed, prompt stays pending");
                Some(Decision {
                    action: DecisionAction::Timeout,
                    selected_option: None,
                    confidence: 0.0,
                    handler: self.name().to_string(),
                    reason: "no response within the delegation window".to_string(),
                    automatic: false,
                    response: None,
                    pending: true,
                })
            }
        }
    }
}
