//! The checkpoint the agent runtime calls before every tool invocation.
//!
//! This is the central suspension point of the system: the runtime's tool
//! call waits on this future while other turns keep streaming. Resolution
//! comes from risk analysis, remembered per-conversation state, or a human
//! answering a delegated prompt.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Result;
use relay_core::current_unix_timestamp_ms;
use relay_decision::{
    is_dangerous_command, DecisionAction, DecisionEngine, Prompt, PromptContext, PromptKind,
    PromptOption, PromptStatus, UserDelegationStrategy,
};
use relay_protocol::PermissionMode;
use relay_session::SessionManager;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Tools that never need a prompt.
pub const SAFE_TOOLS: &[&str] = &["Read", "Glob", "LS", "Grep", "WebSearch"];

const EDIT_FAMILY_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// Enumerates supported `RiskLevel` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Fixed risk table with two override rules: MCP-namespaced tools are
/// forced `High`, Bash commands matching the destructive denylist are
/// forced `Critical`.
pub fn classify_tool_risk(tool_name: &str, tool_input: &Value) -> RiskLevel {
    if is_bash_tool(tool_name) {
        let command = tool_input
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if is_dangerous_command(command) {
            return RiskLevel::Critical;
        }
        return RiskLevel::High;
    }
    if tool_name.contains("mcp__") {
        return RiskLevel::High;
    }
    if SAFE_TOOLS.contains(&tool_name) {
        return RiskLevel::Low;
    }
    if EDIT_FAMILY_TOOLS.contains(&tool_name) || tool_name == "WebFetch" {
        return RiskLevel::Medium;
    }
    RiskLevel::High
}

fn is_bash_tool(tool_name: &str) -> bool {
    tool_name == "Bash" || tool_name.ends_with("__bash")
}

/// Conversation/turn identifiers the runtime supplies with each tool call.
#[derive(Debug, Clone)]
pub struct ToolCallContext {
    pub conversation_id: String,
    pub session_id: Option<String>,
    pub request_id: String,
    pub permission_mode: PermissionMode,
}

/// Enumerates supported `PermissionDecision` values.
///
/// `Pending` and `Cancelled` are distinct from `Deny` on purpose: a
/// delegation timeout leaves the prompt open for a late human answer, and
/// an aborted turn blocks the tool call without recording a denial.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    Allow { updated_input: Option<Value> },
    Deny { message: String },
    Pending { prompt_id: String, message: String },
    Cancelled { message: String },
}

#[derive(Debug, Default)]
struct ConversationPermissionState {
    allow_all: bool,
    denied_tools: HashSet<String>,
}

/// Public struct `PermissionGate` used across Relay components.
pub struct PermissionGate {
    engine: Arc<DecisionEngine>,
    delegation: Arc<UserDelegationStrategy>,
    sessions: Arc<SessionManager>,
    // Turn-scoped memory keyed by conversation id; durable grants live in
    // the conversation store.
    state: Mutex<HashMap<String, ConversationPermissionState>>,
}

impl PermissionGate {
    pub fn new(
        engine: Arc<DecisionEngine>,
        delegation: Arc<UserDelegationStrategy>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            engine,
            delegation,
            sessions,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn delegation(&self) -> &Arc<UserDelegationStrategy> {
        &self.delegation
    }

    /// Resolves whether the runtime may invoke a tool, suspending on a
    /// delegated prompt when no remembered state answers it.
    pub async fn can_use_tool(
        &self,
        tool_name: &str,
        tool_input: &Value,
        context: &ToolCallContext,
    ) -> Result<PermissionDecision> {
        let risk = classify_tool_risk(tool_name, tool_input);
        debug!(tool = tool_name, ?risk, request_id = %context.request_id, "tool call gated");

        if SAFE_TOOLS.contains(&tool_name) {
            return Ok(PermissionDecision::Allow {
                updated_input: None,
            });
        }
        if context.permission_mode == PermissionMode::AcceptEdits
            && EDIT_FAMILY_TOOLS.contains(&tool_name)
        {
            return Ok(PermissionDecision::Allow {
                updated_input: None,
            });
        }

        {
            let state = lock_or_recover(&self.state);
            if let Some(entry) = state.get(&context.conversation_id) {
                if entry.denied_tools.contains(tool_name) {
                    return Ok(PermissionDecision::Deny {
                        message: format!("tool '{tool_name}' was denied earlier this session"),
                    });
                }
                if entry.allow_all {
                    return Ok(PermissionDecision::Allow {
                        updated_input: None,
                    });
                }
            }
        }

        if self
            .sessions
            .has_grant(&context.conversation_id, tool_name)?
        {
            debug!(tool = tool_name, "allowed by persisted grant");
            return Ok(PermissionDecision::Allow {
                updated_input: None,
            });
        }

        let prompt = build_tool_usage_prompt(tool_name, tool_input, context);
        let prompt_id = prompt.id.clone();
        let resolution = self
            .engine
            .handle_prompt(
                prompt,
                &context.conversation_id,
                context.session_id.as_deref(),
                current_unix_timestamp_ms(),
            )
            .await?;

        let Some(resolution) = resolution else {
            // No strategy committed: the delegation wait was released by
            // cancellation. Blocked, not denied on the record.
            return Ok(PermissionDecision::Cancelled {
                message: format!("permission prompt for '{tool_name}' was cancelled"),
            });
        };

        if resolution.pending {
            info!(tool = tool_name, prompt_id = %prompt_id, "permission still pending after delegation window");
            return Ok(PermissionDecision::Pending {
                prompt_id,
                message: format!("permission for '{tool_name}' is awaiting a human decision"),
            });
        }

        let decision = resolution.decision;
        if decision.action == DecisionAction::NoExplain {
            self.remember_denial(&context.conversation_id, tool_name);
            return Ok(PermissionDecision::Deny {
                message: decision.reason,
            });
        }

        let selected_value = decision
            .selected_option
            .as_deref()
            .and_then(|option_id| {
                lookup_option_value(&prompt_id, option_id, self.engine.as_ref())
            })
            .unwrap_or_else(|| "deny".to_string());

        match selected_value.as_str() {
            "allow_once" | "yes" => Ok(PermissionDecision::Allow {
                updated_input: None,
            }),
            "allow_all" => {
                let mut state = lock_or_recover(&self.state);
                state
                    .entry(context.conversation_id.clone())
                    .or_default()
                    .allow_all = true;
                Ok(PermissionDecision::Allow {
                    updated_input: None,
                })
            }
            "allow_always" => {
                self.sessions
                    .grant_tool(&context.conversation_id, tool_name)?;
                info!(tool = tool_name, conversation_id = %context.conversation_id, "durable grant recorded");
                Ok(PermissionDecision::Allow {
                    updated_input: None,
                })
            }
            other => {
                if other != "deny" {
                    warn!(tool = tool_name, value = other, "unrecognized option value, treating as deny");
                }
                self.remember_denial(&context.conversation_id, tool_name);
                Ok(PermissionDecision::Deny {
                    message: format!("tool '{tool_name}' denied by the connected client"),
                })
            }
        }
    }

    /// Forwards a human's `permission.respond` frame to the waiting
    /// delegation entry, falling back to a late manual record when the
    /// wait already gave up.
    pub async fn respond(&self, prompt_id: &str, option_id: &str) -> Result<bool> {
        if self.delegation.resolve(prompt_id, option_id).await {
            return Ok(true);
        }
        self.engine.record_manual_response(prompt_id, option_id)
    }

    /// Drops turn-scoped memory for a conversation (new-chat semantics).
    pub fn forget_conversation(&self, conversation_id: &str) {
        lock_or_recover(&self.state).remove(conversation_id);
    }

    fn remember_denial(&self, conversation_id: &str, tool_name: &str) {
        let mut state = lock_or_recover(&self.state);
        state
            .entry(conversation_id.to_string())
            .or_default()
            .denied_tools
            .insert(tool_name.to_string());
    }
}

fn build_tool_usage_prompt(
    tool_name: &str,
    tool_input: &Value,
    context: &ToolCallContext,
) -> Prompt {
    let command = tool_input
        .get("command")
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = match &command {
        Some(command) => format!("The assistant wants to run: {command}"),
        None => format!("The assistant wants to use the '{tool_name}' tool."),
    };
    let options = vec![
        PromptOption {
            id: "1".to_string(),
            label: "Allow once".to_string(),
            value: "allow_once".to_string(),
            is_default: true,
            is_recommended: false,
        },
        PromptOption::new("2", "Allow all tools for this session", "allow_all"),
        PromptOption::new("3", format!("Always allow {tool_name}"), "allow_always"),
        PromptOption::new("4", "Deny", "deny"),
    ];
    Prompt {
        id: format!(
            "perm_{}_{}",
            tool_name.to_lowercase(),
            current_unix_timestamp_ms()
        ),
        conversation_id: context.conversation_id.clone(),
        session_id: context.session_id.clone(),
        kind: PromptKind::ToolUsage,
        title: format!("Tool use: {tool_name}"),
        message,
        options,
        context: PromptContext {
            tool_name: Some(tool_name.to_string()),
            tool_input: Some(tool_input.clone()),
            command,
        },
        status: PromptStatus::Pending,
        timeout_at_unix_ms: None,
        selected_option: None,
        request_id: Some(context.request_id.clone()),
    }
}

fn lookup_option_value(
    prompt_id: &str,
    option_id: &str,
    engine: &DecisionEngine,
) -> Option<String> {
    let prompt = engine.store().get(prompt_id).ok().flatten()?;
    prompt
        .option_by_id(option_id)
        .map(|option| option.value.clone())
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
