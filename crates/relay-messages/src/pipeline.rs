//! Normalization, deduplication, and merge rules for the display timeline.

use std::collections::HashMap;

use relay_core::{current_unix_timestamp_ms, synthesize_message_id};
use serde_json::Value;
use tracing::debug;

use crate::agent_events::{AgentContentBlock, AgentEvent};
use crate::processed::{MessageMetadata, ProcessedMessage, ProcessedMessageKind, TokenUsage};
use crate::raw::{RawLegacyRow, RawMessage};

/// Normalizes one raw input into the canonical message shape.
///
/// Returns `None` for inputs that carry no displayable content (`done`
/// signals exist only to clear streaming state downstream).
pub fn process_message(raw: &RawMessage) -> Option<ProcessedMessage> {
    match raw {
        RawMessage::AgentEvent {
            event,
            request_id,
            conversation_id,
            timestamp_unix_ms,
        } => {
            let timestamp = timestamp_unix_ms.unwrap_or_else(current_unix_timestamp_ms);
            let mut message = process_agent_event(event, timestamp)?;
            message.metadata.request_id = request_id.clone();
            message.metadata.conversation_id = conversation_id.clone();
            Some(message)
        }
        RawMessage::Error {
            message,
            request_id,
            timestamp_unix_ms,
        } => {
            let timestamp = timestamp_unix_ms.unwrap_or_else(current_unix_timestamp_ms);
            Some(ProcessedMessage {
                id: synthesize_message_id("error", timestamp),
                kind: ProcessedMessageKind::Error,
                content: message.clone(),
                timestamp_unix_ms: timestamp,
                metadata: MessageMetadata {
                    request_id: request_id.clone(),
                    is_complete: true,
                    ..MessageMetadata::default()
                },
            })
        }
        RawMessage::Done { request_id } => {
            debug!(request_id = request_id.as_deref(), "done signal consumed");
            None
        }
        RawMessage::Aborted {
            request_id,
            timestamp_unix_ms,
        } => {
            let timestamp = timestamp_unix_ms.unwrap_or_else(current_unix_timestamp_ms);
            Some(ProcessedMessage {
                id: synthesize_message_id("abort", timestamp),
                kind: ProcessedMessageKind::Abort,
                content: "Request aborted".to_string(),
                timestamp_unix_ms: timestamp,
                metadata: MessageMetadata {
                    request_id: request_id.clone(),
                    is_complete: true,
                    ..MessageMetadata::default()
                },
            })
        }
        RawMessage::Legacy(row) => Some(process_legacy_row(row)),
    }
}

/// Normalizes a batch, dropping non-displayable inputs.
pub fn process_messages(raws: &[RawMessage]) -> Vec<ProcessedMessage> {
    raws.iter().filter_map(process_message).collect()
}

fn process_agent_event(event: &AgentEvent, timestamp: u64) -> Option<ProcessedMessage> {
    match event {
        AgentEvent::System {
            subtype,
            session_id,
        } => Some(ProcessedMessage {
            id: synthesize_message_id("system", timestamp),
            kind: ProcessedMessageKind::System,
            content: match subtype.as_deref() {
                Some("init") | None => "Session started".to_string(),
                Some(other) => other.replace('_', " "),
            },
            timestamp_unix_ms: timestamp,
            metadata: MessageMetadata {
                session_id: session_id.clone(),
                is_transient: true,
                ..MessageMetadata::default()
            },
        }),
        AgentEvent::Assistant {
            message,
            session_id,
        } => {
            // Tool invocation takes display precedence over narrative text
            // carried in the same event.
            if let Some((tool_use_id, tool_name, tool_input)) = message.first_tool_use() {
                Some(ProcessedMessage {
                    id: message
                        .id
                        .clone()
                        .unwrap_or_else(|| tool_use_id.to_string()),
                    kind: ProcessedMessageKind::Tool,
                    content: message.flattened_text(),
                    timestamp_unix_ms: timestamp,
                    metadata: MessageMetadata {
                        session_id: session_id.clone(),
                        tool_name: Some(tool_name.to_string()),
                        tool_input: Some(tool_input.clone()),
                        ..MessageMetadata::default()
                    },
                })
            } else {
                Some(ProcessedMessage {
                    id: message
                        .id
                        .clone()
                        .unwrap_or_else(|| synthesize_message_id("assistant", timestamp)),
                    kind: ProcessedMessageKind::Assistant,
                    content: message.flattened_text(),
                    timestamp_unix_ms: timestamp,
                    metadata: MessageMetadata {
                        session_id: session_id.clone(),
                        ..MessageMetadata::default()
                    },
                })
            }
        }
        AgentEvent::User {
            message,
            session_id,
        } => Some(ProcessedMessage {
            id: message
                .id
                .clone()
                .unwrap_or_else(|| synthesize_message_id("user", timestamp)),
            kind: ProcessedMessageKind::User,
            content: flatten_user_content(&message.content),
            timestamp_unix_ms: timestamp,
            metadata: MessageMetadata {
                session_id: session_id.clone(),
                ..MessageMetadata::default()
            },
        }),
        AgentEvent::Result {
            subtype: _,
            session_id,
            result,
            is_error,
            usage,
            total_cost_usd,
            duration_ms,
        } => Some(ProcessedMessage {
            id: synthesize_message_id("result", timestamp),
            kind: if *is_error {
                ProcessedMessageKind::Error
            } else {
                ProcessedMessageKind::Result
            },
            content: result.clone().unwrap_or_default(),
            timestamp_unix_ms: timestamp,
            metadata: MessageMetadata {
                session_id: session_id.clone(),
                is_complete: true,
                usage: usage.map(|value| TokenUsage {
                    input: value.input_tokens,
                    output: value.output_tokens,
                    total: value.total_tokens(),
                }),
                cost_usd: *total_cost_usd,
                duration_ms: *duration_ms,
                ..MessageMetadata::default()
            },
        }),
    }
}

fn flatten_user_content(blocks: &[AgentContentBlock]) -> String {
    let mut text = String::new();
    for block in blocks {
        let chunk = match block {
            AgentContentBlock::Text { text } => text.clone(),
            AgentContentBlock::ToolResult { content, .. } => match content {
                Value::String(value) => value.clone(),
                other => serde_json::to_string(other).unwrap_or_default(),
            },
            AgentContentBlock::ToolUse { .. } => continue,
        };
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&chunk);
    }
    text
}

fn process_legacy_row(row: &RawLegacyRow) -> ProcessedMessage {
    let timestamp = row
        .timestamp_unix_ms
        .unwrap_or_else(current_unix_timestamp_ms);
    let kind = if row.error.is_some() {
        ProcessedMessageKind::Error
    } else if row.name.is_some() && row.input.is_some() {
        ProcessedMessageKind::Tool
    } else {
        match row.role.as_deref() {
            Some("user") => ProcessedMessageKind::User,
            Some("assistant") => ProcessedMessageKind::Assistant,
            _ => ProcessedMessageKind::System,
        }
    };
    let content = row
        .error
        .clone()
        .or_else(|| row.message.clone())
        .unwrap_or_default();

    ProcessedMessage {
        id: row
            .id
            .clone()
            .unwrap_or_else(|| synthesize_message_id(kind.as_str(), timestamp)),
        kind,
        content,
        timestamp_unix_ms: timestamp,
        metadata: MessageMetadata {
            tool_name: row.name.clone(),
            tool_input: row.input.clone(),
            is_complete: true,
            ..MessageMetadata::default()
        },
    }
}

/// Returns true when `candidate` should replace `incumbent` under the
/// dedup invariant: non-optimistic beats optimistic regardless; then the
/// higher timestamp wins; ties go to the longer content.
fn candidate_replaces(candidate: &ProcessedMessage, incumbent: &ProcessedMessage) -> bool {
    if candidate.metadata.optimistic != incumbent.metadata.optimistic {
        return !candidate.metadata.optimistic;
    }
    if candidate.timestamp_unix_ms != incumbent.timestamp_unix_ms {
        return candidate.timestamp_unix_ms > incumbent.timestamp_unix_ms;
    }
    candidate.content.len() > incumbent.content.len()
}

/// Deduplicates by `(id, kind)`, keeping first-seen positions.
///
/// Idempotent: running it on its own output changes nothing.
pub fn deduplicate_messages(messages: Vec<ProcessedMessage>) -> Vec<ProcessedMessage> {
    let mut result: Vec<ProcessedMessage> = Vec::with_capacity(messages.len());
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for message in messages {
        let key = message.dedup_key();
        match index_by_key.get(&key) {
            Some(&index) => {
                if candidate_replaces(&message, &result[index]) {
                    result[index] = message;
                }
            }
            None => {
                index_by_key.insert(key, result.len());
                result.push(message);
            }
        }
    }
    result
}

/// Merges one streaming/optimistic update into the ordered timeline.
///
/// An existing entry with the same id is replaced only when the incoming
/// message is newer-or-equal by timestamp and carries at least as much
/// content, or replaces an optimistic placeholder; anything else is
/// discarded silently. Unknown ids are inserted in timestamp order to
/// tolerate out-of-order delivery.
pub fn merge_streaming_message(messages: &mut Vec<ProcessedMessage>, incoming: ProcessedMessage) {
    if let Some(index) = messages.iter().position(|entry| entry.id == incoming.id) {
        let existing = &messages[index];
        let demotes_to_optimistic = incoming.metadata.optimistic && !existing.metadata.optimistic;
        let upgrades_to_real = existing.metadata.optimistic && !incoming.metadata.optimistic;
        // Displayed content never shrinks for an id: a newer update must
        // also carry at least as much text to replace.
        let replace = !demotes_to_optimistic
            && (upgrades_to_real
                || (incoming.timestamp_unix_ms >= existing.timestamp_unix_ms
                    && incoming.content.len() >= existing.content.len()));
        if replace {
            messages[index] = incoming;
        } else {
            debug!(id = %incoming.id, "discarded stale streaming update");
        }
        return;
    }

    let position = messages
        .iter()
        .position(|entry| entry.timestamp_unix_ms > incoming.timestamp_unix_ms)
        .unwrap_or(messages.len());
    messages.insert(position, incoming);
}
