//! Client-side chat state: the authoritative ordered timeline plus
//! streaming/optimistic overlays and outbound command builders.

use relay_core::{current_unix_timestamp_ms, synthesize_message_id};
use relay_protocol::{BridgeEventFrame, PermissionMode, BRIDGE_REQUEST_SCHEMA_VERSION};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::pipeline::{deduplicate_messages, merge_streaming_message, process_message};
use crate::processed::{MessageMetadata, ProcessedMessage, ProcessedMessageKind};
use crate::raw::decode_raw_message;

/// Counters surfaced for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatStoreStats {
    pub messages: usize,
    pub pending_prompts: usize,
    pub dropped_stale_frames: u64,
}

/// Public struct `ChatStore` used across Relay components.
///
/// Receiving end of the bridge protocol for one conversation: merges
/// incoming frames into the display timeline and issues outbound
/// send/abort/permission-response commands.
#[derive(Debug)]
pub struct ChatStore {
    conversation_id: String,
    messages: Vec<ProcessedMessage>,
    active_request_id: Option<String>,
    session_id: Option<String>,
    streaming: bool,
    pending_prompt_ids: Vec<String>,
    dropped_stale_frames: u64,
}

impl ChatStore {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            active_request_id: None,
            session_id: None,
            streaming: false,
            pending_prompt_ids: Vec::new(),
            dropped_stale_frames: 0,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn messages(&self) -> &[ProcessedMessage] {
        &self.messages
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn pending_prompt_ids(&self) -> &[String] {
        &self.pending_prompt_ids
    }

    pub fn stats(&self) -> ChatStoreStats {
        ChatStoreStats {
            messages: self.messages.len(),
            pending_prompts: self.pending_prompt_ids.len(),
            dropped_stale_frames: self.dropped_stale_frames,
        }
    }

    /// Starts a turn: records the active request id, inserts an optimistic
    /// user message, and returns the `message.send` frame to emit.
    pub fn begin_send(
        &mut self,
        request_id: &str,
        content: &str,
        permission_mode: PermissionMode,
    ) -> Value {
        let timestamp = current_unix_timestamp_ms();
        let optimistic = ProcessedMessage {
            id: synthesize_message_id("user", timestamp),
            kind: ProcessedMessageKind::User,
            content: content.to_string(),
            timestamp_unix_ms: timestamp,
            metadata: MessageMetadata {
                conversation_id: Some(self.conversation_id.clone()),
                request_id: Some(request_id.to_string()),
                optimistic: true,
                ..MessageMetadata::default()
            },
        };
        merge_streaming_message(&mut self.messages, optimistic);
        self.active_request_id = Some(request_id.to_string());
        self.streaming = true;

        json!({
            "schema_version": BRIDGE_REQUEST_SCHEMA_VERSION,
            "request_id": request_id,
            "kind": "message.send",
            "payload": {
                "conversation_id": self.conversation_id,
                "content": content,
                "session_id": self.session_id,
                "permission_mode": permission_mode.as_str(),
            },
        })
    }

    /// Builds a `message.abort` frame for the active turn, if any.
    pub fn build_abort_frame(&self, request_id: &str) -> Option<Value> {
        let target = self.active_request_id.as_deref()?;
        Some(json!({
            "schema_version": BRIDGE_REQUEST_SCHEMA_VERSION,
            "request_id": request_id,
            "kind": "message.abort",
            "payload": { "target_request_id": target },
        }))
    }

    /// Builds a `permission.respond` frame and clears the local pending
    /// marker for that prompt.
    pub fn respond_to_prompt(&mut self, request_id: &str, prompt_id: &str, option_id: &str) -> Value {
        self.pending_prompt_ids.retain(|id| id != prompt_id);
        json!({
            "schema_version": BRIDGE_REQUEST_SCHEMA_VERSION,
            "request_id": request_id,
            "kind": "permission.respond",
            "payload": { "prompt_id": prompt_id, "option_id": option_id },
        })
    }

    /// Applies one inbound bridge frame to the timeline.
    ///
    /// Frames tagged with a request id other than the active turn's are
    /// dropped: a stale in-flight turn must not corrupt a newer one.
    pub fn apply_event_frame(&mut self, frame: &BridgeEventFrame) {
        if self.is_stale_frame(frame) {
            self.dropped_stale_frames += 1;
            debug!(
                request_id = %frame.request_id,
                kind = %frame.kind,
                "dropped frame from superseded turn"
            );
            return;
        }

        match frame.kind.as_str() {
            "stream.response" => match decode_raw_message(&frame.payload) {
                Ok(raw) => match process_message(&raw) {
                    Some(message) => merge_streaming_message(&mut self.messages, message),
                    None => self.streaming = false,
                },
                Err(error) => warn!(%error, "undecodable stream.response payload"),
            },
            "message.complete" => {
                self.streaming = false;
                self.active_request_id = None;
                if let Some(session_id) = frame.payload.get("session_id").and_then(Value::as_str) {
                    self.session_id = Some(session_id.to_string());
                }
            }
            "session.id_available" => {
                if let Some(session_id) = frame.payload.get("session_id").and_then(Value::as_str) {
                    self.session_id = Some(session_id.to_string());
                }
            }
            "permission.request" => {
                if let Some(prompt_id) = frame.payload.get("prompt_id").and_then(Value::as_str) {
                    if !self.pending_prompt_ids.iter().any(|id| id == prompt_id) {
                        self.pending_prompt_ids.push(prompt_id.to_string());
                    }
                }
            }
            "error" => {
                let timestamp = current_unix_timestamp_ms();
                let message = frame
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                let entry = ProcessedMessage {
                    id: synthesize_message_id("error", timestamp),
                    kind: ProcessedMessageKind::Error,
                    content: message.to_string(),
                    timestamp_unix_ms: timestamp,
                    metadata: MessageMetadata {
                        request_id: Some(frame.request_id.clone()),
                        is_complete: true,
                        ..MessageMetadata::default()
                    },
                };
                merge_streaming_message(&mut self.messages, entry);
                self.streaming = false;
            }
            "aborted" => {
                let timestamp = current_unix_timestamp_ms();
                let entry = ProcessedMessage {
                    id: synthesize_message_id("abort", timestamp),
                    kind: ProcessedMessageKind::Abort,
                    content: "Request aborted".to_string(),
                    timestamp_unix_ms: timestamp,
                    metadata: MessageMetadata {
                        request_id: Some(frame.request_id.clone()),
                        is_complete: true,
                        ..MessageMetadata::default()
                    },
                };
                merge_streaming_message(&mut self.messages, entry);
                self.streaming = false;
                self.active_request_id = None;
            }
            other => debug!(kind = other, "ignored unknown bridge frame kind"),
        }
    }

    /// Loads persisted history, normalizing and deduplicating in one pass.
    pub fn load_history(&mut self, history: Vec<ProcessedMessage>) {
        let mut combined = history;
        combined.append(&mut self.messages);
        combined.sort_by_key(|message| message.timestamp_unix_ms);
        self.messages = deduplicate_messages(combined);
    }

    /// Full conversation reset: the only path that destroys messages.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.pending_prompt_ids.clear();
        self.active_request_id = None;
        self.session_id = None;
        self.streaming = false;
    }

    fn is_stale_frame(&self, frame: &BridgeEventFrame) -> bool {
        match frame.kind.as_str() {
            // Session and permission frames are conversation-scoped, not
            // turn-scoped.
            "session.id_available" | "permission.request" => false,
            _ => match &self.active_request_id {
                Some(active) => frame.request_id != *active,
                None => false,
            },
        }
    }
}
