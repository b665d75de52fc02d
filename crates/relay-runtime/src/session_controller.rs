//! Drives one agent invocation end-to-end: options, event stream, frames.

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use relay_core::current_unix_timestamp_ms;
use relay_messages::AgentEvent;
use relay_protocol::{
    build_bridge_error_frame, build_bridge_event_frame, PermissionMode,
    BRIDGE_ERROR_CODE_INTERNAL_ERROR,
};
use relay_session::{estimate_text_tokens, SessionManager};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    AgentRuntime, CancellationRegistry, PermissionGate, RuntimeOptions, Transport,
    SAFE_TOOLS,
};

/// One inbound `message.send`, parsed and ready to run.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub request_id: String,
    pub conversation_id: String,
    pub content: String,
    pub attachments: Vec<String>,
    pub session_id_override: Option<String>,
    pub permission_mode: PermissionMode,
}

/// Enumerates supported `TurnState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Starting,
    Streaming,
    Completing,
    Erroring,
    Aborting,
    Done,
}

/// Summary of a finished turn, for callers and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub request_id: String,
    pub conversation_id: String,
    pub final_state: TurnState,
    pub session_id: Option<String>,
    pub content: String,
    pub estimated_tokens: u64,
}

/// Public struct `SessionController` used across Relay components.
pub struct SessionController {
    runtime: Arc<dyn AgentRuntime>,
    transport: Arc<dyn Transport>,
    sessions: Arc<SessionManager>,
    gate: Arc<PermissionGate>,
    cancellations: CancellationRegistry,
    workdir: Option<PathBuf>,
    allowed_tools: Vec<String>,
}

impl SessionController {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        transport: Arc<dyn Transport>,
        sessions: Arc<SessionManager>,
        gate: Arc<PermissionGate>,
    ) -> Self {
        Self {
            runtime,
            transport,
            sessions,
            gate,
            cancellations: CancellationRegistry::new(),
            workdir: None,
            allowed_tools: Vec::new(),
        }
    }

    pub fn with_workdir(mut self, workdir: PathBuf) -> Self {
        self.workdir = Some(workdir);
        self
    }

    pub fn with_allowed_tools(mut self, allowed_tools: Vec<String>) -> Self {
        self.allowed_tools = allowed_tools;
        self
    }

    pub fn gate(&self) -> &Arc<PermissionGate> {
        &self.gate
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn active_turn_count(&self) -> usize {
        self.cancellations.active_count()
    }

    /// Requests cancellation of an in-flight turn. Idempotent; returns
    /// false when the turn is unknown or already cancelled.
    pub fn abort(&self, request_id: &str) -> bool {
        self.cancellations.cancel(request_id)
    }

    /// Runs one turn to a terminal state, emitting frames as it goes.
    ///
    /// Runtime failures surface as `error` frames and an `Erroring`
    /// report, not as `Err`; only transport emit failures propagate.
    pub async fn run_turn(&self, request: StreamRequest) -> Result<TurnReport> {
        let token = self.cancellations.register(&request.request_id);
        let report = self.run_turn_inner(&request, &token).await;
        self.cancellations.remove(&request.request_id);
        report
    }

    async fn run_turn_inner(
        &self,
        request: &StreamRequest,
        token: &crate::TurnCancellationToken,
    ) -> Result<TurnReport> {
        let mut session = self.sessions.get_or_create(&request.conversation_id)?;
        if session.permission_mode != request.permission_mode {
            session.permission_mode = request.permission_mode;
            self.sessions.store().upsert(&session)?;
        }

        // Compaction happens between turns, never mid-stream.
        if self
            .sessions
            .should_compact(&session, current_unix_timestamp_ms())
        {
            if let Some(compaction) = self.sessions.prepare_compaction(&session) {
                match self.runtime.compact(&compaction).await {
                    Ok(()) => {
                        self.sessions.complete_compaction(
                            &request.conversation_id,
                            current_unix_timestamp_ms(),
                        )?;
                        session = self.sessions.get_or_create(&request.conversation_id)?;
                    }
                    Err(error) => {
                        warn!(
                            conversation_id = %request.conversation_id,
                            %error,
                            "compaction failed; continuing with the existing session"
                        );
                    }
                }
            }
        }

        let continuity = self
            .sessions
            .continuity(&session, request.session_id_override.as_deref());
        let options = RuntimeOptions {
            conversation_id: request.conversation_id.clone(),
            request_id: request.request_id.clone(),
            continuity,
            permission_mode: request.permission_mode,
            allowed_tools: self.allowed_tools_for(request.permission_mode),
            workdir: self.workdir.clone(),
            gate: Arc::clone(&self.gate),
        };

        let prompt = compose_prompt(&request.content, &request.attachments);
        let mut stream = match self.runtime.start(prompt, options).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(request_id = %request.request_id, %error, "runtime failed to start");
                self.emit_error(&request.request_id, &error.to_string())
                    .await?;
                return Ok(self.report(request, TurnState::Erroring, None, String::new(), 0));
            }
        };

        let mut state = TurnState::Streaming;
        let mut captured_session_id: Option<String> = None;
        let mut content = String::new();
        let mut reported_tokens: Option<u64> = None;

        while state == TurnState::Streaming {
            tokio::select! {
                _ = token.cancelled() => {
                    state = TurnState::Aborting;
                }
                next = stream.recv() => match next {
                    None => {
                        state = TurnState::Completing;
                    }
                    Some(Err(error)) => {
                        warn!(request_id = %request.request_id, %error, "runtime stream failed");
                        self.emit_error(&request.request_id, &error.to_string()).await?;
                        state = TurnState::Erroring;
                    }
                    Some(Ok(event)) => {
                        if captured_session_id.is_none() {
                            if let Some(session_id) = event.session_id() {
                                captured_session_id = Some(session_id.to_string());
                                self.emit_session_id(request, session_id).await?;
                            }
                        }
                        match &event {
                            AgentEvent::Assistant { message, .. } => {
                                let text = message.flattened_text();
                                // Full-text replacement, never concatenation:
                                // assistant events carry the accumulated text.
                                if !text.is_empty() {
                                    content = text;
                                }
                            }
                            AgentEvent::Result { result, usage, .. } => {
                                if let Some(final_text) = result {
                                    content = final_text.clone();
                                }
                                reported_tokens =
                                    usage.as_ref().map(|usage| usage.total_tokens());
                                state = TurnState::Completing;
                            }
                            _ => {}
                        }
                        self.emit_stream_response(request, &event).await?;
                    }
                },
            }
        }

        match state {
            TurnState::Aborting => {
                info!(request_id = %request.request_id, "turn aborted");
                let released = self
                    .gate
                    .delegation()
                    .release_for_request(&request.request_id)
                    .await;
                if released > 0 {
                    debug!(request_id = %request.request_id, released, "released permission waits");
                }
                self.transport
                    .emit(build_bridge_event_frame(
                        &request.request_id,
                        "aborted",
                        json!({ "conversation_id": request.conversation_id }),
                    ))
                    .await?;
                Ok(self.report(request, TurnState::Aborting, captured_session_id, content, 0))
            }
            TurnState::Completing => {
                let estimated_tokens =
                    reported_tokens.unwrap_or_else(|| estimate_text_tokens(&content));
                // Session id is persisted once per turn, here, not on every
                // intermediate capture. Both writes are best effort.
                if let Some(session_id) = &captured_session_id {
                    if let Err(error) = self
                        .sessions
                        .store_session_id(&request.conversation_id, session_id)
                    {
                        warn!(
                            conversation_id = %request.conversation_id,
                            %error,
                            "session id write failed"
                        );
                    }
                }
                self.sessions
                    .record_token_usage(&request.conversation_id, estimated_tokens);
                self.transport
                    .emit(build_bridge_event_frame(
                        &request.request_id,
                        "message.complete",
                        json!({
                            "conversation_id": request.conversation_id,
                            "session_id": captured_session_id,
                        }),
                    ))
                    .await?;
                Ok(self.report(
                    request,
                    TurnState::Done,
                    captured_session_id,
                    content,
                    estimated_tokens,
                ))
            }
            // Error frame already emitted inside the loop.
            _ => Ok(self.report(request, TurnState::Erroring, captured_session_id, content, 0)),
        }
    }

    fn allowed_tools_for(&self, mode: PermissionMode) -> Vec<String> {
        if mode == PermissionMode::Plan {
            // Plan mode keeps the runtime read-only.
            return SAFE_TOOLS.iter().map(|tool| tool.to_string()).collect();
        }
        self.allowed_tools.clone()
    }

    async fn emit_stream_response(
        &self,
        request: &StreamRequest,
        event: &AgentEvent,
    ) -> Result<()> {
        self.transport
            .emit(build_bridge_event_frame(
                &request.request_id,
                "stream.response",
                json!({
                    "type": "agent_event",
                    "data": event,
                    "request_id": request.request_id,
                    "conversation_id": request.conversation_id,
                    "timestamp_unix_ms": current_unix_timestamp_ms(),
                }),
            ))
            .await
    }

    async fn emit_session_id(&self, request: &StreamRequest, session_id: &str) -> Result<()> {
        self.transport
            .emit(build_bridge_event_frame(
                &request.request_id,
                "session.id_available",
                json!({
                    "conversation_id": request.conversation_id,
                    "session_id": session_id,
                }),
            ))
            .await
    }

    async fn emit_error(&self, request_id: &str, message: &str) -> Result<()> {
        self.transport
            .emit(build_bridge_error_frame(
                request_id,
                BRIDGE_ERROR_CODE_INTERNAL_ERROR,
                message,
            ))
            .await
    }

    fn report(
        &self,
        request: &StreamRequest,
        final_state: TurnState,
        session_id: Option<String>,
        content: String,
        estimated_tokens: u64,
    ) -> TurnReport {
        TurnReport {
            request_id: request.request_id.clone(),
            conversation_id: request.conversation_id.clone(),
            final_state,
            session_id,
            content,
            estimated_tokens,
        }
    }
}

fn compose_prompt(content: &str, attachments: &[String]) -> String {
    if attachments.is_empty() {
        return content.to_string();
    }
    let mut prompt = content.to_string();
    for attachment in attachments {
        prompt.push('\n');
        prompt.push_str("Attachment: ");
        prompt.push_str(attachment);
    }
    prompt
}
