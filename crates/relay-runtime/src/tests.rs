use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use relay_decision::{
    AllowlistStrategy, DecisionEngine, DecisionStrategy, DenylistStrategy, JsonlPromptStore,
    PromptStatus, PromptStore, UserDelegationStrategy,
};
use relay_messages::{AgentContentBlock, AgentEvent, AgentMessage, AgentUsage};
use relay_protocol::{BridgeEventFrame, PermissionMode};
use relay_session::{
    ConversationSession, ConversationStore, JsonlConversationStore, SessionManager,
    COMPACT_THRESHOLD_TOKENS,
};

use super::*;

struct Harness {
    _dir: TempDir,
    transport: Arc<dyn Transport>,
    frames: mpsc::UnboundedReceiver<BridgeEventFrame>,
    engine: Arc<DecisionEngine>,
    delegation: Arc<UserDelegationStrategy>,
    sessions: Arc<SessionManager>,
    gate: Arc<PermissionGate>,
}

fn build_harness(delegation_timeout: Duration) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let (channel_transport, frames) = ChannelTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(channel_transport);
    let prompt_store: Arc<dyn PromptStore> = Arc::new(
        JsonlPromptStore::load(dir.path().join("prompts.jsonl")).expect("prompt store"),
    );
    let notifier = Arc::new(TransportPromptNotifier::new(Arc::clone(&transport)));
    let delegation = Arc::new(UserDelegationStrategy::with_timeout(
        notifier,
        delegation_timeout,
    ));
    let strategies: Vec<Arc<dyn DecisionStrategy>> = vec![
        Arc::new(AllowlistStrategy),
        Arc::new(DenylistStrategy),
        Arc::clone(&delegation) as Arc<dyn DecisionStrategy>,
    ];
    let engine = Arc::new(DecisionEngine::new(prompt_store, strategies));
    let conversation_store: Arc<dyn ConversationStore> = Arc::new(
        JsonlConversationStore::load(dir.path().join("conversations.jsonl"))
            .expect("conversation store"),
    );
    let sessions = Arc::new(SessionManager::new(conversation_store));
    let gate = Arc::new(PermissionGate::new(
        Arc::clone(&engine),
        Arc::clone(&delegation),
        Arc::clone(&sessions),
    ));
    Harness {
        _dir: dir,
        transport,
        frames,
        engine,
        delegation,
        sessions,
        gate,
    }
}

fn tool_context(request_id: &str) -> ToolCallContext {
    ToolCallContext {
        conversation_id: "conv-1".to_string(),
        session_id: None,
        request_id: request_id.to_string(),
        permission_mode: PermissionMode::Default,
    }
}

fn system_event(session_id: &str) -> AgentEvent {
    AgentEvent::System {
        subtype: Some("init".to_string()),
        session_id: Some(session_id.to_string()),
    }
}

fn assistant_text_event(text: &str, session_id: &str) -> AgentEvent {
    AgentEvent::Assistant {
        message: AgentMessage {
            id: Some("msg-1".to_string()),
            content: vec![AgentContentBlock::Text {
                text: text.to_string(),
            }],
        },
        session_id: Some(session_id.to_string()),
    }
}

fn result_event(text: &str, session_id: &str) -> AgentEvent {
    AgentEvent::Result {
        subtype: Some("success".to_string()),
        session_id: Some(session_id.to_string()),
        result: Some(text.to_string()),
        is_error: false,
        usage: Some(AgentUsage {
            input_tokens: 12,
            output_tokens: 7,
        }),
        total_cost_usd: Some(0.01),
        duration_ms: Some(1_200),
    }
}

fn stream_request(request_id: &str) -> StreamRequest {
    StreamRequest {
        request_id: request_id.to_string(),
        conversation_id: "conv-1".to_string(),
        content: "Hi".to_string(),
        attachments: Vec::new(),
        session_id_override: None,
        permission_mode: PermissionMode::Default,
    }
}

#[derive(Default)]
struct ScriptedRuntime {
    script: Vec<AgentEvent>,
    tool_request: Option<(String, Value)>,
    fail_start: bool,
    captured_options: std::sync::Mutex<Vec<(Vec<String>, PermissionMode)>>,
    decisions: Arc<std::sync::Mutex<Vec<PermissionDecision>>>,
    compactions: std::sync::Mutex<Vec<relay_session::CompactionRequest>>,
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn start(
        &self,
        _prompt: String,
        options: RuntimeOptions,
    ) -> Result<AgentEventStream, RuntimeError> {
        if self.fail_start {
            return Err(RuntimeError::Agent("runtime exploded".to_string()));
        }
        self.captured_options
            .lock()
            .expect("options lock")
            .push((options.allowed_tools.clone(), options.permission_mode));
        let (sender, receiver) = mpsc::channel(16);
        let script = self.script.clone();
        let tool_request = self.tool_request.clone();
        let decisions = Arc::clone(&self.decisions);
        tokio::spawn(async move {
            if let Some((tool, input)) = tool_request {
                let context = ToolCallContext {
                    conversation_id: options.conversation_id.clone(),
                    session_id: None,
                    request_id: options.request_id.clone(),
                    permission_mode: options.permission_mode,
                };
                if let Ok(decision) = options.gate.can_use_tool(&tool, &input, &context).await {
                    decisions.lock().expect("decisions lock").push(decision);
                }
            }
            for event in script {
                if sender.send(Ok(event)).await.is_err() {
                    break;
                }
            }
        });
        Ok(receiver)
    }

    async fn compact(
        &self,
        request: &relay_session::CompactionRequest,
    ) -> Result<(), RuntimeError> {
        self.compactions
            .lock()
            .expect("compactions lock")
            .push(request.clone());
        Ok(())
    }
}

fn drain_frames(frames: &mut mpsc::UnboundedReceiver<BridgeEventFrame>) -> Vec<BridgeEventFrame> {
    let mut collected = Vec::new();
    while let Ok(frame) = frames.try_recv() {
        collected.push(frame);
    }
    collected
}

mod registry {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let registry = CancellationRegistry::new();
        let token = registry.register("req-1");
        assert!(registry.cancel("req-1"));
        assert!(!registry.cancel("req-1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn remove_is_exactly_once() {
        let registry = CancellationRegistry::new();
        registry.register("req-1");
        assert_eq!(registry.active_count(), 1);
        assert!(registry.remove("req-1"));
        assert!(!registry.remove("req-1"));
        assert!(!registry.cancel("req-1"));
    }

    #[tokio::test]
    async fn cancelled_wait_settles_immediately_after_cancel() {
        let token = TurnCancellationToken::new();
        token.cancel();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() must not hang");
    }
}

mod gate {
    use super::*;

    #[test]
    fn risk_table_applies_override_rules() {
        assert_eq!(classify_tool_risk("Read", &json!({})), RiskLevel::Low);
        assert_eq!(classify_tool_risk("Write", &json!({})), RiskLevel::Medium);
        assert_eq!(
            classify_tool_risk("mcp__github__create_issue", &json!({})),
            RiskLevel::High
        );
        assert_eq!(
            classify_tool_risk("Bash", &json!({ "command": "ls -la" })),
            RiskLevel::High
        );
        assert_eq!(
            classify_tool_risk("Bash", &json!({ "command": "sudo rm -rf /" })),
            RiskLevel::Critical
        );
    }

    #[tokio::test]
    async fn safe_tool_allows_without_creating_prompt() {
        let harness = build_harness(Duration::from_millis(100));
        let decision = harness
            .gate
            .can_use_tool("Read", &json!({ "file_path": "/tmp/a" }), &tool_context("req-1"))
            .await
            .expect("gate");
        assert_eq!(
            decision,
            PermissionDecision::Allow {
                updated_input: None
            }
        );
        let stats = harness.engine.store().stats().expect("stats");
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn accept_edits_mode_allows_edit_family_without_prompt() {
        let harness = build_harness(Duration::from_millis(100));
        let mut context = tool_context("req-1");
        context.permission_mode = PermissionMode::AcceptEdits;
        let decision = harness
            .gate
            .can_use_tool("Write", &json!({ "file_path": "/tmp/a" }), &context)
            .await
            .expect("gate");
        assert!(matches!(decision, PermissionDecision::Allow { .. }));
        assert_eq!(harness.engine.store().stats().expect("stats").total, 0);
    }

    async fn respond_when_prompt_appears(harness: &Harness, option_id: &'static str) {
        let store = Arc::clone(harness.engine.store());
        let gate = Arc::clone(&harness.gate);
        let option_id = option_id.to_string();
        tokio::spawn(async move {
            for _ in 0..200 {
                let pending = store.list_pending(None).expect("list pending");
                if let Some(prompt) = pending.first() {
                    gate.respond(&prompt.id, &option_id).await.expect("respond");
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
    }

    #[tokio::test]
    async fn always_allow_persists_grant_and_skips_next_prompt() {
        let harness = build_harness(Duration::from_secs(5));
        respond_when_prompt_appears(&harness, "3").await;
        let decision = harness
            .gate
            .can_use_tool("Write", &json!({ "file_path": "/tmp/a" }), &tool_context("req-1"))
            .await
            .expect("gate");
        assert!(matches!(decision, PermissionDecision::Allow { .. }));
        assert!(harness
            .sessions
            .has_grant("conv-1", "Write")
            .expect("grant lookup"));

        // A later turn hits the persisted grant, no second prompt.
        let decision = harness
            .gate
            .can_use_tool("Write", &json!({ "file_path": "/tmp/b" }), &tool_context("req-2"))
            .await
            .expect("gate");
        assert!(matches!(decision, PermissionDecision::Allow { .. }));
        assert_eq!(harness.engine.store().stats().expect("stats").total, 1);
    }

    #[tokio::test]
    async fn allow_all_covers_other_tools_in_same_conversation() {
        let harness = build_harness(Duration::from_secs(5));
        respond_when_prompt_appears(&harness, "2").await;
        let decision = harness
            .gate
            .can_use_tool("Write", &json!({}), &tool_context("req-1"))
            .await
            .expect("gate");
        assert!(matches!(decision, PermissionDecision::Allow { .. }));

        let decision = harness
            .gate
            .can_use_tool("WebFetch", &json!({ "url": "https://example.com" }), &tool_context("req-1"))
            .await
            .expect("gate");
        assert!(matches!(decision, PermissionDecision::Allow { .. }));
        assert_eq!(harness.engine.store().stats().expect("stats").total, 1);
    }

    #[tokio::test]
    async fn denied_tool_is_remembered_without_a_second_prompt() {
        let harness = build_harness(Duration::from_secs(5));
        respond_when_prompt_appears(&harness, "4").await;
        let decision = harness
            .gate
            .can_use_tool("Write", &json!({}), &tool_context("req-1"))
            .await
            .expect("gate");
        assert!(matches!(decision, PermissionDecision::Deny { .. }));

        let decision = harness
            .gate
            .can_use_tool("Write", &json!({}), &tool_context("req-1"))
            .await
            .expect("gate");
        assert!(matches!(decision, PermissionDecision::Deny { .. }));
        assert_eq!(harness.engine.store().stats().expect("stats").total, 1);
    }

    #[tokio::test]
    async fn delegation_timeout_surfaces_as_pending_not_denied() {
        let harness = build_harness(Duration::from_millis(30));
        let decision = harness
            .gate
            .can_use_tool("Write", &json!({}), &tool_context("req-1"))
            .await
            .expect("gate");
        let PermissionDecision::Pending { prompt_id, .. } = decision else {
            panic!("expected pending decision, got {decision:?}");
        };
        let stored = harness
            .engine
            .store()
            .get(&prompt_id)
            .expect("get prompt")
            .expect("prompt exists");
        assert_eq!(stored.status, PromptStatus::Pending);
    }

    #[tokio::test]
    async fn released_wait_surfaces_as_cancelled_not_denied() {
        let harness = build_harness(Duration::from_secs(30));
        let gate = Arc::clone(&harness.gate);
        let call = tokio::spawn(async move {
            gate.can_use_tool("Write", &json!({ "file_path": "/tmp/a" }), &tool_context("req-1"))
                .await
        });

        for _ in 0..200 {
            if harness.delegation.pending_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(harness.delegation.release_for_request("req-1").await, 1);

        let decision = call.await.expect("join").expect("gate");
        assert!(matches!(decision, PermissionDecision::Cancelled { .. }));

        // No denial is remembered: the next call prompts again.
        let pending = harness
            .engine
            .store()
            .list_pending(None)
            .expect("list pending");
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn gate_prompt_carries_four_options() {
        let mut harness = build_harness(Duration::from_millis(30));
        let _ = harness
            .gate
            .can_use_tool("Write", &json!({}), &tool_context("req-1"))
            .await
            .expect("gate");
        let frames = drain_frames(&mut harness.frames);
        let request = frames
            .iter()
            .find(|frame| frame.kind == "permission.request")
            .expect("permission.request frame");
        let options = request.payload["prompt"]["options"]
            .as_array()
            .expect("options array");
        assert_eq!(options.len(), 4);
        assert_eq!(options[2]["value"], "allow_always");
    }
}

mod controller {
    use super::*;

    fn build_controller(
        harness: &Harness,
        runtime: Arc<ScriptedRuntime>,
    ) -> Arc<SessionController> {
        Arc::new(SessionController::new(
            runtime,
            Arc::clone(&harness.transport),
            Arc::clone(&harness.sessions),
            Arc::clone(&harness.gate),
        ))
    }

    #[tokio::test]
    async fn plain_turn_streams_and_persists_session_id_once() {
        let mut harness = build_harness(Duration::from_millis(100));
        let runtime = Arc::new(ScriptedRuntime {
            script: vec![
                system_event("sess-1"),
                assistant_text_event("Hello", "sess-1"),
                result_event("Hello there!", "sess-1"),
            ],
            ..ScriptedRuntime::default()
        });
        let controller = build_controller(&harness, runtime);

        let report = controller
            .run_turn(stream_request("req-1"))
            .await
            .expect("turn");
        assert_eq!(report.final_state, TurnState::Done);
        assert_eq!(report.session_id.as_deref(), Some("sess-1"));
        assert_eq!(report.content, "Hello there!");
        assert_eq!(report.estimated_tokens, 19);

        let frames = drain_frames(&mut harness.frames);
        let kinds = frames
            .iter()
            .map(|frame| frame.kind.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                "session.id_available",
                "stream.response",
                "stream.response",
                "stream.response",
                "message.complete",
            ]
        );

        let session = harness
            .sessions
            .get_or_create("conv-1")
            .expect("session");
        assert_eq!(session.agent_session_id.as_deref(), Some("sess-1"));
        assert_eq!(session.context_tokens, 19);
        assert_eq!(controller.active_turn_count(), 0);
    }

    #[tokio::test]
    async fn session_id_is_captured_from_first_event_only() {
        let mut harness = build_harness(Duration::from_millis(100));
        let runtime = Arc::new(ScriptedRuntime {
            script: vec![
                system_event("sess-first"),
                assistant_text_event("text", "sess-other"),
                result_event("done", "sess-other"),
            ],
            ..ScriptedRuntime::default()
        });
        let controller = build_controller(&harness, runtime);
        let report = controller
            .run_turn(stream_request("req-1"))
            .await
            .expect("turn");
        assert_eq!(report.session_id.as_deref(), Some("sess-first"));

        let frames = drain_frames(&mut harness.frames);
        let announcements = frames
            .iter()
            .filter(|frame| frame.kind == "session.id_available")
            .count();
        assert_eq!(announcements, 1);
        let session = harness
            .sessions
            .get_or_create("conv-1")
            .expect("session");
        assert_eq!(session.agent_session_id.as_deref(), Some("sess-first"));
    }

    #[tokio::test]
    async fn runtime_start_failure_surfaces_as_error_frame() {
        let mut harness = build_harness(Duration::from_millis(100));
        let runtime = Arc::new(ScriptedRuntime {
            fail_start: true,
            ..ScriptedRuntime::default()
        });
        let controller = build_controller(&harness, runtime);
        let report = controller
            .run_turn(stream_request("req-1"))
            .await
            .expect("turn");
        assert_eq!(report.final_state, TurnState::Erroring);

        let frames = drain_frames(&mut harness.frames);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, "error");
        assert_eq!(frames[0].payload["code"], "internal_error");
    }

    #[tokio::test]
    async fn abort_releases_permission_wait_and_emits_aborted() {
        let harness = build_harness(Duration::from_secs(30));
        let runtime = Arc::new(ScriptedRuntime {
            tool_request: Some(("Write".to_string(), json!({ "file_path": "/tmp/a" }))),
            script: vec![result_event("never reached", "sess-1")],
            ..ScriptedRuntime::default()
        });
        let controller = build_controller(&harness, runtime);
        let delegation = Arc::clone(&harness.delegation);

        let turn = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run_turn(stream_request("req-1")).await })
        };

        // Wait until the gate wait is registered before aborting.
        for _ in 0..200 {
            if delegation.pending_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(delegation.pending_count().await, 1);
        assert!(controller.abort("req-1"));

        let report = turn.await.expect("join").expect("turn");
        assert_eq!(report.final_state, TurnState::Aborting);
        assert_eq!(delegation.pending_count().await, 0);
        assert_eq!(controller.active_turn_count(), 0);
    }

    #[tokio::test]
    async fn plan_mode_restricts_runtime_to_read_only_tools() {
        let harness = build_harness(Duration::from_millis(100));
        let runtime = Arc::new(ScriptedRuntime {
            script: vec![result_event("plan ready", "sess-1")],
            ..ScriptedRuntime::default()
        });
        let controller = build_controller(&harness, Arc::clone(&runtime));
        let mut request = stream_request("req-1");
        request.permission_mode = PermissionMode::Plan;
        controller.run_turn(request).await.expect("turn");

        let captured = runtime.captured_options.lock().expect("options lock");
        let (allowed_tools, mode) = captured.first().expect("one invocation");
        assert_eq!(*mode, PermissionMode::Plan);
        assert_eq!(
            allowed_tools,
            &SAFE_TOOLS
                .iter()
                .map(|tool| tool.to_string())
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn oversized_context_triggers_compaction_before_the_turn() {
        let harness = build_harness(Duration::from_millis(100));
        harness
            .sessions
            .store()
            .upsert(&ConversationSession {
                conversation_id: "conv-1".to_string(),
                created_unix_ms: 0,
                agent_session_id: Some("sess-old".to_string()),
                context_tokens: COMPACT_THRESHOLD_TOKENS + 1,
                last_compacted_unix_ms: None,
                permission_mode: PermissionMode::Default,
            })
            .expect("seed session");

        let runtime = Arc::new(ScriptedRuntime {
            script: vec![result_event("fresh epoch", "sess-new")],
            ..ScriptedRuntime::default()
        });
        let controller = build_controller(&harness, Arc::clone(&runtime));
        controller
            .run_turn(stream_request("req-1"))
            .await
            .expect("turn");

        let compactions = runtime.compactions.lock().expect("compactions lock");
        assert_eq!(compactions.len(), 1);
        assert_eq!(compactions[0].session_id, "sess-old");

        // New epoch: the fresh id from the stream replaced the old one.
        let session = harness
            .sessions
            .get_or_create("conv-1")
            .expect("session");
        assert_eq!(session.agent_session_id.as_deref(), Some("sess-new"));
        assert!(session.last_compacted_unix_ms.is_some());
    }
}

mod service {
    use super::*;
    use relay_protocol::BRIDGE_REQUEST_SCHEMA_VERSION;

    fn build_service(harness: &Harness, runtime: Arc<ScriptedRuntime>) -> BridgeService {
        let controller = Arc::new(SessionController::new(
            runtime,
            Arc::clone(&harness.transport),
            Arc::clone(&harness.sessions),
            Arc::clone(&harness.gate),
        ));
        BridgeService::new(
            controller,
            Arc::clone(&harness.transport),
            Arc::clone(&harness.engine),
        )
    }

    #[tokio::test]
    async fn malformed_json_is_rejected_with_stable_code() {
        let mut harness = build_harness(Duration::from_millis(100));
        let service = build_service(&harness, Arc::new(ScriptedRuntime::default()));
        service.handle_raw_frame("{not json").await.expect("handled");
        let frames = drain_frames(&mut harness.frames);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, "error");
        assert_eq!(frames[0].payload["code"], "invalid_json");
    }

    #[tokio::test]
    async fn send_frame_runs_a_turn_to_completion() {
        let mut harness = build_harness(Duration::from_millis(100));
        let runtime = Arc::new(ScriptedRuntime {
            script: vec![system_event("sess-1"), result_event("hi", "sess-1")],
            ..ScriptedRuntime::default()
        });
        let service = build_service(&harness, runtime);
        let raw = json!({
            "schema_version": BRIDGE_REQUEST_SCHEMA_VERSION,
            "request_id": "req-1",
            "kind": "message.send",
            "payload": { "conversation_id": "conv-1", "content": "Hi" },
        })
        .to_string();
        service.handle_raw_frame(&raw).await.expect("handled");

        let complete = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(frame) = harness.frames.recv().await {
                    if frame.kind == "message.complete" {
                        return frame;
                    }
                }
            }
        })
        .await
        .expect("turn completes");
        assert_eq!(complete.payload["conversation_id"], "conv-1");
        assert_eq!(complete.payload["session_id"], "sess-1");
    }

    #[tokio::test]
    async fn abort_frame_for_unknown_target_is_a_noop() {
        let harness = build_harness(Duration::from_millis(100));
        let service = build_service(&harness, Arc::new(ScriptedRuntime::default()));
        let raw = json!({
            "schema_version": BRIDGE_REQUEST_SCHEMA_VERSION,
            "request_id": "req-9",
            "kind": "message.abort",
            "payload": { "target_request_id": "req-unknown" },
        })
        .to_string();
        service.handle_raw_frame(&raw).await.expect("handled");
    }

    #[tokio::test]
    async fn late_permission_response_records_manual_answer() {
        let harness = build_harness(Duration::from_millis(20));
        let service = build_service(&harness, Arc::new(ScriptedRuntime::default()));

        // Delegation window elapses, prompt stays pending.
        let decision = harness
            .gate
            .can_use_tool("Write", &json!({}), &tool_context("req-1"))
            .await
            .expect("gate");
        let PermissionDecision::Pending { prompt_id, .. } = decision else {
            panic!("expected pending decision");
        };

        let raw = json!({
            "schema_version": BRIDGE_REQUEST_SCHEMA_VERSION,
            "request_id": "req-2",
            "kind": "permission.respond",
            "payload": { "prompt_id": prompt_id, "option_id": "1" },
        })
        .to_string();
        service.handle_raw_frame(&raw).await.expect("handled");

        let stored = harness
            .engine
            .store()
            .get(&prompt_id)
            .expect("get prompt")
            .expect("prompt exists");
        assert_eq!(stored.status, PromptStatus::Answered);
        assert_eq!(stored.selected_option.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn sweep_closes_prompts_past_their_window() {
        let harness = build_harness(Duration::from_millis(20));
        let service = build_service(&harness, Arc::new(ScriptedRuntime::default()));
        let decision = harness
            .gate
            .can_use_tool("Write", &json!({}), &tool_context("req-1"))
            .await
            .expect("gate");
        assert!(matches!(decision, PermissionDecision::Pending { .. }));

        // Nothing has expired against the real engine window yet.
        let swept = service.sweep_expired_prompts().expect("sweep");
        assert!(swept.is_empty());
    }
}
