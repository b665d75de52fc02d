//! End-to-end bridge tests: client frames in on one side, event frames out
//! on the other, with the permission gate and both stores wired the same
//! way the `relay-bridge` binary wires them. The client half runs through
//! `ChatStore` so the frames exercised here are the real wire shapes.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use relay_decision::{
    AllowlistStrategy, DecisionEngine, DecisionStrategy, DenylistStrategy, JsonlPromptStore,
    PromptStore, UserDelegationStrategy,
};
use relay_messages::{
    AgentContentBlock, AgentEvent, AgentMessage, AgentUsage, ChatStore, ProcessedMessageKind,
};
use relay_protocol::{BridgeEventFrame, PermissionMode};
use relay_runtime::{
    AgentEventStream, AgentRuntime, BridgeService, ChannelTransport, PermissionDecision,
    PermissionGate, RuntimeError, RuntimeOptions, SessionController, ToolCallContext, Transport,
    TransportPromptNotifier,
};
use relay_session::{CompactionRequest, ConversationStore, JsonlConversationStore, SessionManager};

/// Scripted agent stand-in: optionally asks the gate for one tool, then
/// replays a fixed event stream.
struct ScriptedRuntime {
    script: Vec<AgentEvent>,
    tool_request: Option<(String, Value)>,
    decisions: Arc<Mutex<Vec<PermissionDecision>>>,
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn start(
        &self,
        _prompt: String,
        options: RuntimeOptions,
    ) -> Result<AgentEventStream, RuntimeError> {
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

    async fn compact(&self, _request: &CompactionRequest) -> Result<(), RuntimeError> {
        Ok(())
    }
}

struct BridgeStack {
    _dir: TempDir,
    service: Arc<BridgeService>,
    frames: mpsc::UnboundedReceiver<BridgeEventFrame>,
    sessions: Arc<SessionManager>,
    prompt_store: Arc<dyn PromptStore>,
    delegation: Arc<UserDelegationStrategy>,
    decisions: Arc<Mutex<Vec<PermissionDecision>>>,
}

fn build_stack(
    script: Vec<AgentEvent>,
    tool_request: Option<(String, Value)>,
    delegation_timeout: Duration,
) -> BridgeStack {
    let dir = tempfile::tempdir().expect("tempdir");
    let (channel_transport, frames) = ChannelTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(channel_transport);

    let prompt_store: Arc<dyn PromptStore> = Arc::new(
        JsonlPromptStore::load(dir.path().join("prompts.jsonl")).expect("prompt store"),
    );
    let conversation_store: Arc<dyn ConversationStore> = Arc::new(
        JsonlConversationStore::load(dir.path().join("conversations.jsonl"))
            .expect("conversation store"),
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
    let engine = Arc::new(DecisionEngine::new(Arc::clone(&prompt_store), strategies));
    let sessions = Arc::new(SessionManager::new(conversation_store));
    let gate = Arc::new(PermissionGate::new(
        Arc::clone(&engine),
        Arc::clone(&delegation),
        Arc::clone(&sessions),
    ));

    let decisions = Arc::new(Mutex::new(Vec::new()));
    let runtime = Arc::new(ScriptedRuntime {
        script,
        tool_request,
        decisions: Arc::clone(&decisions),
    });
    let controller = Arc::new(SessionController::new(
        runtime,
        Arc::clone(&transport),
        Arc::clone(&sessions),
        gate,
    ));
    let service = Arc::new(BridgeService::new(
        controller,
        Arc::clone(&transport),
        engine,
    ));

    BridgeStack {
        _dir: dir,
        service,
        frames,
        sessions,
        prompt_store,
        delegation,
        decisions,
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

/// Sends one `message.send` frame and pumps event frames into the chat
/// until the turn reaches a terminal frame. When `respond_with` is set,
/// any permission prompt that arrives is answered with that option id.
async fn run_turn(
    stack: &mut BridgeStack,
    chat: &mut ChatStore,
    request_id: &str,
    content: &str,
    respond_with: Option<&str>,
) -> Vec<BridgeEventFrame> {
    let send = chat.begin_send(request_id, content, PermissionMode::Default);
    stack
        .service
        .handle_raw_frame(&send.to_string())
        .await
        .expect("send frame");

    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = stack.frames.recv().await {
            chat.apply_event_frame(&frame);
            if frame.kind == "permission.request" {
                if let (Some(option_id), Some(prompt_id)) = (
                    respond_with,
                    frame.payload.get("prompt_id").and_then(Value::as_str),
                ) {
                    let prompt_id = prompt_id.to_string();
                    let respond = chat.respond_to_prompt("req-perm", &prompt_id, option_id);
                    stack
                        .service
                        .handle_raw_frame(&respond.to_string())
                        .await
                        .expect("respond frame");
                }
            }
            let terminal = matches!(
                frame.kind.as_str(),
                "message.complete" | "aborted" | "error"
            );
            seen.push(frame);
            if terminal {
                break;
            }
        }
    })
    .await
    .expect("terminal frame before timeout");
    seen
}

#[tokio::test]
async fn send_message_streams_to_completion_and_announces_session() {
    let mut stack = build_stack(
        vec![
            system_event("sess-1"),
            assistant_text_event("Hello", "sess-1"),
            result_event("Hello there!", "sess-1"),
        ],
        None,
        Duration::from_secs(5),
    );
    let mut chat = ChatStore::new("conv-1");

    let frames = run_turn(&mut stack, &mut chat, "req-1", "Hi", None).await;

    assert_eq!(chat.session_id(), Some("sess-1"));
    assert!(!chat.is_streaming());
    let announcements = frames
        .iter()
        .filter(|frame| frame.kind == "session.id_available")
        .count();
    assert_eq!(announcements, 1);

    // Optimistic user entry first, then the streamed turn.
    assert_eq!(chat.messages()[0].kind, ProcessedMessageKind::User);
    assert!(chat
        .messages()
        .iter()
        .any(|message| message.kind == ProcessedMessageKind::Assistant
            && message.content == "Hello"));
    assert!(chat
        .messages()
        .iter()
        .any(|message| message.kind == ProcessedMessageKind::Result
            && message.content == "Hello there!"));

    let session = stack.sessions.get_or_create("conv-1").expect("session");
    assert_eq!(session.agent_session_id.as_deref(), Some("sess-1"));
    assert_eq!(session.context_tokens, 19);
}

#[tokio::test]
async fn read_tool_runs_without_a_permission_prompt() {
    let mut stack = build_stack(
        vec![system_event("sess-1"), result_event("notes read", "sess-1")],
        Some(("Read".to_string(), json!({ "file_path": "/tmp/notes" }))),
        Duration::from_secs(5),
    );
    let mut chat = ChatStore::new("conv-1");

    let frames = run_turn(&mut stack, &mut chat, "req-1", "read my notes", None).await;

    assert!(frames.iter().all(|frame| frame.kind != "permission.request"));
    assert!(chat.pending_prompt_ids().is_empty());

    let decisions = stack.decisions.lock().expect("decisions lock");
    assert!(matches!(
        decisions.first(),
        Some(PermissionDecision::Allow { .. })
    ));
    assert_eq!(stack.prompt_store.stats().expect("stats").total, 0);
}

#[tokio::test]
async fn always_allow_response_grants_the_tool_for_later_turns() {
    let mut stack = build_stack(
        vec![system_event("sess-1"), result_event("wrote it", "sess-1")],
        Some(("Write".to_string(), json!({ "file_path": "/tmp/out" }))),
        Duration::from_secs(30),
    );
    let mut chat = ChatStore::new("conv-1");

    let frames = run_turn(&mut stack, &mut chat, "req-1", "write the file", Some("3")).await;
    assert!(frames.iter().any(|frame| frame.kind == "permission.request"));
    assert!(stack
        .sessions
        .has_grant("conv-1", "Write")
        .expect("grant lookup"));

    // Same conversation, new turn: the persisted grant answers the gate
    // before any prompt is created.
    let frames = run_turn(&mut stack, &mut chat, "req-2", "write it again", None).await;
    assert!(frames.iter().all(|frame| frame.kind != "permission.request"));
    assert_eq!(stack.prompt_store.stats().expect("stats").total, 1);

    let decisions = stack.decisions.lock().expect("decisions lock");
    assert_eq!(decisions.len(), 2);
    assert!(decisions
        .iter()
        .all(|decision| matches!(decision, PermissionDecision::Allow { .. })));
}

#[tokio::test]
async fn abort_frame_releases_a_waiting_permission_prompt() {
    let mut stack = build_stack(
        vec![result_event("never reached", "sess-1")],
        Some(("Write".to_string(), json!({ "file_path": "/tmp/out" }))),
        Duration::from_secs(30),
    );
    let mut chat = ChatStore::new("conv-1");

    let send = chat.begin_send("req-1", "write it", PermissionMode::Default);
    stack
        .service
        .handle_raw_frame(&send.to_string())
        .await
        .expect("send frame");

    // The abort must land while the gate is parked on the human response.
    for _ in 0..200 {
        if stack.delegation.pending_count().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(stack.delegation.pending_count().await, 1);

    let abort = chat.build_abort_frame("req-abort").expect("active turn");
    stack
        .service
        .handle_raw_frame(&abort.to_string())
        .await
        .expect("abort frame");

    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = stack.frames.recv().await {
            chat.apply_event_frame(&frame);
            if frame.kind == "aborted" {
                break;
            }
        }
    })
    .await
    .expect("aborted frame before timeout");

    assert!(!chat.is_streaming());
    assert_eq!(stack.delegation.pending_count().await, 0);
    assert!(chat
        .messages()
        .iter()
        .any(|message| message.kind == ProcessedMessageKind::Abort));
}
