//! Seam to the underlying assistant runtime: an opaque generator of typed
//! events given a prompt and options.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use relay_messages::AgentEvent;
use relay_protocol::PermissionMode;
use relay_session::{CompactionRequest, SessionContinuity};

use crate::{PermissionGate, RuntimeError};

/// Events for one invocation arrive in emission order; the channel closes
/// when the run ends.
pub type AgentEventStream = tokio::sync::mpsc::Receiver<Result<AgentEvent, RuntimeError>>;

/// Options assembled by the controller for one invocation.
#[derive(Clone)]
pub struct RuntimeOptions {
    pub conversation_id: String,
    pub request_id: String,
    pub continuity: SessionContinuity,
    pub permission_mode: PermissionMode,
    pub allowed_tools: Vec<String>,
    pub workdir: Option<PathBuf>,
    /// Consulted by the runtime before every tool call.
    pub gate: Arc<PermissionGate>,
}

/// Trait contract for `AgentRuntime` behavior.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Starts one invocation and returns its event stream.
    async fn start(
        &self,
        prompt: String,
        options: RuntimeOptions,
    ) -> Result<AgentEventStream, RuntimeError>;

    /// Issues a summarize-and-retain instruction against an existing
    /// session. Best effort; the runtime decides what survives.
    async fn compact(&self, request: &CompactionRequest) -> Result<(), RuntimeError>;
}
