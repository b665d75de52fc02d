//! Streaming session engine: drives one agent invocation end-to-end with a
//! human-in-the-loop permission gate interposed over every tool call.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use thiserror::Error;

mod agent_runtime;
mod bridge_service;
mod permission_gate;
mod registries;
mod session_controller;
#[cfg(test)]
mod tests;
mod transport;

pub use agent_runtime::{AgentEventStream, AgentRuntime, RuntimeOptions};
pub use bridge_service::BridgeService;
pub use permission_gate::{
    classify_tool_risk, PermissionDecision, PermissionGate, RiskLevel, ToolCallContext,
    SAFE_TOOLS,
};
pub use registries::CancellationRegistry;
pub use session_controller::{SessionController, StreamRequest, TurnReport, TurnState};
pub use transport::{ChannelTransport, Transport, TransportPromptNotifier};

/// Enumerates supported `RuntimeError` values.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("agent runtime failed: {0}")]
    Agent(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Cooperative cancellation handle for one in-flight turn.
///
/// Cancellation is idempotent; waiters are woken exactly once.
#[derive(Debug, Clone, Default)]
pub struct TurnCancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl TurnCancellationToken {
    /// Creates a new, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token as cancelled and wakes pending waiters.
    pub fn cancel(&self) {
        let already_cancelled = self.cancelled.swap(true, Ordering::SeqCst);
        if !already_cancelled {
            self.notify.notify_waiters();
        }
    }

    /// Returns true when cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}
