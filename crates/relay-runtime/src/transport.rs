//! Transport seam: a typed pub/sub channel owned by the bridge supervisor
//! and borrowed by every component that emits frames.

use anyhow::Result;
use async_trait::async_trait;
use relay_decision::{Prompt, PromptNotifier};
use relay_protocol::{build_bridge_event_frame, BridgeEventFrame};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Trait contract for `Transport` behavior.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn emit(&self, frame: BridgeEventFrame) -> Result<()>;
}

/// In-process transport backed by an unbounded channel; the receiving half
/// stands in for the connected client.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<BridgeEventFrame>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeEventFrame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn emit(&self, frame: BridgeEventFrame) -> Result<()> {
        debug!(kind = %frame.kind, request_id = %frame.request_id, "emit frame");
        self.sender
            .send(frame)
            .map_err(|_| anyhow::anyhow!("transport receiver dropped"))
    }
}

/// Pushes permission prompts to the connected client as
/// `permission.request` frames.
pub struct TransportPromptNotifier {
    transport: Arc<dyn Transport>,
}

impl TransportPromptNotifier {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PromptNotifier for TransportPromptNotifier {
    async fn notify(&self, prompt: &Prompt) -> Result<()> {
        let request_id = prompt.request_id.clone().unwrap_or_default();
        let payload = serde_json::json!({
            "prompt_id": prompt.id,
            "prompt": prompt,
        });
        self.transport
            .emit(build_bridge_event_frame(
                &request_id,
                "permission.request",
                payload,
            ))
            .await
    }
}
