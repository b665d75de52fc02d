//! Inbound frame dispatch: parses client frames and routes them to the
//! controller, the permission gate, or the abort path.

use std::sync::Arc;

use anyhow::Result;
use relay_core::current_unix_timestamp_ms;
use relay_decision::{DecisionEngine, SweptPrompt};
use relay_protocol::{
    best_effort_bridge_request_id, build_bridge_error_frame, classify_bridge_parse_error,
    parse_abort_message_payload, parse_bridge_request_frame, parse_permission_respond_payload,
    parse_send_message_payload, BridgeRequestFrame, BridgeRequestKind,
};
use tracing::{debug, info, warn};

use crate::{SessionController, StreamRequest, Transport};

/// Public struct `BridgeService` used across Relay components.
///
/// One service instance supervises all conversations on a connection;
/// each `message.send` runs as its own task so a suspended permission
/// wait never stalls other turns.
pub struct BridgeService {
    controller: Arc<SessionController>,
    transport: Arc<dyn Transport>,
    engine: Arc<DecisionEngine>,
}

impl BridgeService {
    pub fn new(
        controller: Arc<SessionController>,
        transport: Arc<dyn Transport>,
        engine: Arc<DecisionEngine>,
    ) -> Self {
        Self {
            controller,
            transport,
            engine,
        }
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Parses and dispatches one raw inbound frame.
    ///
    /// Malformed frames never propagate as errors: they surface to the
    /// client as `error` frames with a stable code.
    pub async fn handle_raw_frame(&self, raw: &str) -> Result<()> {
        let frame = match parse_bridge_request_frame(raw) {
            Ok(frame) => frame,
            Err(error) => {
                let message = error.to_string();
                return self.reject(raw, &message).await;
            }
        };
        match frame.kind {
            BridgeRequestKind::SendMessage => self.handle_send(&frame).await,
            BridgeRequestKind::AbortMessage => self.handle_abort(&frame).await,
            BridgeRequestKind::PermissionRespond => self.handle_permission_respond(&frame).await,
        }
    }

    async fn handle_send(&self, frame: &BridgeRequestFrame) -> Result<()> {
        let payload = match parse_send_message_payload(&frame.payload) {
            Ok(payload) => payload,
            Err(error) => {
                return self
                    .reject_frame(&frame.request_id, &error.to_string())
                    .await;
            }
        };
        let request = StreamRequest {
            request_id: frame.request_id.clone(),
            conversation_id: payload.conversation_id,
            content: payload.content,
            attachments: payload.attachments,
            session_id_override: payload.session_id_override,
            permission_mode: payload.permission_mode,
        };
        info!(
            request_id = %request.request_id,
            conversation_id = %request.conversation_id,
            "turn started"
        );
        let controller = Arc::clone(&self.controller);
        tokio::spawn(async move {
            let request_id = request.request_id.clone();
            if let Err(error) = controller.run_turn(request).await {
                warn!(%request_id, %error, "turn failed with a transport error");
            }
        });
        Ok(())
    }

    async fn handle_abort(&self, frame: &BridgeRequestFrame) -> Result<()> {
        let payload = match parse_abort_message_payload(&frame.payload) {
            Ok(payload) => payload,
            Err(error) => {
                return self
                    .reject_frame(&frame.request_id, &error.to_string())
                    .await;
            }
        };
        let cancelled = self.controller.abort(&payload.target_request_id);
        debug!(
            target = %payload.target_request_id,
            cancelled,
            "abort requested"
        );
        Ok(())
    }

    async fn handle_permission_respond(&self, frame: &BridgeRequestFrame) -> Result<()> {
        let payload = match parse_permission_respond_payload(&frame.payload) {
            Ok(payload) => payload,
            Err(error) => {
                return self
                    .reject_frame(&frame.request_id, &error.to_string())
                    .await;
            }
        };
        let settled = self
            .controller
            .gate()
            .respond(&payload.prompt_id, &payload.option_id)
            .await?;
        if !settled {
            debug!(
                prompt_id = %payload.prompt_id,
                "response referenced an unknown or already-terminal prompt"
            );
        }
        Ok(())
    }

    /// Closes prompts nobody resolved within their window. Intended to be
    /// driven on a fixed interval by the process supervisor.
    pub fn sweep_expired_prompts(&self) -> Result<Vec<SweptPrompt>> {
        self.engine.sweep_timeouts(current_unix_timestamp_ms())
    }

    async fn reject(&self, raw: &str, message: &str) -> Result<()> {
        let request_id = best_effort_bridge_request_id(raw).unwrap_or_default();
        self.reject_frame(&request_id, message).await
    }

    async fn reject_frame(&self, request_id: &str, message: &str) -> Result<()> {
        let code = classify_bridge_parse_error(message);
        warn!(request_id, code, message, "rejected inbound frame");
        self.transport
            .emit(build_bridge_error_frame(request_id, code, message))
            .await
    }
}
