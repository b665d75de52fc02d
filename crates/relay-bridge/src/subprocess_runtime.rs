//! Agent runtime backed by a subprocess speaking JSON lines on stdio.
//!
//! Each invocation spawns one child process: the prompt goes to stdin,
//! typed events come back one JSON object per stdout line. The child's
//! tool surface is constrained through environment variables; permission
//! mediation for its tool calls happens on the bridge side before frames
//! reach the client.

use std::{collections::BTreeMap, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use relay_messages::AgentEvent;
use relay_runtime::{AgentEventStream, AgentRuntime, RuntimeError, RuntimeOptions};
use relay_session::{CompactionRequest, SessionContinuity};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::{debug, warn};

/// Spawn configuration for the agent executable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubprocessRuntimeConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
}

/// Public struct `SubprocessAgentRuntime` used across Relay components.
pub struct SubprocessAgentRuntime {
    config: SubprocessRuntimeConfig,
}

impl SubprocessAgentRuntime {
    pub fn new(config: SubprocessRuntimeConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, options: Option<&RuntimeOptions>) -> Command {
        let mut command = Command::new(&self.config.command);
        command.args(&self.config.args);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::null());
        command.kill_on_drop(true);
        for (key, value) in &self.config.env {
            command.env(key, value);
        }
        if let Some(workdir) = &self.config.workdir {
            command.current_dir(workdir);
        }
        if let Some(options) = options {
            command.env("RELAY_CONVERSATION_ID", &options.conversation_id);
            command.env("RELAY_REQUEST_ID", &options.request_id);
            command.env("RELAY_PERMISSION_MODE", options.permission_mode.as_str());
            if !options.allowed_tools.is_empty() {
                command.env("RELAY_ALLOWED_TOOLS", options.allowed_tools.join(","));
            }
            if let Some(workdir) = &options.workdir {
                command.current_dir(workdir);
            }
            match &options.continuity {
                SessionContinuity::New => {}
                SessionContinuity::Resume { session_id } => {
                    command.env("RELAY_RESUME_SESSION_ID", session_id);
                }
                SessionContinuity::Continue => {
                    command.env("RELAY_CONTINUE_SESSION", "1");
                }
            }
        }
        command
    }
}

#[async_trait]
impl AgentRuntime for SubprocessAgentRuntime {
    async fn start(
        &self,
        prompt: String,
        options: RuntimeOptions,
    ) -> Result<AgentEventStream, RuntimeError> {
        let mut child = self
            .build_command(Some(&options))
            .spawn()
            .map_err(|error| RuntimeError::Agent(format!("failed to spawn agent: {error}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Agent("agent stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Agent("agent stdout unavailable".to_string()))?;

        stdin
            .write_all(prompt.as_bytes())
            .await
            .map_err(|error| RuntimeError::Agent(format!("failed to send prompt: {error}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|error| RuntimeError::Agent(format!("failed to send prompt: {error}")))?;
        drop(stdin);

        let (sender, receiver) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let outcome = match serde_json::from_str::<AgentEvent>(trimmed) {
                            Ok(event) => sender.send(Ok(event)).await,
                            Err(error) => {
                                debug!(%error, "skipping undecodable agent output line");
                                continue;
                            }
                        };
                        if outcome.is_err() {
                            // Receiver dropped: the turn was aborted.
                            let _ = child.kill().await;
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        let _ = sender
                            .send(Err(RuntimeError::Agent(format!(
                                "agent stdout read failed: {error}"
                            ))))
                            .await;
                        let _ = child.kill().await;
                        return;
                    }
                }
            }
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let _ = sender
                        .send(Err(RuntimeError::Agent(format!(
                            "agent exited with {status}"
                        ))))
                        .await;
                }
                Err(error) => {
                    let _ = sender
                        .send(Err(RuntimeError::Agent(format!(
                            "agent wait failed: {error}"
                        ))))
                        .await;
                }
            }
        });

        Ok(receiver)
    }

    async fn compact(&self, request: &CompactionRequest) -> Result<(), RuntimeError> {
        let mut command = self.build_command(None);
        command.env("RELAY_RESUME_SESSION_ID", &request.session_id);
        command.env("RELAY_CONVERSATION_ID", &request.conversation_id);
        let mut child = command
            .spawn()
            .map_err(|error| RuntimeError::Agent(format!("failed to spawn agent: {error}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            let mut payload = request.instruction.clone().into_bytes();
            payload.push(b'\n');
            stdin.write_all(&payload).await.map_err(|error| {
                RuntimeError::Agent(format!("failed to send compaction instruction: {error}"))
            })?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|error| RuntimeError::Agent(format!("agent wait failed: {error}")))?;
        if !output.status.success() {
            warn!(session_id = %request.session_id, status = %output.status, "compaction run failed");
            return Err(RuntimeError::Agent(format!(
                "compaction exited with {}",
                output.status
            )));
        }
        Ok(())
    }
}
