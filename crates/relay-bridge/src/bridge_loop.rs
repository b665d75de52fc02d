//! Process wiring: builds the bridge stack and runs the stdio frame loop
//! until EOF or a shutdown signal.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use relay_decision::{
    AllowlistStrategy, DecisionEngine, DecisionStrategy, DenylistStrategy, JsonlPromptStore,
    PromptStore, UserDelegationStrategy,
};
use relay_runtime::{
    BridgeService, ChannelTransport, PermissionGate, SessionController, Transport,
    TransportPromptNotifier,
};
use relay_session::{ConversationStore, JsonlConversationStore, SessionManager};
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::cli_args::Cli;
use crate::subprocess_runtime::{SubprocessAgentRuntime, SubprocessRuntimeConfig};

const PROMPTS_FILE: &str = "prompts.jsonl";
const CONVERSATIONS_FILE: &str = "conversations.jsonl";

struct BridgeStack {
    service: Arc<BridgeService>,
    sessions: Arc<SessionManager>,
    prompt_store: Arc<dyn PromptStore>,
    frames: tokio::sync::mpsc::UnboundedReceiver<relay_protocol::BridgeEventFrame>,
}

fn build_stack(cli: &Cli) -> Result<BridgeStack> {
    std::fs::create_dir_all(&cli.state_dir).with_context(|| {
        format!(
            "failed to create state directory {}",
            cli.state_dir.display()
        )
    })?;

    let (channel_transport, frames) = ChannelTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(channel_transport);

    let prompt_store: Arc<dyn PromptStore> =
        Arc::new(JsonlPromptStore::load(cli.state_dir.join(PROMPTS_FILE))?);
    let conversation_store: Arc<dyn ConversationStore> = Arc::new(JsonlConversationStore::load(
        cli.state_dir.join(CONVERSATIONS_FILE),
    )?);

    let notifier = Arc::new(TransportPromptNotifier::new(Arc::clone(&transport)));
    let delegation = Arc::new(UserDelegationStrategy::with_timeout(
        notifier,
        Duration::from_secs(cli.delegation_timeout_secs),
    ));
    let strategies: Vec<Arc<dyn DecisionStrategy>> = vec![
        Arc::new(AllowlistStrategy),
        Arc::new(DenylistStrategy),
        Arc::clone(&delegation) as Arc<dyn DecisionStrategy>,
    ];
    let engine = Arc::new(
        DecisionEngine::new(Arc::clone(&prompt_store), strategies)
            .with_prompt_timeout_ms(cli.prompt_timeout_ms),
    );
    let sessions = Arc::new(SessionManager::new(conversation_store));
    let gate = Arc::new(PermissionGate::new(
        Arc::clone(&engine),
        delegation,
        Arc::clone(&sessions),
    ));

    let runtime = Arc::new(SubprocessAgentRuntime::new(SubprocessRuntimeConfig {
        command: cli.agent_command.clone(),
        args: cli.agent_args.clone(),
        env: Default::default(),
        workdir: cli.workdir.clone(),
    }));
    let mut controller = SessionController::new(
        runtime,
        Arc::clone(&transport),
        Arc::clone(&sessions),
        gate,
    )
    .with_allowed_tools(cli.allowed_tools.clone());
    if let Some(workdir) = &cli.workdir {
        controller = controller.with_workdir(workdir.clone());
    }
    let service = Arc::new(BridgeService::new(
        Arc::new(controller),
        Arc::clone(&transport),
        engine,
    ));

    Ok(BridgeStack {
        service,
        sessions,
        prompt_store,
        frames,
    })
}

/// Prints store statistics as one JSON object.
pub fn run_stats(cli: &Cli) -> Result<()> {
    let stack = build_stack(cli)?;
    let prompt_stats = stack.prompt_store.stats()?;
    let stats = json!({
        "conversations": stack.sessions.store().session_count()?,
        "prompts": prompt_stats,
    });
    println!("{stats}");
    Ok(())
}

/// Drops one conversation's continuity state and grants.
pub fn run_reset(cli: &Cli, conversation_id: &str) -> Result<()> {
    let stack = build_stack(cli)?;
    let removed = stack.sessions.reset_conversation(conversation_id)?;
    println!(
        "{}",
        json!({ "conversation_id": conversation_id, "removed": removed })
    );
    Ok(())
}

/// Runs the bridge: inbound frames on stdin, outbound frames on stdout,
/// one JSON object per line. Exits cleanly on EOF, SIGINT, or SIGTERM.
pub async fn run_bridge(cli: &Cli) -> Result<()> {
    let stack = build_stack(cli)?;
    let service = stack.service;

    let mut frames = stack.frames;
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            match serde_json::to_string(&frame) {
                Ok(line) => println!("{line}"),
                Err(error) => warn!(%error, "failed to serialize outbound frame"),
            }
        }
    });

    let sweeper = {
        let service = Arc::clone(&service);
        let sweep_interval = Duration::from_secs(cli.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match service.sweep_expired_prompts() {
                    Ok(swept) if !swept.is_empty() => {
                        info!(count = swept.len(), "auto-resolved expired prompts");
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "timeout sweep failed"),
                }
            }
        })
    };

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    info!(state_dir = %cli.state_dir.display(), "bridge ready");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = sigterm.recv() => {
                info!("termination requested");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(raw)) => {
                    let trimmed = raw.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Err(error) = service.handle_raw_frame(trimmed).await {
                        warn!(%error, "frame dispatch failed");
                    }
                }
                Ok(None) => {
                    info!("input closed");
                    break;
                }
                Err(error) => {
                    warn!(%error, "stdin read failed");
                    break;
                }
            },
        }
    }

    sweeper.abort();
    writer.abort();
    Ok(())
}
