use std::path::PathBuf;

use clap::Parser;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "relay-bridge",
    about = "Streams an agent's tool-using session to clients with a human-in-the-loop permission gate",
    version
)]
/// Public struct `Cli` used across Relay components.
pub struct Cli {
    #[arg(
        long,
        env = "RELAY_STATE_DIR",
        default_value = ".relay",
        help = "Directory holding the prompt audit trail and conversation records."
    )]
    pub state_dir: PathBuf,

    #[arg(
        long,
        env = "RELAY_AGENT_COMMAND",
        default_value = "claude",
        help = "Agent runtime executable spawned per turn."
    )]
    pub agent_command: String,

    #[arg(
        long = "agent-arg",
        env = "RELAY_AGENT_ARGS",
        value_delimiter = ',',
        help = "Extra arguments passed to the agent runtime executable."
    )]
    pub agent_args: Vec<String>,

    #[arg(
        long,
        env = "RELAY_WORKDIR",
        help = "Working directory handed to the agent runtime."
    )]
    pub workdir: Option<PathBuf>,

    #[arg(
        long = "allowed-tool",
        env = "RELAY_ALLOWED_TOOLS",
        value_delimiter = ',',
        help = "Tool allowlist forwarded to the agent runtime. Empty means all tools."
    )]
    pub allowed_tools: Vec<String>,

    #[arg(
        long,
        env = "RELAY_DELEGATION_TIMEOUT_SECS",
        default_value = "300",
        value_parser = parse_positive_u64,
        help = "Seconds to wait for a human permission response before leaving the prompt pending."
    )]
    pub delegation_timeout_secs: u64,

    #[arg(
        long,
        env = "RELAY_PROMPT_TIMEOUT_MS",
        default_value = "600000",
        value_parser = parse_positive_u64,
        help = "Sweep window in milliseconds after which unresolved prompts auto-select a default."
    )]
    pub prompt_timeout_ms: u64,

    #[arg(
        long,
        env = "RELAY_SWEEP_INTERVAL_SECS",
        default_value = "600",
        value_parser = parse_positive_u64,
        help = "Interval in seconds between timeout sweeps over pending prompts."
    )]
    pub sweep_interval_secs: u64,

    #[arg(long, help = "Print store statistics as JSON and exit.")]
    pub stats: bool,

    #[arg(
        long,
        value_name = "CONVERSATION_ID",
        help = "Reset one conversation (drops continuity and grants) and exit."
    )]
    pub reset: Option<String>,
}
