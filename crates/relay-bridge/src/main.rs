mod bootstrap_helpers;
mod bridge_loop;
mod cli_args;
mod subprocess_runtime;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::bridge_loop::{run_bridge, run_reset, run_stats};
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if cli.stats {
        return run_stats(&cli);
    }
    if let Some(conversation_id) = cli.reset.clone() {
        return run_reset(&cli, &conversation_id);
    }
    run_bridge(&cli).await
}
