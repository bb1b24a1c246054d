//! Skillforge operator CLI entry point.
//!
//! Binary name: `skf`
//!
//! Parses CLI arguments, opens the checkpoint database, then dispatches to
//! the appropriate command handler.

mod cli;
mod state;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;
use skillforge_observe::tracing_setup::{TracingOptions, directive_for_verbosity, init_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _tracing = init_tracing(&TracingOptions {
        default_directive: directive_for_verbosity(cli.verbose, cli.quiet).to_string(),
        json: cli.log_json,
        enable_otel: cli.otel,
    })
    .context("failed to initialize logging")?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "skf", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    let result = match cli.command {
        Commands::List(args) => cli::checkpoint::list_checkpoints(&state, args, cli.json).await,
        Commands::Show { id } => cli::checkpoint::show_checkpoint(&state, &id, cli.json).await,
        Commands::Delete { id, execution } => {
            cli::checkpoint::delete_checkpoints(&state, id, execution, cli.json).await
        }
        Commands::Status => cli::status::status(&state, cli.json).await,
        Commands::Sweep(args) => cli::sweep::sweep(&state, args, cli.json).await,
        Commands::Completions { .. } => Ok(()),
    };

    state.close().await;
    result
}
