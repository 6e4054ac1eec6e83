//! Command-line driver for `wire`.
//!
//! Thin subcommands over the model/engine layers (`apply`, `validate`,
//! `diff`) and over the supervisor's IPC endpoint (`status`, `reload`,
//! `stop`), in the manner of `bench-cli`'s `Commands` enum and `cmd_*`
//! dispatch functions.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commands::{cmd_apply, cmd_diff, cmd_reload, cmd_status, cmd_stop, cmd_validate};
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the supervisor's IPC socket (default: /run/wire.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a config file, reconciling live state to match it
    Apply {
        config: PathBuf,

        /// Skip interactive confirmation of warnings
        #[arg(long)]
        yes: bool,

        /// Compute changes without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a config file against live state without applying it
    Validate { config: PathBuf },

    /// Show the changes a config file would make against live state
    Diff { config: PathBuf },

    /// Query a running supervisor's status
    Status,

    /// Ask a running supervisor to reconcile now
    Reload,

    /// Ask a running supervisor to stop
    Stop,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    let socket = cli.socket.unwrap_or_else(|| PathBuf::from(wire_daemon::ipc::DEFAULT_SOCKET_PATH));

    let result = match cli.command {
        Commands::Apply { config, yes, dry_run } => cmd_apply(&config, yes, dry_run).await,
        Commands::Validate { config } => cmd_validate(&config).await,
        Commands::Diff { config } => cmd_diff(&config).await,
        Commands::Status => cmd_status(&socket).await,
        Commands::Reload => cmd_reload(&socket).await,
        Commands::Stop => cmd_stop(&socket).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
