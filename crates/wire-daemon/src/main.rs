use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wire_daemon::supervisor::{Supervisor, SupervisorOptions};

/// wire-daemon: the long-running supervisor for a declared network fabric.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the declarative config file (default: /etc/wire/network.conf).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the PID file (default: /run/wire.pid).
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Path to the IPC Unix domain socket (default: /run/wire.sock).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Seconds between periodic reconciliations.
    #[arg(long, default_value_t = 30)]
    reconcile_interval: u64,

    /// Compute and log changes without applying them.
    #[arg(long)]
    dry_run: bool,

    /// Emit debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let defaults = SupervisorOptions::default();
    let options = SupervisorOptions {
        config_path: cli.config.unwrap_or(defaults.config_path),
        pid_path: cli.pid_file.unwrap_or(defaults.pid_path),
        socket_path: cli.socket.unwrap_or(defaults.socket_path),
        reconcile_interval: Duration::from_secs(cli.reconcile_interval),
        dry_run: cli.dry_run,
        ..defaults
    };

    let supervisor = Supervisor::start(options).await?;
    supervisor.run().await?;
    Ok(())
}
