use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};

use wire_daemon::config;
use wire_daemon::ipc::{self, Request, RequestKind, ResponseKind};
use wire_engine::{diff, reconcile, resolve, validate, ReconcilePolicy, Severity, ValidationReport};
use wire_netlink::channel::Group;
use wire_netlink::Channel;

fn open_channel() -> Result<Channel> {
    Channel::open(HashSet::from([
        Group::Link,
        Group::Ipv4Addr,
        Group::Ipv6Addr,
        Group::Ipv4Route,
        Group::Ipv6Route,
    ]))
    .context("opening kernel channel")
}

pub async fn cmd_apply(config_path: &Path, yes: bool, dry_run: bool) -> Result<ExitCode> {
    let commands = config::load(config_path).context("loading config")?;
    let chan = open_channel()?;
    let live = wire_model::query::query_live(&chan).await.context("querying live state")?;

    let report = validate(&commands, &live);
    print_report(&report);
    if report.has_errors() {
        error!("validation failed, aborting before any kernel call");
        return Ok(ExitCode::from(1));
    }
    if report.warnings > 0 && !yes && !confirm("apply despite the warnings above?")? {
        info!("apply cancelled");
        return Ok(ExitCode::from(1));
    }

    let desired = wire_model::desired::build_desired(&commands, &live).context("building desired state")?;
    let changes = diff(&live, &desired, Default::default());
    if changes.is_empty() {
        println!("already converged, nothing to do");
        return Ok(ExitCode::from(0));
    }

    let ordered = resolve(changes).context("ordering changes")?;
    let policy = ReconcilePolicy { dry_run, ..Default::default() };
    let stats = reconcile(&chan, &desired, ordered, &policy).await;

    println!(
        "{} applied, {} failed, {} skipped (of {})",
        stats.applied, stats.failed, stats.skipped, stats.total
    );
    for result in &stats.results {
        if !result.success {
            eprintln!("  failed: {:?}: {}", result.change, result.error.as_deref().unwrap_or("unknown error"));
        }
    }

    if stats.failed > 0 {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::from(0))
    }
}

pub async fn cmd_validate(config_path: &Path) -> Result<ExitCode> {
    let commands = config::load(config_path).context("loading config")?;
    let chan = open_channel()?;
    let live = wire_model::query::query_live(&chan).await.context("querying live state")?;

    let report = validate(&commands, &live);
    print_report(&report);
    if report.has_errors() {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::from(0))
    }
}

pub async fn cmd_diff(config_path: &Path) -> Result<ExitCode> {
    let commands = config::load(config_path).context("loading config")?;
    let chan = open_channel()?;
    let live = wire_model::query::query_live(&chan).await.context("querying live state")?;
    let desired = wire_model::desired::build_desired(&commands, &live).context("building desired state")?;

    let changes = diff(&live, &desired, Default::default());
    if changes.is_empty() {
        println!("already converged");
    } else {
        for change in &changes {
            println!("{change:?}");
        }
    }
    Ok(ExitCode::from(0))
}

pub async fn cmd_status(socket: &Path) -> Result<ExitCode> {
    call_and_print(socket, RequestKind::Status).await
}

pub async fn cmd_reload(socket: &Path) -> Result<ExitCode> {
    call_and_print(socket, RequestKind::Reload).await
}

pub async fn cmd_stop(socket: &Path) -> Result<ExitCode> {
    call_and_print(socket, RequestKind::Stop).await
}

async fn call_and_print(socket: &Path, kind: RequestKind) -> Result<ExitCode> {
    match ipc::call(socket, Request::new(kind)).await {
        Ok(response) => {
            if response.kind == ResponseKind::Error {
                eprintln!("supervisor error: {}", String::from_utf8_lossy(&response.payload));
                return Ok(ExitCode::from(2));
            }
            match serde_json::from_slice::<serde_json::Value>(&response.payload) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{}", String::from_utf8_lossy(&response.payload)),
            }
            Ok(ExitCode::from(0))
        }
        Err(e) => {
            eprintln!("could not reach supervisor at {}: {e}", socket.display());
            Ok(ExitCode::from(2))
        }
    }
}

fn print_report(report: &ValidationReport) {
    for issue in &report.items {
        let label = match issue.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        println!("{label}: {}", issue.formatted_message);
        if let Some(suggestion) = &issue.suggestion {
            println!("  suggestion: {suggestion}");
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}
