//! Supervisor (component J): the long-running process. Owns the kernel
//! channel, the shared live-state handle, the IPC endpoint, the config
//! file watch, and the history collaborator, and drives the single
//! cooperative event loop.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use wire_engine::{diff, reconcile, ReconcilePolicy};
use wire_model::command::Command;
use wire_model::state::NetworkState;
use wire_netlink::channel::Group;
use wire_netlink::Channel;

use crate::config::{self, DEFAULT_CONFIG_PATH};
use crate::error::DaemonError;
use crate::filewatch::Watcher;
use crate::history::{History, DEFAULT_MAX_SNAPSHOTS, DEFAULT_SNAPSHOT_DIR};
use crate::ipc::{self, RequestKind, Response, ResponseKind};

pub const DEFAULT_PID_PATH: &str = "/run/wire.pid";

/// The reason a reconciliation ran, recorded alongside each applied
/// change and failure per the trigger taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    User,
    Event,
    Periodic,
    ConfigReload,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::User => "user",
            Trigger::Event => "event",
            Trigger::Periodic => "periodic",
            Trigger::ConfigReload => "config-reload",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    pub config_path: PathBuf,
    pub pid_path: PathBuf,
    pub socket_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub max_snapshots: usize,
    pub reconcile_interval: Duration,
    pub snapshot_interval: Duration,
    pub dry_run: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            pid_path: PathBuf::from(DEFAULT_PID_PATH),
            socket_path: PathBuf::from(ipc::DEFAULT_SOCKET_PATH),
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            reconcile_interval: Duration::from_secs(30),
            snapshot_interval: Duration::from_secs(60),
            dry_run: false,
        }
    }
}

#[derive(Default)]
struct Counters {
    reconciliations: u64,
    changes_applied: u64,
    changes_failed: u64,
}

/// Guards the PID file for the process lifetime; removed on drop so every
/// exit path (including an early error return) releases it.
struct PidGuard(PathBuf);

impl PidGuard {
    fn acquire(path: &std::path::Path) -> Result<Self, DaemonError> {
        if let Ok(existing) = std::fs::read_to_string(path) {
            if let Ok(pid) = existing.trim().parse::<i32>() {
                if process_alive(pid) {
                    return Err(DaemonError::AlreadyRunning(pid));
                }
            }
        }
        std::fs::write(path, format!("{}\n", std::process::id()))?;
        Ok(Self(path.to_path_buf()))
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

pub struct Supervisor {
    options: SupervisorOptions,
    chan: Channel,
    commands: Vec<Command>,
    desired: NetworkState,
    live: Arc<RwLock<NetworkState>>,
    history: History,
    watcher: Watcher,
    listener: tokio::net::UnixListener,
    pid_guard: PidGuard,
    counters: Counters,
    last_periodic: Instant,
    last_snapshot: Instant,
    stop_requested: Arc<AtomicBool>,
}

impl Supervisor {
    pub async fn start(options: SupervisorOptions) -> Result<Self, DaemonError> {
        let pid_guard = PidGuard::acquire(&options.pid_path)?;

        let commands = config::load(&options.config_path)?;
        let chan = Channel::open(HashSet::from([
            Group::Link,
            Group::Ipv4Addr,
            Group::Ipv6Addr,
            Group::Ipv4Route,
            Group::Ipv6Route,
        ]))?;

        let live_state = wire_model::query::query_live(&chan).await?;
        let desired = wire_model::desired::build_desired(&commands, &live_state)?;

        let listener = ipc::bind(&options.socket_path)?;
        let watcher = Watcher::new(&options.config_path)
            .map_err(|e| DaemonError::Io(std::io::Error::other(e)))?;
        let history = History::new(options.snapshot_dir.clone(), options.max_snapshots);
        history.ensure_dir()?;
        history.snapshot(&live_state, unix_now())?;

        Ok(Self {
            options,
            chan,
            commands,
            desired,
            live: Arc::new(RwLock::new(live_state)),
            history,
            watcher,
            listener,
            pid_guard,
            counters: Counters::default(),
            last_periodic: Instant::now(),
            last_snapshot: Instant::now(),
            stop_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs the single cooperative event loop until a stop request or
    /// signal is observed.
    pub async fn run(mut self) -> Result<(), DaemonError> {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

        loop {
            tokio::select! {
                biased;
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            }

            if self.stop_requested.load(Ordering::SeqCst) {
                info!("stop request observed, shutting down");
                break;
            }

            let drained = self
                .chan
                .poll(Duration::from_millis(100), 64, |_event| {})
                .await;
            if drained > 0 {
                self.reconcile_once(Trigger::Event).await;
            }

            if let Err(e) = self.service_one_ipc_request().await {
                warn!("IPC request handling failed: {e}");
            }

            if self.watcher.poll() && self.reload_config().await {
                self.reconcile_once(Trigger::ConfigReload).await;
            }

            if self.last_periodic.elapsed() >= self.options.reconcile_interval {
                self.reconcile_once(Trigger::Periodic).await;
            }
        }

        Ok(())
    }

    /// Re-parses the config file and rebuilds `desired` against the
    /// last-known live state. Returns whether the reload succeeded.
    async fn reload_config(&mut self) -> bool {
        let commands = match config::load(&self.options.config_path) {
            Ok(commands) => commands,
            Err(e) => {
                error!("config reload failed: {e}");
                return false;
            }
        };
        let live_snapshot = self.live.read().await.clone();
        match wire_model::desired::build_desired(&commands, &live_snapshot) {
            Ok(desired) => {
                self.commands = commands;
                self.desired = desired;
                true
            }
            Err(e) => {
                error!("config reload produced an invalid desired state: {e}");
                false
            }
        }
    }

    async fn reconcile_once(&mut self, trigger: Trigger) {
        self.last_periodic = Instant::now();
        self.counters.reconciliations += 1;

        let live_state = match wire_model::query::query_live(&self.chan).await {
            Ok(s) => s,
            Err(e) => {
                error!(trigger = trigger.as_str(), "live query failed: {e}");
                return;
            }
        };

        let changes = diff(&live_state, &self.desired, Default::default());
        *self.live.write().await = live_state.clone();

        if changes.is_empty() {
            return;
        }
        if self.options.dry_run {
            info!(trigger = trigger.as_str(), count = changes.len(), "dry-run: changes pending, not applied");
            return;
        }

        let ordered = match wire_engine::resolve(changes) {
            Ok(ordered) => ordered,
            Err(e) => {
                error!(trigger = trigger.as_str(), "failed to order changes: {e}");
                return;
            }
        };

        let policy = ReconcilePolicy::default();
        let stats = reconcile(&self.chan, &self.desired, ordered, &policy).await;
        for result in &stats.results {
            if result.success {
                info!(trigger = trigger.as_str(), change = ?result.change, "applied");
            } else {
                error!(trigger = trigger.as_str(), change = ?result.change, error = ?result.error, "failed to apply");
            }
        }
        self.counters.changes_applied += stats.applied as u64;
        self.counters.changes_failed += stats.failed as u64;

        if let Ok(fresh) = wire_model::query::query_live(&self.chan).await {
            *self.live.write().await = fresh;
        }

        if stats.applied > 0 && self.last_snapshot.elapsed() >= self.options.snapshot_interval {
            let live_snapshot = self.live.read().await.clone();
            if let Err(e) = self.history.snapshot(&live_snapshot, unix_now()) {
                warn!("failed to write snapshot: {e}");
            }
            self.last_snapshot = Instant::now();
        }
    }

    async fn service_one_ipc_request(&mut self) -> Result<(), DaemonError> {
        let (mut stream, _addr) = match self.listener.accept().now_or_never() {
            Some(Ok(pair)) => pair,
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(()),
        };

        let request = match ipc::accept_request(&mut stream).await {
            Ok(r) => r,
            Err(e) => {
                let _ = ipc::respond(&mut stream, Response::error(format!("{e}"))).await;
                return Ok(());
            }
        };

        let response = match request.kind {
            RequestKind::Status => {
                let body = StatusBody {
                    reconciliations: self.counters.reconciliations,
                    changes_applied: self.counters.changes_applied,
                    changes_failed: self.counters.changes_failed,
                };
                json_response(ResponseKind::Status, &body)
            }
            RequestKind::State => {
                let live = self.live.read().await;
                let body = StateBody {
                    interfaces: live.interfaces.len(),
                    addresses: live.addresses.len(),
                    routes: live.routes.len(),
                    bonds: live.bonds.len(),
                    bridges: live.bridges.len(),
                    vlans: live.vlans.len(),
                    veths: live.veths.len(),
                };
                json_response(ResponseKind::State, &body)
            }
            RequestKind::Diff => {
                let live = self.live.read().await;
                let changes = diff(&live, &self.desired, Default::default());
                let body = DiffBody { pending: changes.len(), changes: changes.iter().map(|c| format!("{c:?}")).collect() };
                json_response(ResponseKind::Diff, &body)
            }
            RequestKind::Reload => {
                let reloaded = self.reload_config().await;
                self.reconcile_once(Trigger::User).await;
                if reloaded {
                    Response::new(ResponseKind::Reload, b"config reloaded and reconciled".to_vec())
                } else {
                    Response::new(ResponseKind::Reload, b"reconciled with existing config".to_vec())
                }
            }
            RequestKind::Stop => {
                self.stop_requested.store(true, Ordering::SeqCst);
                Response::new(ResponseKind::Stop, b"stopping".to_vec())
            }
        };

        ipc::respond(&mut stream, response).await?;
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[derive(serde::Serialize)]
struct StatusBody {
    reconciliations: u64,
    changes_applied: u64,
    changes_failed: u64,
}

#[derive(serde::Serialize)]
struct StateBody {
    interfaces: usize,
    addresses: usize,
    routes: usize,
    bonds: usize,
    bridges: usize,
    vlans: usize,
    veths: usize,
}

#[derive(serde::Serialize)]
struct DiffBody {
    pending: usize,
    changes: Vec<String>,
}

fn json_response(kind: ResponseKind, body: &impl serde::Serialize) -> Response {
    match serde_json::to_vec(body) {
        Ok(payload) => Response::new(kind, payload),
        Err(e) => Response::error(format!("failed to encode response: {e}")),
    }
}
