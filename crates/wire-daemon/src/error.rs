//! The crate-wide error enum for `wire-daemon`, aggregating the
//! supervisor's own collaborators (config, IPC, history) and the layers
//! below it, the way `netns-testbench::TestbenchError` aggregates its
//! own per-module errors.

use thiserror::Error;

use crate::config::ConfigError;
use crate::ipc::IpcError;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Model(#[from] wire_model::ModelError),

    #[error(transparent)]
    Channel(#[from] wire_netlink::ChannelError),

    #[error(transparent)]
    Engine(#[from] wire_engine::EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(i32),
}
