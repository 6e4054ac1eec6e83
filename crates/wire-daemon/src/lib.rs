//! Supervisor crate (component J and friends): config loading, the IPC
//! endpoint, snapshot history, config file watching, and the event loop
//! that ties them to `wire-engine` and `wire-netlink`.

pub mod config;
pub mod error;
pub mod filewatch;
pub mod history;
pub mod ipc;
pub mod supervisor;

pub use error::DaemonError;
pub use supervisor::{Supervisor, SupervisorOptions, Trigger};
