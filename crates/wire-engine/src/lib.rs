//! Diff, dependency resolution, reconciliation, and pre-apply validation:
//! the layer that turns a live/desired pair of `wire-model::NetworkState`s
//! into kernel calls through `wire-netlink`.

pub mod diff;
pub mod error;
pub mod reconcile;
pub mod resolve;
pub mod validate;

pub use diff::{diff, Change, DiffOptions};
pub use error::EngineError;
pub use reconcile::{reconcile, ReconcilePolicy, ReconcileResult, ReconcileStats};
pub use resolve::{resolve, ResolveError};
pub use validate::{validate, Issue, IssueCode, Severity, ValidationReport};
