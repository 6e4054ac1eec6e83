//! Typed network state model: the entity records, the command grammar
//! E/G/I/the CLI match on, and the live/desired builders that produce a
//! [`state::NetworkState`].

pub mod command;
pub mod desired;
pub mod error;
pub mod query;
pub mod state;
pub mod types;

pub use command::{Action, Command, Subject};
pub use error::ModelError;
pub use state::NetworkState;
