//! The crate-wide error enum for `wire-engine`, aggregating the
//! resolver's own error with whatever the model/netlink layers below it
//! surface unchanged (per §7, "ParseError / ValidationError ... upstream
//! from collaborators, surfaced unchanged").

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Model(#[from] wire_model::ModelError),

    #[error(transparent)]
    Channel(#[from] wire_netlink::ChannelError),

    #[error(transparent)]
    Resolve(#[from] crate::resolve::ResolveError),
}
