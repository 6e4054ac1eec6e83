use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Channel(#[from] wire_netlink::ChannelError),

    #[error("{subject} references unknown interface {name:?}")]
    UnknownReference { subject: String, name: String },

    #[error("invalid value {value:?} for attribute {attr:?}")]
    InvalidAttribute { attr: String, value: String },

    #[error("parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },
}
