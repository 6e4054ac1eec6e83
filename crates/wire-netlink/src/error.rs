//! The closed error-kind enumeration shared by the channel and every
//! typed-object module, plus the per-crate error type that wraps it.

use thiserror::Error;

/// POSIX error classification for a NACK, mapped from `abs(nlmsgerr.error)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    Busy,
    Denied,
    InvalidArgument,
    MessageTooBig,
    Other(i32),
}

impl ErrorKind {
    pub fn from_errno(code: i32) -> Self {
        match code.unsigned_abs() as i32 {
            17 => ErrorKind::AlreadyExists,
            2 | 19 => ErrorKind::NotFound,
            16 => ErrorKind::Busy,
            1 | 13 => ErrorKind::Denied,
            22 => ErrorKind::InvalidArgument,
            90 => ErrorKind::MessageTooBig,
            other => ErrorKind::Other(other),
        }
    }

    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Busy | ErrorKind::MessageTooBig)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::AlreadyExists => write!(f, "already exists"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Busy => write!(f, "busy"),
            ErrorKind::Denied => write!(f, "permission denied (CAP_NET_ADMIN required)"),
            ErrorKind::InvalidArgument => write!(f, "invalid argument"),
            ErrorKind::MessageTooBig => write!(f, "message too big"),
            ErrorKind::Other(code) => write!(f, "kernel error {code}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("I/O error opening netlink socket: {0}")]
    Open(std::io::Error),

    #[error("I/O error on netlink socket: {0}")]
    Io(std::io::Error),

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("request failed: {kind}")]
    Request {
        kind: ErrorKind,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("message build error: {0}")]
    Build(#[from] crate::message::BuildError),

    #[error("mismatched sequence in reply (expected {expected}, got {got})")]
    SequenceMismatch { expected: u32, got: u32 },
}

impl ChannelError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ChannelError::Request { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
