use std::io;
use thiserror::Error;

/// Outcome of a failed name resolution.
///
/// Protocol violations are folded into the synthesized variants below; raw
/// transport failures keep their `io::ErrorKind`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Host unreachable: query could not be built")]
    HostUnreachable,

    #[error("Connection refused: bad response framing or TLS failure")]
    ConnectionRefused,

    #[error("Operation not supported: bad DoT framing")]
    OperationNotSupported,

    #[error("Resolve timed out")]
    TimedOut,

    #[error("Host not found")]
    HostNotFound,

    #[error("Resolve cancelled")]
    Cancelled,

    #[error("A resolve is already in progress")]
    ResolveInProgress,

    #[error("Invalid resolver URL: {0}")]
    InvalidUrl(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl ResolveError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResolveError::TimedOut)
    }
}

impl From<io::Error> for ResolveError {
    fn from(e: io::Error) -> Self {
        ResolveError::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("All listen slots are already in use")]
    AlreadyStarted,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}
