//! Transport-level error type. Every queue-side error kind maps onto one of
//! these so a remote caller gets the closest transport-level code.

use core_common::ErrorKind;
use thiserror::Error;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors a repair-queue RPC call can surface to its caller.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested job or placement has nothing to return.
    #[error("not found")]
    NotFound,

    /// A malformed or undecodable request/response was received.
    #[error("corrupt message: {0}")]
    Corrupt(String),

    /// A pushed job was rejected outright rather than evicting.
    #[error("capacity exceeded")]
    Capacity,

    /// The request was cancelled before completing.
    #[error("cancelled")]
    Cancelled,

    /// The peer's certificate chain is not on the configured allowlist.
    #[error("unauthorized peer")]
    Unauthorized,

    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport or filesystem I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or certificate failure.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}

impl Error {
    /// Map this error onto the shared, crate-agnostic error kind vocabulary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound => ErrorKind::NotFound,
            Error::Corrupt(_) => ErrorKind::Corrupt,
            Error::Capacity => ErrorKind::Capacity,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Unauthorized => ErrorKind::Unauthorized,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Io(_) => ErrorKind::Io,
            Error::Tls(_) => ErrorKind::Io,
        }
    }
}

impl From<repairqueue::Error> for Error {
    fn from(err: repairqueue::Error) -> Self {
        match err {
            repairqueue::Error::Capacity => Error::Capacity,
            repairqueue::Error::InvalidArgument(msg) => Error::InvalidArgument(msg),
        }
    }
}
