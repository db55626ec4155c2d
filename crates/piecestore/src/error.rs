//! Error type for the piece-level backend and retain subsystem.

use core_common::ErrorKind;
use thiserror::Error;

/// Result type alias for piecestore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the piece backend, bloom filter manager, and restore
/// time manager.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying hash table / log engine failure.
    #[error(transparent)]
    Store(#[from] hashstore::Error),

    /// The piece was not found.
    #[error("piece not found")]
    NotFound,

    /// A `Commit` payload failed `pieceValid` (bad hash, truncated data, or
    /// a mismatched `OrderLimit.PieceId`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Persisted BFM/RTM state failed to decode.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Underlying filesystem failure persisting BFM/RTM state.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map this error onto the shared, crate-agnostic error kind vocabulary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Store(e) => e.kind(),
            Error::NotFound => ErrorKind::NotFound,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Corrupt(_) => ErrorKind::Corrupt,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}
