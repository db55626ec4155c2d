//! Error type for the log + hash table engine.

use core_common::ErrorKind;
use std::io;
use thiserror::Error;

/// Result type alias for hashstore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the log file, hash table, store, and compaction layers.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key not present in the store.
    #[error("key not found")]
    NotFound,

    /// CRC mismatch, truncated framing, or an unreadable table/log header.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Compaction (or another cancellable operation) was cancelled before
    /// completing.
    #[error("operation cancelled")]
    Cancelled,

    /// A caller-supplied argument was invalid (e.g. a zero-length record).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation conflicts with another in-flight operation on the same
    /// store (e.g. a second compaction pass while one is already running).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl Error {
    /// Map this error onto the shared, crate-agnostic error kind vocabulary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::NotFound => ErrorKind::NotFound,
            Error::Corrupt(_) => ErrorKind::Corrupt,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Conflict(_) => ErrorKind::Conflict,
        }
    }
}
