//! Error type for the repair job queue.

use core_common::ErrorKind;
use thiserror::Error;

/// Result type alias for repairqueue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the queue, queue map, and collector.
#[derive(Debug, Error)]
pub enum Error {
    /// A pushed job would exceed capacity and is not higher priority than
    /// every existing entry, so it was rejected rather than evicting.
    #[error("queue at capacity")]
    Capacity,

    /// Caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Map this error onto the shared, crate-agnostic error kind vocabulary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Capacity => ErrorKind::Capacity,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}
