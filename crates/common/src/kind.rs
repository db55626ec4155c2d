//! The error-kind vocabulary shared by every crate-local `Error` type.
//!
//! Each crate (`hashstore`, `piecestore`, `repairqueue`, `repair-rpc`) keeps
//! its own `thiserror`-derived `Error` enum with variants specific to that
//! crate's failure modes, but every variant maps onto one of these kinds so
//! that callers and the RPC transport can branch on a small, stable set
//! regardless of which crate raised the error.

use std::fmt;

/// A coarse failure category, matching the error kinds described for the
/// piece store and repair queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key absent from both stores, or the queue was empty.
    NotFound,
    /// CRC mismatch or truncated framing.
    Corrupt,
    /// An operation that must be rejected rather than silently overwriting
    /// existing state (e.g. pushing an already-present job).
    Conflict,
    /// Queue full and the new entry is not higher priority than the evictee.
    Capacity,
    /// The caller's context was cancelled.
    Cancelled,
    /// Underlying filesystem or network failure not covered by another kind.
    Io,
    /// RPC peer not on the configured allowlist.
    Unauthorized,
    /// Caller-supplied argument failed validation (e.g. a bad piece header).
    InvalidArgument,
}

impl ErrorKind {
    /// A short, human-readable label. Used in `Display` impls downstream.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidArgument => "invalid_argument",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
