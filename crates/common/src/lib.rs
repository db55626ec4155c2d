//! Shared primitives used by every crate in the piece store / repair queue
//! workspace: the opaque content-addressed `Key`, the `TimeSource` seam that
//! lets every component's notion of "now" be swapped out in tests, and the
//! `ErrorKind` vocabulary that every crate-local error type maps onto.
//!
//! Nothing in this crate touches disk or the network; it exists so that
//! `hashstore`, `piecestore`, `repairqueue` and `repair-rpc` agree on the
//! same small set of cross-cutting types instead of redefining them.

pub mod key;
pub mod kind;
pub mod time;

pub use key::Key;
pub use kind::ErrorKind;
pub use time::{day_epoch, from_day_epoch, ManualTimeSource, SystemTimeSource, TimeSource};
