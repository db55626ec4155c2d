//! Mutual-TLS RPC endpoint exposing a [`repairqueue::QueueMap`] to remote
//! callers: framed MessagePack request/response pairs over
//! length-delimited streams, with peer authorization on top of TLS's own
//! chain validation.

pub mod auth;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tls;

pub use auth::{NodeId, PeerAllowlist};
pub use client::Client;
pub use error::{Error, Result};
pub use server::Server;
pub use tls::Identity;
