//! The storage-node-facing piece API: `Writer`/`Reader`/`Trash`/`Restore`/
//! `SpaceUsage` layered over one `hashstore::Db` per namespace, plus the
//! Bloom Filter Manager and Restore Time Manager that feed compaction's
//! retention decisions.
//!
//! `piecestore` owns piece semantics (headers, hashing, trash/restore);
//! `hashstore` underneath knows nothing about pieces, only keys and bytes.

pub mod backend;
pub mod bloom;
pub mod config;
pub mod error;
pub mod header;
pub mod reader;
pub mod retain;
pub mod writer;

pub use backend::{PieceBackend, SpaceUsage};
pub use bloom::BloomFilter;
pub use config::{PieceBackendConfig, RetainConfig};
pub use error::{Error, Result};
pub use header::{piece_valid, HashAlgorithm, OrderLimit, PieceHeader};
pub use reader::PieceReader;
pub use retain::{DeliveredFilter, Retain};
pub use writer::{CommitHeader, PieceWriter};
