//! `PieceWriter`: hashes a piece's bytes as they arrive and, on `commit`,
//! appends the trailing `PieceHeader` and hands the framed payload to the
//! underlying `hashstore::Db`.

use std::sync::Arc;

use core_common::Key;
use hashstore::Db;

use crate::error::Result;
use crate::header::{HashAlgorithm, OrderLimit, PieceHeader};

enum RunningHash {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl RunningHash {
    fn new(algorithm: HashAlgorithm) -> RunningHash {
        match algorithm {
            HashAlgorithm::Sha256 => RunningHash::Sha256(sha2::Sha256::default()),
            HashAlgorithm::Blake3 => RunningHash::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            RunningHash::Sha256(h) => {
                use sha2::Digest;
                h.update(data);
            }
            RunningHash::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> [u8; 32] {
        match self {
            RunningHash::Sha256(h) => {
                use sha2::Digest;
                let digest = h.finalize();
                let mut out = [0u8; 32];
                out.copy_from_slice(&digest);
                out
            }
            RunningHash::Blake3(h) => *h.finalize().as_bytes(),
        }
    }
}

/// The caller-supplied half of `Commit`: the order limit to bind into the
/// header, and an optional declared hash. An all-zero hash means "use the
/// hash this writer computed from the bytes it was actually given".
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitHeader {
    /// Declared hash; all-zero means "fill in the writer's running hash".
    pub hash: [u8; 32],
    /// The order limit this write was authorized under.
    pub order_limit: OrderLimit,
}

/// A single piece write in progress. Bytes accumulate in memory (hashed as
/// they arrive) until [`PieceWriter::commit`], which is the sole point at
/// which the piece becomes visible to readers.
pub struct PieceWriter {
    db: Arc<Db>,
    piece_id: Key,
    expires_at: u32,
    hash_algorithm: HashAlgorithm,
    hasher: RunningHash,
    buffer: Vec<u8>,
    created_at: i64,
}

impl PieceWriter {
    pub(crate) fn new(
        db: Arc<Db>,
        piece_id: Key,
        hash_algorithm: HashAlgorithm,
        expires_at: u32,
        created_at: i64,
    ) -> PieceWriter {
        PieceWriter {
            db,
            piece_id,
            expires_at,
            hash_algorithm,
            hasher: RunningHash::new(hash_algorithm),
            buffer: Vec::new(),
            created_at,
        }
    }

    /// Append bytes to the piece's data portion, updating the running hash.
    pub fn write(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.buffer.extend_from_slice(data);
    }

    /// Number of data bytes written so far (excludes the trailing header).
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether any bytes have been written yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Finish the write: append the `PieceHeader` trailer and commit the
    /// framed record to the underlying store. Nothing is visible to readers
    /// before this returns `Ok`; any error here leaves no record behind.
    pub fn commit(mut self, header: CommitHeader) -> Result<()> {
        let running_hash = {
            // `finalize` consumes the hasher; swap in a cheap placeholder
            // first so `self` stays intact for the fields used below.
            let hasher = std::mem::replace(&mut self.hasher, RunningHash::new(self.hash_algorithm));
            hasher.finalize()
        };
        let hash = if header.hash == [0u8; 32] {
            running_hash
        } else {
            header.hash
        };

        let piece_header = PieceHeader {
            hash,
            hash_algorithm: self.hash_algorithm,
            order_limit: header.order_limit,
            created_at: self.created_at,
        };
        piece_header.append_to(&mut self.buffer);

        let mut inner = self.db.create(self.piece_id, self.expires_at);
        inner.write(&self.buffer);
        inner.commit()?;
        Ok(())
    }
}
