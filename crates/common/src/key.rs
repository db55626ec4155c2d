//! The 32-byte content key used to address a record in the hash table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 32-byte identifier used as the primary hash input for the table.
///
/// `Key` never mutates once constructed. It is assumed to be uniformly
/// distributed (piece IDs are themselves derived from a hash), so the top
/// bits may be used directly as a slot index without an extra mixing step.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(pub [u8; 32]);

impl Key {
    /// Number of bytes in a `Key`.
    pub const LEN: usize = 32;

    /// Wrap a raw 32-byte array.
    pub fn new(bytes: [u8; 32]) -> Self {
        Key(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The top `bits` bits of the key, used as a table slot index.
    ///
    /// `bits` must be <= 64; callers pass `log2(slot_count)`.
    pub fn top_bits(&self, bits: u32) -> u64 {
        debug_assert!(bits <= 64);
        if bits == 0 {
            return 0;
        }
        let mut acc = [0u8; 8];
        acc.copy_from_slice(&self.0[0..8]);
        let word = u64::from_be_bytes(acc);
        word >> (64 - bits)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Key {
    fn from(bytes: [u8; 32]) -> Self {
        Key(bytes)
    }
}
