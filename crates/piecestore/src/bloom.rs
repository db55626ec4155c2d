//! A simple counting-free bloom filter, used both to interpret a filter the
//! satellite delivers and (in tests) to build one.
//!
//! Wire shape is opaque to callers: the satellite hands us `filter_bytes`
//! and we only need to decode whatever bytes *we* wrote, so the bit layout
//! here is this crate's own — `bincode`-encoded `num_bits`, `num_hashes`,
//! and the bit vector as `Vec<u64>` words.

use core_common::Key;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An immutable Bloom filter over 32-byte keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    num_bits: u64,
    num_hashes: u32,
    words: Vec<u64>,
}

impl BloomFilter {
    /// Build an empty filter sized for `expected_items` at `false_positive_rate`.
    ///
    /// Uses the standard optimal-parameter formulas: `m = -n*ln(p)/(ln2)^2`,
    /// `k = (m/n)*ln2`, both rounded up and floored to at least 1.
    pub fn with_capacity(expected_items: usize, false_positive_rate: f64) -> BloomFilter {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-6, 0.5);
        let m = (-(n * p.ln()) / (std::f64::consts::LN_2.powi(2))).ceil().max(8.0);
        let k = ((m / n) * std::f64::consts::LN_2).round().max(1.0) as u32;
        let num_bits = m as u64;
        let num_words = ((num_bits + 63) / 64).max(1);
        BloomFilter {
            num_bits,
            num_hashes: k,
            words: vec![0u64; num_words as usize],
        }
    }

    /// Insert `key` into the filter.
    pub fn insert(&mut self, key: &Key) {
        for idx in self.bit_indices(key) {
            let word = (idx / 64) as usize;
            let bit = idx % 64;
            self.words[word] |= 1u64 << bit;
        }
    }

    /// Whether `key` may be present. Never false-negative.
    pub fn contains(&self, key: &Key) -> bool {
        self.bit_indices(key).all(|idx| {
            let word = (idx / 64) as usize;
            let bit = idx % 64;
            self.words[word] & (1u64 << bit) != 0
        })
    }

    fn bit_indices(&self, key: &Key) -> impl Iterator<Item = u64> + '_ {
        // Double hashing (Kirsch-Mitzenmacher): derive k indices from two
        // independent 64-bit hashes of the key instead of k separate passes.
        let h1 = u64::from_be_bytes(key.as_bytes()[0..8].try_into().unwrap());
        let h2 = u64::from_be_bytes(key.as_bytes()[8..16].try_into().unwrap()) | 1;
        let num_bits = self.num_bits;
        (0..self.num_hashes).map(move |i| h1.wrapping_add((i as u64).wrapping_mul(h2)) % num_bits)
    }

    /// Serialize to bytes, opaque to any other reader.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("bloom filter serialization is infallible")
    }

    /// Parse previously-serialized bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<BloomFilter> {
        bincode::deserialize(bytes).map_err(|e| Error::Corrupt(format!("bad bloom filter bytes: {e}")))
    }
}
