//! Typed configuration for the piece backend and its retain subsystem.

use hashstore::DbConfig;

/// Configuration for a [`crate::backend::PieceBackend`]: one [`DbConfig`]
/// shared by every namespace's underlying [`hashstore::Db`].
#[derive(Debug, Clone, Default)]
pub struct PieceBackendConfig {
    /// Store/compaction tuning applied to every namespace's `Db`.
    pub db: DbConfig,
}

impl PieceBackendConfig {
    /// Construct with default `DbConfig`.
    pub fn new() -> PieceBackendConfig {
        PieceBackendConfig::default()
    }

    /// A config tuned for fast, deterministic tests.
    pub fn for_testing() -> PieceBackendConfig {
        PieceBackendConfig {
            db: DbConfig::for_testing(),
        }
    }
}

/// Tuning for the retain subsystem's own bloom filter construction helpers.
/// Does not affect how a delivered filter is read back (the wire bytes are
/// opaque to the reader), only the defaults used when this process itself
/// builds one.
#[derive(Debug, Clone, Copy)]
pub struct RetainConfig {
    /// Target false-positive rate for `BloomFilter::with_capacity`.
    pub default_bloom_false_positive_rate: f64,
}

impl Default for RetainConfig {
    fn default() -> Self {
        RetainConfig {
            default_bloom_false_positive_rate: 0.01,
        }
    }
}

impl RetainConfig {
    /// Construct with defaults.
    pub fn new() -> RetainConfig {
        RetainConfig::default()
    }

    /// A looser false-positive rate, keeping test filters small.
    pub fn for_testing() -> RetainConfig {
        RetainConfig {
            default_bloom_false_positive_rate: 0.1,
        }
    }
}
