//! The per-record compaction policy and the bookkeeping compaction needs:
//! cancellation, free-space accounting, and a pass summary. The actual scan
//! over a store's log/table and the atomic table swap live in [`crate::store`];
//! this module is the pure decision logic plus the small seam
//! ([`RetainSource`]) that lets `piecestore`'s bloom filter / restore-time
//! managers plug into a compaction pass without `hashstore` depending on
//! `piecestore`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use core_common::Key;

use crate::table::RecordRef;

/// A point-in-time bloom filter snapshot, as delivered by the satellite.
pub trait BloomFilterSnapshot: Send + Sync {
    /// Day-epoch at which this filter was created.
    fn created_at(&self) -> u32;
    /// Whether `key` is (possibly) present in the filter. A bloom filter
    /// never has false negatives, so "not present" is authoritative.
    fn contains(&self, key: &Key) -> bool;
}

/// The retention inputs a compaction pass consults: the namespace's current
/// bloom filter (if any) and its restore-before watermark (if any).
/// `piecestore`'s `Retain` subsystem implements this; `hashstore` only
/// depends on the trait.
pub trait RetainSource: Send + Sync {
    /// The most recently delivered bloom filter for this namespace.
    fn current_bloom_filter(&self) -> Option<Arc<dyn BloomFilterSnapshot>>;
    /// The namespace's current `restore_before` day-epoch, if one has been
    /// set by an operator restore.
    fn restore_before(&self) -> Option<u32>;
}

/// A `RetainSource` that never trashes anything — used when no satellite
/// has ever pushed a bloom filter for a namespace.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetain;

impl RetainSource for NoRetain {
    fn current_bloom_filter(&self) -> Option<Arc<dyn BloomFilterSnapshot>> {
        None
    }
    fn restore_before(&self) -> Option<u32> {
        None
    }
}

/// Compaction tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct CompactionConfig {
    /// `m` in `FreeRequired = (2 + m) * TableSize`.
    pub rewrite_multiple: f64,
    /// Target load factor for the freshly built table (fraction of slots
    /// expected to be occupied immediately after the pass).
    pub target_load_factor: f64,
    /// Minimum days between a trash-mark and physical removal.
    pub trash_grace_days: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        CompactionConfig {
            rewrite_multiple: 1.0,
            target_load_factor: 0.5,
            trash_grace_days: 7,
        }
    }
}

impl CompactionConfig {
    /// A config tuned for fast, deterministic tests (no grace period).
    pub fn for_testing() -> Self {
        CompactionConfig {
            rewrite_multiple: 1.0,
            target_load_factor: 0.5,
            trash_grace_days: 0,
        }
    }
}

/// The outcome of evaluating the per-record policy for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep the record, copying it into the new log unchanged.
    Keep,
    /// Keep the record, but (re)write it with the trash flag set and
    /// `trash_time` updated to `now`.
    MarkTrash,
    /// Drop the record because it expired.
    DropExpired,
    /// Drop the record because its trash grace period elapsed.
    DropTrashGrace,
}

impl Decision {
    /// Whether this decision removes the record from the new log.
    pub fn is_drop(&self) -> bool {
        matches!(self, Decision::DropExpired | Decision::DropTrashGrace)
    }
}

/// Evaluate the four-step policy from the compaction design against one
/// record. Steps are evaluated in order and the first match wins:
///
/// 1. Expired (`expires_at` set and `<= now`) -> drop.
/// 2. Already trash and past grace -> drop.
/// 3. A bloom filter is present, was created at/after this record, the key
///    is absent from it, and the record falls outside the restore window
///    -> mark trash.
/// 4. Otherwise -> keep.
pub fn classify(
    rec: &RecordRef,
    now_day: u32,
    bloom: Option<&dyn BloomFilterSnapshot>,
    restore_before: Option<u32>,
    trash_grace_days: u32,
) -> Decision {
    if rec.expires_at != 0 && rec.expires_at <= now_day {
        return Decision::DropExpired;
    }

    if rec.is_trash() {
        let age = now_day.saturating_sub(rec.trash_time);
        if age >= trash_grace_days {
            return Decision::DropTrashGrace;
        }
        return Decision::Keep;
    }

    if let Some(filter) = bloom {
        let created_before_or_at_filter = rec.created_at <= filter.created_at();
        let inside_restore_window = restore_before
            .map(|rb| rec.created_at <= rb)
            .unwrap_or(false);
        if created_before_or_at_filter && !filter.contains(&rec.key) && !inside_restore_window {
            return Decision::MarkTrash;
        }
    }

    Decision::Keep
}

/// Per-store headroom required to safely run one compaction pass:
/// `(2 + rewrite_multiple) * table_size_bytes`.
pub fn free_required(table_size_bytes: u64, rewrite_multiple: f64) -> u64 {
    ((2.0 + rewrite_multiple) * table_size_bytes as f64).ceil() as u64
}

/// Tallies produced by one compaction pass, logged at `info` level by the
/// caller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Records copied forward unchanged.
    pub kept: u64,
    /// Records dropped because they expired.
    pub dropped_expired: u64,
    /// Records dropped because their trash grace period elapsed.
    pub dropped_trash_grace: u64,
    /// Records newly marked trash this pass.
    pub marked_trash: u64,
}

impl CompactionStats {
    /// Total records that survived into the new log (kept + newly/already
    /// trashed but still within grace).
    pub fn surviving(&self) -> u64 {
        self.kept + self.marked_trash
    }
}

/// A cooperative cancellation flag. Compaction checks it between records;
/// any other caller (e.g. an RPC handler honoring a context deadline) can
/// set it from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBloom {
        created_at: u32,
        present: Vec<Key>,
    }

    impl BloomFilterSnapshot for FixedBloom {
        fn created_at(&self) -> u32 {
            self.created_at
        }
        fn contains(&self, key: &Key) -> bool {
            self.present.contains(key)
        }
    }

    fn rec(created_at: u32, expires_at: u32) -> RecordRef {
        RecordRef {
            key: Key::new([9u8; 32]),
            log_id: 1,
            offset: 0,
            length: 1,
            expires_at,
            created_at,
            flags: 0,
            trash_time: 0,
        }
    }

    #[test]
    fn expired_record_is_dropped() {
        let r = rec(100, 150);
        assert_eq!(classify(&r, 200, None, None, 7), Decision::DropExpired);
    }

    #[test]
    fn unexpired_record_without_bloom_is_kept() {
        let r = rec(100, 0);
        assert_eq!(classify(&r, 200, None, None, 7), Decision::Keep);
    }

    #[test]
    fn absent_from_bloom_and_outside_restore_window_is_trashed() {
        let bloom = FixedBloom {
            created_at: 300,
            present: vec![],
        };
        let r = rec(100, 0);
        let decision = classify(&r, 400, Some(&bloom), Some(50), 7);
        assert_eq!(decision, Decision::MarkTrash);
    }

    #[test]
    fn present_in_bloom_is_kept() {
        let key = Key::new([9u8; 32]);
        let bloom = FixedBloom {
            created_at: 300,
            present: vec![key],
        };
        let r = rec(100, 0);
        assert_eq!(classify(&r, 400, Some(&bloom), None, 7), Decision::Keep);
    }

    #[test]
    fn inside_restore_window_is_protected() {
        let bloom = FixedBloom {
            created_at: 300,
            present: vec![],
        };
        let r = rec(100, 0);
        // restore_before = 150 means anything created at/before day 150 is protected.
        let decision = classify(&r, 400, Some(&bloom), Some(150), 7);
        assert_eq!(decision, Decision::Keep);
    }

    #[test]
    fn record_created_after_filter_is_not_evaluated_against_it() {
        let bloom = FixedBloom {
            created_at: 50,
            present: vec![],
        };
        let r = rec(100, 0); // created after the filter snapshot
        assert_eq!(classify(&r, 400, Some(&bloom), None, 7), Decision::Keep);
    }

    #[test]
    fn trash_past_grace_is_dropped() {
        let mut r = rec(100, 0);
        r.flags |= crate::table::FLAG_TRASH;
        r.trash_time = 100;
        assert_eq!(classify(&r, 110, None, None, 7), Decision::DropTrashGrace);
    }

    #[test]
    fn trash_within_grace_is_kept() {
        let mut r = rec(100, 0);
        r.flags |= crate::table::FLAG_TRASH;
        r.trash_time = 100;
        assert_eq!(classify(&r, 103, None, None, 7), Decision::Keep);
    }

    #[test]
    fn free_required_matches_formula() {
        assert_eq!(free_required(1000, 1.0), 3000);
        assert_eq!(free_required(1000, 0.5), 2500);
    }

    #[test]
    fn cancel_token_is_observable_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
