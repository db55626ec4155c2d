//! The repair job: `(stream_id, position, segment_health, placement,
//! timestamps)`. Uniquely identified, while queued, by `(stream_id,
//! position)`.

use core_common::Key;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A routing constraint partitioning the repair queue (geographic or
/// policy). Kept as a small opaque integer — the satellite assigns these,
/// this crate only uses them as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlacementId(pub u16);

impl fmt::Display for PlacementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "placement-{}", self.0)
    }
}

/// One segment repair work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// The stream this segment belongs to.
    pub stream_id: Key,
    /// The segment's position within the stream.
    pub position: u32,
    /// Lower is worse (more urgent to repair).
    pub segment_health: f64,
    /// The placement constraint this job was queued under.
    pub placement: PlacementId,
    /// Unix timestamp this job first entered the queue.
    pub inserted_at: i64,
    /// Unix timestamp this job's state last changed (push, pop, or retry).
    pub updated_at: i64,
    /// Unix timestamp of the most recent `Pop` that returned this job, if any.
    pub last_attempted_at: Option<i64>,
}

impl Job {
    /// Construct a freshly-inserted job: `inserted_at`/`updated_at` set to
    /// `now`, never yet attempted.
    pub fn new(
        stream_id: Key,
        position: u32,
        segment_health: f64,
        placement: PlacementId,
        now: i64,
    ) -> Job {
        Job {
            stream_id,
            position,
            segment_health,
            placement,
            inserted_at: now,
            updated_at: now,
            last_attempted_at: None,
        }
    }

    /// The `(stream_id, position)` pair that uniquely identifies this job
    /// while it is queued.
    pub fn identity(&self) -> (Key, u32) {
        (self.stream_id, self.position)
    }

    /// `last_attempted_at + retry_after`, i.e. the earliest time this job
    /// becomes poppable again after a failed attempt. `None` if it has
    /// never been attempted (always eligible).
    pub fn eligible_at(&self, retry_after_secs: i64) -> Option<i64> {
        self.last_attempted_at.map(|t| t + retry_after_secs)
    }

    /// Ordering key for the repair heap: lower health first, oldest
    /// insertion breaks ties.
    fn priority_key(&self) -> (f64, i64) {
        (self.segment_health, self.inserted_at)
    }

    /// Crate-visible accessor for [`Job::priority_key`], used by the queue's
    /// argmin scan.
    pub(crate) fn priority_key_pub(&self) -> (f64, i64) {
        self.priority_key()
    }

    /// Whether `self` is strictly higher repair priority than `other`
    /// (lower health, or equal health and older insertion).
    pub fn outranks(&self, other: &Job) -> bool {
        self.priority_key() < other.priority_key()
    }

    /// Whether `self` is the worse candidate to keep under eviction: larger
    /// `segment_health`, and on a tie the more recently inserted (so the
    /// older entry wins retention, per the queue's documented eviction
    /// tie-break).
    pub fn evict_key(&self) -> (f64, i64) {
        (self.segment_health, self.inserted_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_health_outranks_higher() {
        let a = Job::new(Key::new([1u8; 32]), 0, 0.1, PlacementId(1), 100);
        let b = Job::new(Key::new([2u8; 32]), 0, 0.5, PlacementId(1), 100);
        assert!(a.outranks(&b));
        assert!(!b.outranks(&a));
    }

    #[test]
    fn equal_health_older_insertion_outranks() {
        let older = Job::new(Key::new([1u8; 32]), 0, 0.3, PlacementId(1), 50);
        let newer = Job::new(Key::new([2u8; 32]), 0, 0.3, PlacementId(1), 60);
        assert!(older.outranks(&newer));
    }

    #[test]
    fn eligible_at_is_none_without_an_attempt() {
        let job = Job::new(Key::new([1u8; 32]), 0, 0.3, PlacementId(1), 50);
        assert_eq!(job.eligible_at(60), None);
    }
}
