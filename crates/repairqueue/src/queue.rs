//! Per-placement prioritized repair job queue: a repair heap ordered by
//! `segment_health` ascending plus a secondary retry heap for jobs whose
//! last attempt is too recent, both backed by a growable `Vec` of records
//! rather than a binary-heap data structure, since eviction needs an
//! arbitrary-key max-scan that a classic heap doesn't support cheaply.

use std::sync::Arc;

use core_common::TimeSource;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::job::Job;

/// One health bucket in a [`QueueStat`] histogram: `[lower, lower + 0.1)`.
pub type HistogramBucket = (f64, u64);

/// A snapshot of one queue's contents, matching the per-placement `Stat()`
/// operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStat {
    /// Total jobs across both heaps.
    pub count: usize,
    /// Lowest `segment_health` currently queued, if any.
    pub min_health: Option<f64>,
    /// Highest `segment_health` currently queued, if any.
    pub max_health: Option<f64>,
    /// Ten buckets spanning `[0.0, 1.0]` in steps of 0.1.
    pub histogram: Vec<HistogramBucket>,
}

struct State {
    repair: Vec<Job>,
    retry: Vec<Job>,
}

/// One placement's prioritized job queue. Safe for concurrent callers (a
/// single mutex guards both heaps); not safe to share state *across*
/// placements — each `Queue` is authoritative only for its own placement.
pub struct Queue {
    state: Mutex<State>,
    config: QueueConfig,
    time_source: Arc<dyn TimeSource>,
}

impl Queue {
    /// Create an empty queue. `time_source` defaults to the real wall clock
    /// in production; tests pass a `ManualTimeSource` instead. Replacing one
    /// queue's clock never affects another's, and a queue created afterward
    /// without an explicit override still starts on wall-clock time.
    pub fn new(config: QueueConfig, time_source: Arc<dyn TimeSource>) -> Queue {
        Queue {
            state: Mutex::new(State {
                repair: Vec::with_capacity(config.init_alloc),
                retry: Vec::with_capacity(config.init_alloc),
            }),
            config,
            time_source,
        }
    }

    /// Push one job. If `last_attempted_at` is set and still within
    /// `retry_after`, the job enters the retry heap; otherwise the repair
    /// heap. If this would exceed `max_elements`, the lowest-priority
    /// element across *both* heaps is evicted — possibly the job just
    /// pushed, in which case this call is a no-op. Returns the evicted job,
    /// if any.
    #[tracing::instrument(skip(self, job), fields(stream_id = %job.stream_id, position = job.position))]
    pub fn push(&self, job: Job) -> Option<Job> {
        let now = self.time_source.now_unix();
        let mut state = self.state.lock();
        self.push_locked(&mut state, job, now)
    }

    /// Push every job in `jobs` under one lock acquisition.
    pub fn push_batch(&self, jobs: Vec<Job>) -> Vec<Job> {
        let now = self.time_source.now_unix();
        let mut state = self.state.lock();
        jobs.into_iter()
            .filter_map(|job| self.push_locked(&mut state, job, now))
            .collect()
    }

    fn push_locked(&self, state: &mut State, job: Job, now: i64) -> Option<Job> {
        let goes_to_retry = job
            .eligible_at(self.config.retry_after_secs)
            .is_some_and(|eligible_at| eligible_at > now);
        if goes_to_retry {
            state.retry.push(job);
        } else {
            state.repair.push(job);
        }
        self.enforce_capacity(state)
    }

    /// Evict the globally-lowest-priority job if both heaps together exceed
    /// `max_elements`. Returns the evicted job, if one was removed.
    fn enforce_capacity(&self, state: &mut State) -> Option<Job> {
        if state.repair.len() + state.retry.len() <= self.config.max_elements {
            return None;
        }

        let worst_repair = argmax_by_key(&state.repair, Job::evict_key);
        let worst_retry = argmax_by_key(&state.retry, Job::evict_key);

        let evict_from_retry = match (worst_repair, worst_retry) {
            (Some(r), Some(t)) => state.retry[t].evict_key() >= state.repair[r].evict_key(),
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (None, None) => return None,
        };

        Some(if evict_from_retry {
            state.retry.swap_remove(worst_retry.expect("checked above"))
        } else {
            state.repair.swap_remove(worst_repair.expect("checked above"))
        })
    }

    /// Move every retry-heap entry whose `eligible_at <= now` into the
    /// repair heap.
    fn promote_eligible(&self, state: &mut State, now: i64) {
        let retry_after = self.config.retry_after_secs;
        let mut i = 0;
        while i < state.retry.len() {
            let eligible_at = state.retry[i].eligible_at(retry_after).unwrap_or(i64::MIN);
            if eligible_at <= now {
                let job = state.retry.swap_remove(i);
                state.repair.push(job);
            } else {
                i += 1;
            }
        }
    }

    /// Promote eligible retries, then pop and return the repair heap's
    /// highest-priority job (lowest `segment_health`, oldest `inserted_at`
    /// breaking ties), updating its attempt metadata to `now`. Returns
    /// `None` if both heaps are empty.
    #[tracing::instrument(skip(self))]
    pub fn pop(&self) -> Option<Job> {
        let now = self.time_source.now_unix();
        let mut state = self.state.lock();
        self.promote_eligible(&mut state, now);

        let idx = argmin_by_key(&state.repair, Job::priority_key_pub)?;
        let mut job = state.repair.swap_remove(idx);
        job.last_attempted_at = Some(now);
        job.updated_at = now;
        tracing::debug!(stream_id = %job.stream_id, position = job.position, "job popped");
        Some(job)
    }

    /// Read-only equivalent of [`Queue::pop`]: promotes eligible retries
    /// (so the answer reflects current eligibility) but does not dequeue or
    /// touch attempt metadata.
    pub fn peek(&self) -> Option<Job> {
        let now = self.time_source.now_unix();
        let mut state = self.state.lock();
        self.promote_eligible(&mut state, now);
        let idx = argmin_by_key(&state.repair, Job::priority_key_pub)?;
        Some(state.repair[idx].clone())
    }

    /// `(repair_len, retry_len)`.
    pub fn len(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.repair.len(), state.retry.len())
    }

    /// Whether both heaps are empty.
    pub fn is_empty(&self) -> bool {
        let (a, b) = self.len();
        a == 0 && b == 0
    }

    /// Drop every entry from both heaps whose `updated_at` is strictly
    /// older than `before`; entries updated exactly at `before` are kept.
    pub fn clean(&self, before: i64) {
        let mut state = self.state.lock();
        state.repair.retain(|j| j.updated_at >= before);
        state.retry.retain(|j| j.updated_at >= before);
    }

    /// Drop every entry whose `segment_health` exceeds `health_greater_than`.
    pub fn trim(&self, health_greater_than: f64) {
        let mut state = self.state.lock();
        state.repair.retain(|j| j.segment_health <= health_greater_than);
        state.retry.retain(|j| j.segment_health <= health_greater_than);
    }

    /// A point-in-time summary of this queue's contents.
    pub fn stat(&self) -> QueueStat {
        let state = self.state.lock();
        let mut min_health: Option<f64> = None;
        let mut max_health: Option<f64> = None;
        let mut buckets = [0u64; 10];
        let mut count = 0usize;

        for job in state.repair.iter().chain(state.retry.iter()) {
            count += 1;
            min_health = Some(min_health.map_or(job.segment_health, |m| m.min(job.segment_health)));
            max_health = Some(max_health.map_or(job.segment_health, |m| m.max(job.segment_health)));
            let bucket = ((job.segment_health * 10.0).floor() as i64).clamp(0, 9) as usize;
            buckets[bucket] += 1;
        }

        let histogram = buckets
            .iter()
            .enumerate()
            .map(|(i, &c)| (i as f64 * 0.1, c))
            .collect();

        QueueStat {
            count,
            min_health,
            max_health,
            histogram,
        }
    }

    /// Best-effort memory release: if either backing `Vec`'s unused
    /// capacity exceeds `mem_release_threshold`, shrink it back down to its
    /// current length. No portable `madvise(DONTNEED)` is attempted on
    /// platforms lacking one — `Vec::shrink_to` is itself already a
    /// best-effort hint to the allocator.
    pub fn maybe_release_memory(&self) {
        let mut state = self.state.lock();
        let threshold = self.config.mem_release_threshold;
        if state.repair.capacity().saturating_sub(state.repair.len()) > threshold {
            let len = state.repair.len();
            state.repair.shrink_to(len.max(self.config.init_alloc));
        }
        if state.retry.capacity().saturating_sub(state.retry.len()) > threshold {
            let len = state.retry.len();
            state.retry.shrink_to(len.max(self.config.init_alloc));
        }
    }
}

fn argmax_by_key<T, K: PartialOrd>(items: &[T], key: impl Fn(&T) -> K) -> Option<usize> {
    items
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| key(a).partial_cmp(&key(b)).expect("segment_health is never NaN"))
        .map(|(idx, _)| idx)
}

fn argmin_by_key<T, K: PartialOrd>(items: &[T], key: impl Fn(&T) -> K) -> Option<usize> {
    items
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| key(a).partial_cmp(&key(b)).expect("segment_health is never NaN"))
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PlacementId;
    use core_common::{Key, ManualTimeSource};

    fn job(byte: u8, health: f64, now: i64) -> Job {
        Job::new(Key::new([byte; 32]), 0, health, PlacementId(1), now)
    }

    fn queue(config: QueueConfig, clock: ManualTimeSource) -> Queue {
        Queue::new(config, Arc::new(clock))
    }

    #[test]
    fn pop_returns_lowest_health_first() {
        let q = queue(QueueConfig::for_testing(), ManualTimeSource::starting_at(0));
        q.push(job(1, 0.3, 0));
        q.push(job(2, 0.1, 0));
        q.push(job(3, 0.2, 0));

        assert_eq!(q.pop().unwrap().segment_health, 0.1);
        assert_eq!(q.pop().unwrap().segment_health, 0.2);
        assert_eq!(q.pop().unwrap().segment_health, 0.3);
        assert!(q.pop().is_none());
    }

    #[test]
    fn retry_delay_withholds_until_eligible() {
        let clock = ManualTimeSource::starting_at(0);
        let q = queue(QueueConfig::for_testing(), clock.clone());
        let mut j = job(1, 0.5, 0);
        j.last_attempted_at = Some(0);
        q.push(j);

        assert!(q.pop().is_none());
        clock.advance(QueueConfig::for_testing().retry_after_secs);
        assert!(q.pop().is_some());
    }

    #[test]
    fn eviction_keeps_lowest_health_and_drops_worst() {
        let config = QueueConfig {
            max_elements: 2,
            ..QueueConfig::for_testing()
        };
        let q = queue(config, ManualTimeSource::starting_at(0));
        q.push(job(1, 0.5, 0));
        q.push(job(2, 0.1, 0));
        let evicted = q.push(job(3, 0.9, 0));

        assert_eq!(evicted.unwrap().segment_health, 0.9);
        let (repair_len, retry_len) = q.len();
        assert_eq!(repair_len + retry_len, 2);
        assert_eq!(q.pop().unwrap().segment_health, 0.1);
        assert_eq!(q.pop().unwrap().segment_health, 0.5);
    }

    #[test]
    fn eviction_tie_break_drops_the_newer_insertion() {
        let config = QueueConfig {
            max_elements: 1,
            ..QueueConfig::for_testing()
        };
        let q = queue(config, ManualTimeSource::starting_at(0));
        q.push(job(1, 0.5, 10));
        let evicted = q.push(job(2, 0.5, 20));

        assert_eq!(evicted.unwrap().inserted_at, 20);
        assert_eq!(q.pop().unwrap().inserted_at, 10);
    }

    #[test]
    fn pushing_the_worst_job_itself_is_evicted() {
        let config = QueueConfig {
            max_elements: 1,
            ..QueueConfig::for_testing()
        };
        let q = queue(config, ManualTimeSource::starting_at(0));
        q.push(job(1, 0.1, 0));
        let evicted = q.push(job(2, 0.9, 0));
        assert_eq!(evicted.unwrap().segment_health, 0.9);
        assert_eq!(q.pop().unwrap().segment_health, 0.1);
    }

    #[test]
    fn clean_drops_strictly_older_entries() {
        let q = queue(QueueConfig::for_testing(), ManualTimeSource::starting_at(0));
        q.push(job(1, 0.1, 10));
        q.push(job(2, 0.2, 20));

        q.clean(20);
        let (repair_len, _) = q.len();
        assert_eq!(repair_len, 1);
        assert_eq!(q.pop().unwrap().inserted_at, 20);
    }

    #[test]
    fn trim_drops_entries_above_threshold() {
        let q = queue(QueueConfig::for_testing(), ManualTimeSource::starting_at(0));
        q.push(job(1, 0.2, 0));
        q.push(job(2, 0.8, 0));

        q.trim(0.5);
        let (repair_len, _) = q.len();
        assert_eq!(repair_len, 1);
        assert_eq!(q.pop().unwrap().segment_health, 0.2);
    }

    #[test]
    fn stat_reports_count_and_health_bounds() {
        let q = queue(QueueConfig::for_testing(), ManualTimeSource::starting_at(0));
        q.push(job(1, 0.15, 0));
        q.push(job(2, 0.85, 0));

        let stat = q.stat();
        assert_eq!(stat.count, 2);
        assert_eq!(stat.min_health, Some(0.15));
        assert_eq!(stat.max_health, Some(0.85));
        assert_eq!(stat.histogram.len(), 10);
        assert_eq!(stat.histogram[1].1, 1);
        assert_eq!(stat.histogram[8].1, 1);
    }

    #[test]
    fn peek_does_not_dequeue_or_update_attempt_metadata() {
        let q = queue(QueueConfig::for_testing(), ManualTimeSource::starting_at(0));
        q.push(job(1, 0.3, 0));

        let peeked = q.peek().unwrap();
        assert!(peeked.last_attempted_at.is_none());
        let (repair_len, _) = q.len();
        assert_eq!(repair_len, 1);
    }

    #[test]
    fn maybe_release_memory_shrinks_oversized_capacity() {
        let config = QueueConfig {
            init_alloc: 4,
            mem_release_threshold: 2,
            ..QueueConfig::for_testing()
        };
        let q = queue(config, ManualTimeSource::starting_at(0));
        for i in 0..4u8 {
            q.push(job(i, 0.1, 0));
        }
        for _ in 0..4 {
            q.pop();
        }
        q.maybe_release_memory();
        // Not asserting exact capacity (allocator-dependent); just confirm
        // this doesn't panic on an empty queue and leaves it poppable.
        assert!(q.pop().is_none());
    }
}
