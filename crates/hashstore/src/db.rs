//! Pairs two [`Store`]s (`s0`, `s1`) behind one namespace: picks the active
//! store for writes, consults both for reads, and ensures at most one of the
//! pair compacts at a time.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_common::{Key, TimeSource};

use crate::compaction::{CancelToken, CompactionStats, RetainSource};
use crate::config::DbConfig;
use crate::error::{Error, Result};
use crate::store::{ReadHandle, Store, TableStats, Writer};

/// Aggregated space-usage figures across both of a [`Db`]'s stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    /// `max(s0.FreeRequired, s1.FreeRequired)` — only one store compacts at
    /// a time, so the DB only ever needs headroom for one pass.
    pub reserved: u64,
    /// Sum of both stores' on-disk table sizes.
    pub used_for_metadata: u64,
    /// `s0`'s own stats.
    pub s0: TableStats,
    /// `s1`'s own stats.
    pub s1: TableStats,
}

/// Two stores sharing one namespace.
pub struct Db {
    s0: Store,
    s1: Store,
    next_write: AtomicU8,
    next_compact: AtomicU8,
    compacting: AtomicBool,
    compaction_interval_secs: u64,
}

impl Db {
    /// Open (creating if absent) both stores under `root/s0` and `root/s1`.
    pub fn open(root: &Path, config: DbConfig, time_source: Arc<dyn TimeSource>) -> Result<Db> {
        let s0 = Store::open(&root.join("s0"), config.store.clone(), time_source.clone())?;
        let s1 = Store::open(&root.join("s1"), config.store.clone(), time_source)?;
        Ok(Db {
            s0,
            s1,
            next_write: AtomicU8::new(0),
            next_compact: AtomicU8::new(0),
            compacting: AtomicBool::new(false),
            compaction_interval_secs: config.compaction_interval_secs,
        })
    }

    /// The store selected for the next write, chosen round-robin via a
    /// single atomic counter: needs no shared free-space accounting and is
    /// trivially reproducible.
    fn active_store(&self) -> &Store {
        let idx = self.next_write.fetch_add(1, Ordering::SeqCst) % 2;
        if idx == 0 {
            &self.s0
        } else {
            &self.s1
        }
    }

    /// Begin a new write against whichever store is currently active.
    pub fn create(&self, key: Key, expires_at: u32) -> Writer<'_> {
        self.active_store().create(key, expires_at)
    }

    /// Look up `key` in both stores; if both have it, the more recently
    /// created record wins (a key may briefly exist in both during
    /// compaction's merge window, in which case this is the tiebreaker).
    pub fn read(&self, key: &Key) -> Result<Option<ReadHandle>> {
        let r0 = self.s0.read(key)?;
        let r1 = self.s1.read(key)?;
        Ok(match (r0, r1) {
            (Some(a), Some(b)) => Some(if a.created_at >= b.created_at { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        })
    }

    /// Mark `key` trash in whichever store holds it.
    pub fn mark_trash(&self, key: &Key) -> Result<bool> {
        let a = self.s0.mark_trash(key)?;
        let b = self.s1.mark_trash(key)?;
        Ok(a || b)
    }

    /// Restore `key` from trash in whichever store holds it and still has
    /// grace remaining.
    pub fn restore(&self, key: &Key) -> Result<bool> {
        let a = self.s0.restore(key)?;
        let b = self.s1.restore(key)?;
        Ok(a || b)
    }

    /// Run one compaction pass against whichever store is due next,
    /// alternating `s0`/`s1`. Rejects a second concurrent compaction across
    /// the pair — this is what keeps `Reserved` equal to the max of the two
    /// stores' `FreeRequired` rather than their sum.
    pub fn compact(&self, retain: &dyn RetainSource, cancel: &CancelToken) -> Result<CompactionStats> {
        if self
            .compacting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Conflict(
                "a compaction pass is already running for this namespace".into(),
            ));
        }
        let idx = self.next_compact.fetch_add(1, Ordering::SeqCst) % 2;
        let target = if idx == 0 { &self.s0 } else { &self.s1 };
        let result = target.compact(retain, cancel);
        self.compacting.store(false, Ordering::SeqCst);
        result
    }

    /// Spawn a background task that runs a compaction pass every
    /// `compaction.interval` (see [`DbConfig::compaction_interval_secs`])
    /// until `cancel` is requested. A tick that lands while a pass is
    /// already in flight (started by this loop or by a direct caller) logs
    /// and skips rather than queuing up, so the loop never falls behind
    /// cancellation.
    pub fn spawn_compaction_scheduler(
        self: Arc<Self>,
        retain: Arc<dyn RetainSource>,
        cancel: CancelToken,
    ) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.compaction_interval_secs.max(1));
        tokio::task::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if cancel.is_cancelled() {
                    tracing::debug!("compaction scheduler stopping: cancelled");
                    return;
                }
                match self.compact(retain.as_ref(), &cancel) {
                    Ok(stats) => tracing::info!(
                        kept = stats.kept,
                        dropped_expired = stats.dropped_expired,
                        dropped_trash_grace = stats.dropped_trash_grace,
                        marked_trash = stats.marked_trash,
                        "scheduled compaction pass completed"
                    ),
                    Err(Error::Conflict(_)) => {
                        tracing::debug!("scheduled compaction pass skipped: already running")
                    }
                    Err(err) => tracing::warn!(error = %err, "scheduled compaction pass failed"),
                }
            }
        })
    }

    /// Aggregated space-usage figures across both stores.
    pub fn stats(&self) -> Result<DbStats> {
        let s0 = self.s0.stats()?;
        let s1 = self.s1.stats()?;
        Ok(DbStats {
            reserved: s0.free_required.max(s1.free_required),
            used_for_metadata: s0.table_size_bytes + s1.table_size_bytes,
            s0,
            s1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::NoRetain;
    use crate::config::StoreConfig;
    use core_common::ManualTimeSource;
    use tempfile::tempdir;

    fn open_db(dir: &Path) -> Db {
        Db::open(
            dir,
            DbConfig::for_testing(),
            Arc::new(ManualTimeSource::starting_at(0)),
        )
        .unwrap()
    }

    fn commit(db: &Db, key: [u8; 32], payload: &[u8]) {
        let mut w = db.create(Key::new(key), 0);
        w.write(payload);
        w.commit().unwrap();
    }

    #[test]
    fn writes_round_robin_across_stores() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        commit(&db, [1u8; 32], b"a");
        commit(&db, [2u8; 32], b"b");

        assert!(db.s0.read(&Key::new([1u8; 32])).unwrap().is_some());
        assert!(db.s1.read(&Key::new([2u8; 32])).unwrap().is_some());
    }

    #[test]
    fn read_consults_both_stores() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        commit(&db, [3u8; 32], b"x");
        commit(&db, [4u8; 32], b"y");

        assert_eq!(db.read(&Key::new([3u8; 32])).unwrap().unwrap().payload, b"x");
        assert_eq!(db.read(&Key::new([4u8; 32])).unwrap().unwrap().payload, b"y");
        assert!(db.read(&Key::new([5u8; 32])).unwrap().is_none());
    }

    #[test]
    fn compact_alternates_stores_and_rejects_reentrancy() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        commit(&db, [6u8; 32], b"data");

        db.compact(&NoRetain, &CancelToken::new()).unwrap();
        db.compact(&NoRetain, &CancelToken::new()).unwrap();

        db.compacting.store(true, Ordering::SeqCst);
        let err = db.compact(&NoRetain, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn stats_reserved_is_max_not_sum() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        commit(&db, [7u8; 32], b"data");
        let stats = db.stats().unwrap();
        assert_eq!(stats.reserved, stats.s0.free_required.max(stats.s1.free_required));
        assert_eq!(stats.used_for_metadata, stats.s0.table_size_bytes + stats.s1.table_size_bytes);
    }

    #[tokio::test(start_paused = true)]
    async fn compaction_scheduler_runs_on_its_interval_then_stops_on_cancel() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Db::open(
            dir.path(),
            DbConfig {
                store: StoreConfig::for_testing(),
                compaction_interval_secs: 5,
            },
            Arc::new(ManualTimeSource::starting_at(0)),
        ).unwrap());
        commit(&db, [8u8; 32], b"scheduled");

        let cancel = CancelToken::new();
        let handle = db.clone().spawn_compaction_scheduler(Arc::new(NoRetain), cancel.clone());

        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(db.read(&Key::new([8u8; 32])).unwrap().is_some());

        cancel.cancel();
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        handle.await.unwrap();
    }
}
