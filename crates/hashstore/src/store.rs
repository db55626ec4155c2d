//! A `Store` owns one log set plus one hash table: `Create`/`Read`/`Close`
//! plus background `Compact`. A `Db` (see [`crate::db`]) pairs two of these
//! per namespace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use core_common::{Key, TimeSource};
use parking_lot::Mutex;

use crate::compaction::{self, CancelToken, CompactionStats, Decision, RetainSource};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::fs::HandleRegistry;
use crate::frame::Record;
use crate::log::{self, LogReader, LogWriter};
use crate::table::{RecordRef, Table};

const TABLE_FILE_NAME: &str = "tbl";

struct WriteState {
    active_log_id: u32,
    writer: LogWriter,
}

/// One log set plus one hash table.
pub struct Store {
    dir: PathBuf,
    config: StoreConfig,
    time_source: Arc<dyn TimeSource>,
    handles: HandleRegistry,
    table_path: PathBuf,
    table: ArcSwap<Table>,
    write_state: Mutex<WriteState>,
    compacting: AtomicBool,
}

/// A key's record as returned by [`Store::read`].
#[derive(Debug, Clone)]
pub struct ReadHandle {
    /// The key that was looked up.
    pub key: Key,
    /// Day-epoch expiration, 0 = never.
    pub expires_at: u32,
    /// Day-epoch the record was created.
    pub created_at: u32,
    /// Whether the trash flag is currently set.
    pub trash: bool,
    /// The record's full payload.
    pub payload: Vec<u8>,
}

impl ReadHandle {
    /// Whether the underlying record carries the trash flag.
    pub fn is_trash(&self) -> bool {
        self.trash
    }
}

/// Table-level statistics returned by a store's `stats()` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// On-disk size of the hash table file in bytes.
    pub table_size_bytes: u64,
    /// Number of live (occupied) slots.
    pub live_records: u64,
    /// Total bytes occupied by this store's log files.
    pub total_bytes: u64,
    /// Space that must be free before this store can safely compact.
    pub free_required: u64,
}

/// A buffered write in progress. Bytes accumulate in memory until
/// [`Writer::commit`] appends the framed record and updates the table.
pub struct Writer<'s> {
    store: &'s Store,
    key: Key,
    expires_at: u32,
    payload: Vec<u8>,
}

impl<'s> Writer<'s> {
    /// Append bytes to the record's payload.
    pub fn write(&mut self, data: &[u8]) {
        self.payload.extend_from_slice(data);
    }

    /// Finish the write: append the framed record to the active log, update
    /// the table, and fsync. Nothing is visible to readers before this
    /// returns `Ok`.
    pub fn commit(self) -> Result<()> {
        self.store.append_record(self.key, self.expires_at, self.payload)
    }
}

impl Store {
    /// Open (creating if absent) the store rooted at `dir`.
    #[tracing::instrument(skip(config, time_source), fields(dir = %dir.display()))]
    pub fn open(dir: &Path, config: StoreConfig, time_source: Arc<dyn TimeSource>) -> Result<Store> {
        config
            .validate()
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        std::fs::create_dir_all(dir)?;

        let table_path = dir.join(TABLE_FILE_NAME);
        let table = if table_path.exists() {
            Table::load(&table_path)?
        } else {
            let fresh = Table::for_expected_records(1024, config.compaction.target_load_factor);
            fresh.save_atomic(&table_path)?;
            fresh
        };

        let log_ids = list_log_ids(dir)?;
        let (active_log_id, writer) = match log_ids.iter().max() {
            Some(&id) => (id, LogWriter::open_for_append(dir, id)?),
            None => (1, LogWriter::create(dir, 1)?),
        };

        tracing::info!(active_log_id, live_records = table.live_count(), "store opened");

        Ok(Store {
            dir: dir.to_path_buf(),
            config,
            time_source,
            handles: HandleRegistry::new(),
            table_path,
            table: ArcSwap::from_pointee(table),
            write_state: Mutex::new(WriteState {
                active_log_id,
                writer,
            }),
            compacting: AtomicBool::new(false),
        })
    }

    /// Begin a new write for `key`, expiring at `expires_at` (0 = never).
    pub fn create(&self, key: Key, expires_at: u32) -> Writer<'_> {
        Writer {
            store: self,
            key,
            expires_at,
            payload: Vec::new(),
        }
    }

    fn append_record(&self, key: Key, expires_at: u32, payload: Vec<u8>) -> Result<()> {
        let created_at = self.time_source.now_day_epoch();
        let record = Record {
            key,
            expires_at,
            created_at,
            flags: 0,
            payload,
        };

        let mut state = self.write_state.lock();
        let ptr = state.writer.append(&record)?;
        state.writer.sync()?;

        let rec_ref = RecordRef {
            key,
            log_id: ptr.log_id,
            offset: ptr.offset,
            length: ptr.length,
            expires_at,
            created_at,
            flags: 0,
            trash_time: 0,
        };
        self.insert_and_persist(&rec_ref)?;

        if state.writer.size() >= self.config.log_target_size {
            self.rotate_locked(&mut state)?;
        }
        Ok(())
    }

    /// Insert `rec_ref` into a fresh copy of the table, persist just that
    /// slot plus the header's live-count field, then publish the new copy.
    fn insert_and_persist(&self, rec_ref: &RecordRef) -> Result<()> {
        let current = self.table.load();
        let mut next = (**current).clone();
        let idx = next.insert(*rec_ref)?;
        Table::persist_slot(&self.table_path, idx, Some(rec_ref))?;
        Table::persist_live_count(&self.table_path, next.live_count())?;
        self.table.store(Arc::new(next));
        Ok(())
    }

    fn rotate_locked(&self, state: &mut WriteState) -> Result<()> {
        let next_id = state.active_log_id + 1;
        let new_writer = LogWriter::create(&self.dir, next_id)?;
        let old_writer = std::mem::replace(&mut state.writer, new_writer);
        let sealed_size = old_writer.seal()?;
        tracing::debug!(
            sealed_log_id = state.active_log_id,
            sealed_size,
            new_log_id = next_id,
            "log rotated"
        );
        state.active_log_id = next_id;
        Ok(())
    }

    /// Look up `key`. Returns `Ok(None)` if absent.
    pub fn read(&self, key: &Key) -> Result<Option<ReadHandle>> {
        let table = self.table.load();
        let rec_ref = match table.lookup(key) {
            Some(r) => *r,
            None => return Ok(None),
        };
        drop(table);

        let path = log::log_path(&self.dir, rec_ref.log_id);
        let _guard = self.handles.guard(&path);
        let mut reader = LogReader::open(&self.dir, rec_ref.log_id)?;
        let record = reader.read_record_at(rec_ref.offset)?;

        Ok(Some(ReadHandle {
            key: *key,
            expires_at: rec_ref.expires_at,
            created_at: rec_ref.created_at,
            trash: rec_ref.is_trash(),
            payload: record.payload,
        }))
    }

    /// Set the trash flag on `key`'s record. Idempotent: trashing an
    /// already-trashed record succeeds without changing `trash_time`.
    /// Returns `false` if the key is not present.
    pub fn mark_trash(&self, key: &Key) -> Result<bool> {
        let table = self.table.load();
        let existing = match table.lookup(key) {
            Some(r) => *r,
            None => return Ok(false),
        };
        drop(table);

        if existing.is_trash() {
            return Ok(true);
        }

        let mut trashed = existing;
        trashed.flags |= crate::table::FLAG_TRASH;
        trashed.trash_time = self.time_source.now_day_epoch();
        self.insert_and_persist(&trashed)?;
        tracing::debug!(key = %key, "marked trash");
        Ok(true)
    }

    /// Clear the trash flag on `key`'s record, provided the grace window has
    /// not yet elapsed. Returns `false` if the key is absent, not trashed,
    /// or past its grace period.
    pub fn restore(&self, key: &Key) -> Result<bool> {
        let table = self.table.load();
        let existing = match table.lookup(key) {
            Some(r) => *r,
            None => return Ok(false),
        };
        drop(table);

        if !existing.is_trash() {
            return Ok(false);
        }

        let now_day = self.time_source.now_day_epoch();
        let age = now_day.saturating_sub(existing.trash_time);
        if age >= self.config.compaction.trash_grace_days {
            return Ok(false);
        }

        let mut restored = existing;
        restored.flags &= !crate::table::FLAG_TRASH;
        restored.trash_time = 0;
        self.insert_and_persist(&restored)?;
        tracing::debug!(key = %key, "restored from trash");
        Ok(true)
    }

    /// Current table/log statistics.
    pub fn stats(&self) -> Result<TableStats> {
        let table = self.table.load();
        let table_size_bytes =
            (crate::table::HEADER_LEN + table.slot_count() * crate::table::SLOT_LEN) as u64;
        let total_bytes = self.total_log_bytes()?;
        let free_required =
            compaction::free_required(table_size_bytes, self.config.compaction.rewrite_multiple);
        let stats = TableStats {
            table_size_bytes,
            live_records: table.live_count(),
            total_bytes,
            free_required,
        };
        tracing::debug!(?stats, "store stats");
        Ok(stats)
    }

    fn total_log_bytes(&self) -> Result<u64> {
        let mut total = 0u64;
        for id in list_log_ids(&self.dir)? {
            total += std::fs::metadata(log::log_path(&self.dir, id))?.len();
        }
        Ok(total)
    }

    /// Run one compaction pass: consult `retain` for each live record,
    /// rewrite survivors into a fresh log, and atomically swap in a new
    /// table. Returns an error if another compaction is already running
    /// against this store, or if `cancel` is signalled mid-pass (in which
    /// case the output log/table are removed and the prior state remains
    /// authoritative).
    #[tracing::instrument(skip(self, retain, cancel))]
    pub fn compact(&self, retain: &dyn RetainSource, cancel: &CancelToken) -> Result<CompactionStats> {
        if self
            .compacting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Conflict(
                "compaction already in progress for this store".into(),
            ));
        }
        let result = self.compact_inner(retain, cancel);
        self.compacting.store(false, Ordering::SeqCst);
        result
    }

    fn compact_inner(&self, retain: &dyn RetainSource, cancel: &CancelToken) -> Result<CompactionStats> {
        let now_day = self.time_source.now_day_epoch();
        let bloom = retain.current_bloom_filter();
        let restore_before = retain.restore_before();
        let trash_grace_days = self.config.compaction.trash_grace_days;

        // Phase 1: snapshot the table and rotate so new writes land on a
        // fresh log id that this pass never touches.
        let (snapshot_table, rotated_out_ids, new_active_id) = {
            let mut state = self.write_state.lock();
            let snapshot = (**self.table.load()).clone();
            let old_ids: Vec<u32> = list_log_ids(&self.dir)?
                .into_iter()
                .filter(|id| *id != state.active_log_id)
                .collect();
            let sealed_active = state.active_log_id;
            self.rotate_locked(&mut state)?;
            let mut rotated_out = old_ids;
            rotated_out.push(sealed_active);
            (snapshot, rotated_out, state.active_log_id)
        };

        let output_log_id = new_active_id + 1;
        let mut output_writer = LogWriter::create(&self.dir, output_log_id)?;
        let estimate = snapshot_table.live_count().max(1) as usize;
        let mut new_table =
            Table::for_expected_records(estimate, self.config.compaction.target_load_factor);
        let mut stats = CompactionStats::default();
        let mut readers: HashMap<u32, LogReader> = HashMap::new();

        for rec in snapshot_table.iter_live() {
            if cancel.is_cancelled() {
                drop(output_writer);
                self.abort_compaction(output_log_id)?;
                return Err(Error::Cancelled);
            }

            let decision = compaction::classify(
                rec,
                now_day,
                bloom.as_deref(),
                restore_before,
                trash_grace_days,
            );
            if decision.is_drop() {
                match decision {
                    Decision::DropExpired => stats.dropped_expired += 1,
                    Decision::DropTrashGrace => stats.dropped_trash_grace += 1,
                    _ => unreachable!("is_drop() only matches the two drop variants"),
                }
                continue;
            }

            let reader = match readers.entry(rec.log_id) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(LogReader::open(&self.dir, rec.log_id)?)
                }
            };
            let mut record = reader.read_record_at(rec.offset)?;

            let mut new_ref = *rec;
            if decision == Decision::MarkTrash {
                record.flags |= crate::table::FLAG_TRASH;
                new_ref.flags |= crate::table::FLAG_TRASH;
                new_ref.trash_time = now_day;
                stats.marked_trash += 1;
            } else {
                stats.kept += 1;
            }

            let ptr = output_writer.append(&record)?;
            new_ref.log_id = ptr.log_id;
            new_ref.offset = ptr.offset;
            new_table.insert(new_ref)?;
        }
        output_writer.sync()?;

        // Phase 2: merge in anything written to the new active log while
        // this pass was scanning, then publish.
        {
            let _state = self.write_state.lock();
            let live_now = self.table.load();
            for rec in live_now.iter_live() {
                if rec.log_id == new_active_id {
                    new_table.insert(*rec)?;
                }
            }
            new_table.save_atomic(&self.table_path)?;
            self.table.store(Arc::new(new_table));
        }

        for id in rotated_out_ids {
            if id == new_active_id {
                continue;
            }
            self.handles
                .request_delete(&log::log_path(&self.dir, id))?;
        }

        tracing::info!(
            kept = stats.kept,
            dropped_expired = stats.dropped_expired,
            dropped_trash_grace = stats.dropped_trash_grace,
            marked_trash = stats.marked_trash,
            "compaction pass complete"
        );
        Ok(stats)
    }

    fn abort_compaction(&self, output_log_id: u32) -> Result<()> {
        log::remove_log(&self.dir, output_log_id)?;
        tracing::warn!(output_log_id, "compaction cancelled, output discarded");
        Ok(())
    }
}

fn list_log_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(suffix) = name.strip_prefix("log-") {
                if let Ok(id) = suffix.parse::<u32>() {
                    ids.push(id);
                }
            }
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::NoRetain;
    use core_common::ManualTimeSource;
    use tempfile::tempdir;

    fn open_store(dir: &Path) -> Store {
        Store::open(
            dir,
            StoreConfig::for_testing(),
            Arc::new(ManualTimeSource::starting_at(0)),
        )
        .unwrap()
    }

    fn commit(store: &Store, key: [u8; 32], expires_at: u32, payload: &[u8]) {
        let mut writer = store.create(Key::new(key), expires_at);
        writer.write(payload);
        writer.commit().unwrap();
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        commit(&store, [1u8; 32], 0, b"hello");

        let handle = store.read(&Key::new([1u8; 32])).unwrap().unwrap();
        assert_eq!(handle.payload, b"hello");
        assert!(!handle.is_trash());
    }

    #[test]
    fn read_missing_key_returns_none() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(store.read(&Key::new([9u8; 32])).unwrap().is_none());
    }

    #[test]
    fn reopening_store_recovers_table_and_log() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path());
            commit(&store, [2u8; 32], 0, b"persisted");
        }
        let reopened = open_store(dir.path());
        let handle = reopened.read(&Key::new([2u8; 32])).unwrap().unwrap();
        assert_eq!(handle.payload, b"persisted");
    }

    #[test]
    fn mark_trash_then_restore_within_grace_clears_flag() {
        let dir = tempdir().unwrap();
        let store = Store::open(
            dir.path(),
            StoreConfig::new().with_log_target_size(64 * 1024),
            Arc::new(ManualTimeSource::starting_at(0)),
        )
        .unwrap();
        commit(&store, [3u8; 32], 0, b"data");

        assert!(store.mark_trash(&Key::new([3u8; 32])).unwrap());
        assert!(store.read(&Key::new([3u8; 32])).unwrap().unwrap().is_trash());

        assert!(store.restore(&Key::new([3u8; 32])).unwrap());
        assert!(!store.read(&Key::new([3u8; 32])).unwrap().unwrap().is_trash());
    }

    #[test]
    fn mark_trash_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        commit(&store, [4u8; 32], 0, b"data");

        assert!(store.mark_trash(&Key::new([4u8; 32])).unwrap());
        let trash_time_1 = store.table.load().lookup(&Key::new([4u8; 32])).unwrap().trash_time;
        assert!(store.mark_trash(&Key::new([4u8; 32])).unwrap());
        let trash_time_2 = store.table.load().lookup(&Key::new([4u8; 32])).unwrap().trash_time;
        assert_eq!(trash_time_1, trash_time_2);
    }

    #[test]
    fn compact_drops_expired_records() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualTimeSource::starting_at(0));
        let store = Store::open(dir.path(), StoreConfig::for_testing(), clock.clone()).unwrap();
        commit(&store, [5u8; 32], 1, b"short-lived");
        clock.advance(86_400 * 2);

        let stats = store.compact(&NoRetain, &CancelToken::new()).unwrap();
        assert_eq!(stats.dropped_expired, 1);
        assert!(store.read(&Key::new([5u8; 32])).unwrap().is_none());
    }

    #[test]
    fn compact_keeps_live_records() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        commit(&store, [6u8; 32], 0, b"still alive");

        let stats = store.compact(&NoRetain, &CancelToken::new()).unwrap();
        assert_eq!(stats.kept, 1);
        let handle = store.read(&Key::new([6u8; 32])).unwrap().unwrap();
        assert_eq!(handle.payload, b"still alive");
    }

    #[test]
    fn second_concurrent_compaction_is_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.compacting.store(true, Ordering::SeqCst);
        let err = store.compact(&NoRetain, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn writes_during_compaction_scan_survive() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        commit(&store, [7u8; 32], 0, b"first");
        // A record written after this store's active log has rotated (as
        // compact() does internally) should still be present afterward;
        // here we simply assert a normal compaction preserves concurrent
        // state by re-reading post-compaction.
        let stats = store.compact(&NoRetain, &CancelToken::new()).unwrap();
        assert_eq!(stats.surviving(), 1);
        commit(&store, [8u8; 32], 0, b"second");
        assert!(store.read(&Key::new([8u8; 32])).unwrap().is_some());
    }

    #[test]
    fn stats_reports_free_required() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        commit(&store, [9u8; 32], 0, b"data");
        let stats = store.stats().unwrap();
        assert!(stats.table_size_bytes > 0);
        assert_eq!(stats.live_records, 1);
        assert!(stats.free_required >= 2 * stats.table_size_bytes);
    }
}
