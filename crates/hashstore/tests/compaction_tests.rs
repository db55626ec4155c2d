//! Compaction scenarios: expiry, the two-phase trash-then-drop cycle, and
//! the derived `FreeRequired`/`UsedForMetadata` space accounting.

use std::sync::Arc;

use core_common::{Key, ManualTimeSource, TimeSource};
use hashstore::compaction::{BloomFilterSnapshot, CancelToken, NoRetain, RetainSource};
use hashstore::config::StoreConfig;
use hashstore::store::Store;
use tempfile::tempdir;

struct FixedRetain {
    bloom_created_at: u32,
    present: Vec<Key>,
    restore_before: Option<u32>,
}

impl BloomFilterSnapshot for FixedRetain {
    fn created_at(&self) -> u32 {
        self.bloom_created_at
    }
    fn contains(&self, key: &Key) -> bool {
        self.present.contains(key)
    }
}

impl RetainSource for FixedRetain {
    fn current_bloom_filter(&self) -> Option<Arc<dyn BloomFilterSnapshot>> {
        Some(Arc::new(FixedRetain {
            bloom_created_at: self.bloom_created_at,
            present: self.present.clone(),
            restore_before: self.restore_before,
        }))
    }
    fn restore_before(&self) -> Option<u32> {
        self.restore_before
    }
}

fn commit(store: &Store, key: [u8; 32], expires_at: u32, payload: &[u8]) {
    let mut w = store.create(Key::new(key), expires_at);
    w.write(payload);
    w.commit().unwrap();
}

#[test]
fn expired_records_are_gone_after_compaction() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualTimeSource::starting_at(0));
    let store = Store::open(dir.path(), StoreConfig::for_testing(), clock.clone()).unwrap();

    commit(&store, [1u8; 32], 5, b"ephemeral");
    clock.advance(86_400 * 10);

    let stats = store.compact(&NoRetain, &CancelToken::new()).unwrap();
    assert_eq!(stats.dropped_expired, 1);
    assert!(store.read(&Key::new([1u8; 32])).unwrap().is_none());
}

#[test]
fn key_absent_from_bloom_filter_is_trashed_then_dropped_after_grace() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualTimeSource::starting_at(1_000_000));
    let config = StoreConfig::new().with_compaction(
        hashstore::compaction::CompactionConfig {
            rewrite_multiple: 1.0,
            target_load_factor: 0.5,
            trash_grace_days: 7,
        },
    );
    let store = Store::open(dir.path(), config, clock.clone()).unwrap();

    commit(&store, [2u8; 32], 0, b"maybe garbage");

    let retain = FixedRetain {
        bloom_created_at: clock.now_day_epoch() + 1,
        present: vec![],
        restore_before: None,
    };
    let stats = store.compact(&retain, &CancelToken::new()).unwrap();
    assert_eq!(stats.marked_trash, 1);
    assert!(store.read(&Key::new([2u8; 32])).unwrap().unwrap().is_trash());

    clock.advance(86_400 * 8);
    let stats2 = store.compact(&retain, &CancelToken::new()).unwrap();
    assert_eq!(stats2.dropped_trash_grace, 1);
    assert!(store.read(&Key::new([2u8; 32])).unwrap().is_none());
}

#[test]
fn restore_window_protects_keys_created_before_it() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualTimeSource::starting_at(1_000_000));
    let store = Store::open(dir.path(), StoreConfig::for_testing(), clock.clone()).unwrap();

    commit(&store, [3u8; 32], 0, b"protected");
    let created_day = clock.now_day_epoch();

    let retain = FixedRetain {
        bloom_created_at: created_day + 100,
        present: vec![],
        restore_before: Some(created_day + 1),
    };
    let stats = store.compact(&retain, &CancelToken::new()).unwrap();
    assert_eq!(stats.marked_trash, 0);
    assert_eq!(stats.kept, 1);
    assert!(!store.read(&Key::new([3u8; 32])).unwrap().unwrap().is_trash());
}

#[test]
fn free_required_and_used_for_metadata_track_table_size() {
    let dir = tempdir().unwrap();
    let store = Store::open(
        dir.path(),
        StoreConfig::for_testing(),
        Arc::new(ManualTimeSource::starting_at(0)),
    )
    .unwrap();
    for i in 0..5u8 {
        commit(&store, [i; 32], 0, &[0u8; 1024]);
    }
    store.compact(&NoRetain, &CancelToken::new()).unwrap();

    let stats = store.stats().unwrap();
    assert!(stats.table_size_bytes > 0);
    assert!(stats.free_required >= 2 * stats.table_size_bytes);
}
