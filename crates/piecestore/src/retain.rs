//! Bloom Filter Manager (BFM) and Restore Time Manager (RTM): per-namespace
//! retention state that compaction consults through `hashstore`'s
//! `RetainSource` seam.
//!
//! Both managers persist to a single small file each, written with the
//! write-tmp/fsync/rename idiom used throughout this workspace for atomic
//! file replacement (see `hashstore::table::Table::save_atomic`). Reads are
//! a lock-free `ArcSwap` snapshot load so compaction never blocks on a
//! concurrent `queue`/`set` call.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use hashstore::{BloomFilterSnapshot, RetainSource};
use serde::{Deserialize, Serialize};

use crate::bloom::BloomFilter;
use crate::error::Result;

const BLOOM_FILE_NAME: &str = "bf";
const RESTORE_FILE_NAME: &str = "restore";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedBloom {
    created_at: u32,
    filter_bytes: Vec<u8>,
}

/// A point-in-time bloom filter delivery, satisfying `hashstore`'s
/// `BloomFilterSnapshot` so compaction can consult it without depending on
/// this crate.
#[derive(Debug)]
pub struct DeliveredFilter {
    created_at: u32,
    filter: BloomFilter,
}

impl BloomFilterSnapshot for DeliveredFilter {
    fn created_at(&self) -> u32 {
        self.created_at
    }

    fn contains(&self, key: &core_common::Key) -> bool {
        self.filter.contains(key)
    }
}

/// Per-namespace retention state: the satellite's most recent bloom filter
/// delivery and the operator's current restore-before watermark.
pub struct Retain {
    dir: PathBuf,
    bloom: ArcSwap<Option<Arc<DeliveredFilter>>>,
    restore_before: ArcSwap<Option<u32>>,
}

impl Retain {
    /// Open (creating if absent) the retain directory for one namespace,
    /// loading any previously persisted bloom filter / restore watermark.
    pub fn open(dir: &Path) -> Result<Retain> {
        fs::create_dir_all(dir)?;

        let bloom = match fs::read(dir.join(BLOOM_FILE_NAME)) {
            Ok(bytes) => {
                let persisted: PersistedBloom = bincode::deserialize(&bytes)
                    .map_err(|e| crate::error::Error::Corrupt(format!("bad bloom filter file: {e}")))?;
                let filter = BloomFilter::from_bytes(&persisted.filter_bytes)?;
                Some(Arc::new(DeliveredFilter {
                    created_at: persisted.created_at,
                    filter,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let restore_before = match fs::read(dir.join(RESTORE_FILE_NAME)) {
            Ok(bytes) => Some(
                bincode::deserialize(&bytes)
                    .map_err(|e| crate::error::Error::Corrupt(format!("bad restore file: {e}")))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Retain {
            dir: dir.to_path_buf(),
            bloom: ArcSwap::from_pointee(bloom),
            restore_before: ArcSwap::from_pointee(restore_before),
        })
    }

    /// Overwrite the current bloom filter delivery for this namespace.
    #[tracing::instrument(skip(self, filter), fields(dir = %self.dir.display()))]
    pub fn queue_bloom_filter(&self, created_at: u32, filter: BloomFilter) -> Result<()> {
        let persisted = PersistedBloom {
            created_at,
            filter_bytes: filter.to_bytes(),
        };
        write_atomic(&self.dir.join(BLOOM_FILE_NAME), &persisted)?;
        self.bloom.store(Arc::new(Some(Arc::new(DeliveredFilter { created_at, filter }))));
        tracing::debug!(created_at, "bloom filter queued");
        Ok(())
    }

    /// Set the restore-before watermark: keys created at or before this
    /// day-epoch are protected from being trashed by a newer bloom filter.
    #[tracing::instrument(skip(self), fields(dir = %self.dir.display()))]
    pub fn set_restore_before(&self, restore_before: u32) -> Result<()> {
        write_atomic(&self.dir.join(RESTORE_FILE_NAME), &restore_before)?;
        self.restore_before.store(Arc::new(Some(restore_before)));
        tracing::debug!(restore_before, "restore watermark set");
        Ok(())
    }

    /// The currently delivered bloom filter's creation day-epoch, if any.
    pub fn bloom_created_at(&self) -> Option<u32> {
        (**self.bloom.load()).as_ref().map(|f| f.created_at)
    }

    /// The currently set restore-before watermark, if any.
    pub fn current_restore_before(&self) -> Option<u32> {
        **self.restore_before.load()
    }
}

impl RetainSource for Retain {
    fn current_bloom_filter(&self) -> Option<Arc<dyn BloomFilterSnapshot>> {
        (**self.bloom.load())
            .as_ref()
            .map(|f| Arc::clone(f) as Arc<dyn BloomFilterSnapshot>)
    }

    fn restore_before(&self) -> Option<u32> {
        **self.restore_before.load()
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value)
        .map_err(|e| crate::error::Error::Corrupt(format!("failed to encode retain state: {e}")))?;
    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = fs::File::create(&tmp_path)?;
        use std::io::Write;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_common::Key;
    use tempfile::tempdir;

    #[test]
    fn fresh_retain_has_no_bloom_or_restore() {
        let dir = tempdir().unwrap();
        let retain = Retain::open(dir.path()).unwrap();
        assert!(retain.current_bloom_filter().is_none());
        assert!(retain.restore_before().is_none());
    }

    #[test]
    fn queued_bloom_filter_is_readable_through_retain_source() {
        let dir = tempdir().unwrap();
        let retain = Retain::open(dir.path()).unwrap();
        let mut filter = BloomFilter::with_capacity(10, 0.01);
        let key = Key::new([5u8; 32]);
        filter.insert(&key);
        retain.queue_bloom_filter(100, filter).unwrap();

        let snapshot = retain.current_bloom_filter().unwrap();
        assert_eq!(snapshot.created_at(), 100);
        assert!(snapshot.contains(&key));
    }

    #[test]
    fn restore_before_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let retain = Retain::open(dir.path()).unwrap();
            retain.set_restore_before(42).unwrap();
        }
        let reopened = Retain::open(dir.path()).unwrap();
        assert_eq!(reopened.restore_before(), Some(42));
    }

    #[test]
    fn bloom_filter_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let key = Key::new([9u8; 32]);
        {
            let retain = Retain::open(dir.path()).unwrap();
            let mut filter = BloomFilter::with_capacity(10, 0.01);
            filter.insert(&key);
            retain.queue_bloom_filter(7, filter).unwrap();
        }
        let reopened = Retain::open(dir.path()).unwrap();
        let snapshot = reopened.current_bloom_filter().unwrap();
        assert_eq!(snapshot.created_at(), 7);
        assert!(snapshot.contains(&key));
    }
}
