//! Log corruption test utilities.
//!
//! - Truncation: removes bytes from a log's tail (simulates a crash mid-write).
//! - Garbage: appends invalid bytes (simulates a partial write).
//! - Bit flip: flips bytes inside an existing record (simulates bit rot).

use std::path::{Path, PathBuf};

/// Corruption test utilities scoped to one store directory (an `s0` or `s1`
/// subdirectory, as opened by [`crate::store::Store::open`]).
pub struct LogCorruptionTester {
    store_dir: PathBuf,
}

impl LogCorruptionTester {
    /// Create a tester scoped to `store_dir`.
    pub fn new(store_dir: impl AsRef<Path>) -> Self {
        LogCorruptionTester {
            store_dir: store_dir.as_ref().to_path_buf(),
        }
    }

    /// List this store's log files in id order.
    pub fn list_logs(&self) -> std::io::Result<Vec<PathBuf>> {
        if !self.store_dir.exists() {
            return Ok(vec![]);
        }
        let mut logs: Vec<_> = std::fs::read_dir(&self.store_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("log-"))
            })
            .collect();
        logs.sort();
        Ok(logs)
    }

    /// The highest-numbered (most recently created) log file.
    pub fn latest_log(&self) -> std::io::Result<Option<PathBuf>> {
        Ok(self.list_logs()?.into_iter().last())
    }

    /// Truncate the latest log's tail by `bytes_to_remove`, simulating a
    /// torn write. Returns the new file size.
    pub fn truncate_tail(&self, bytes_to_remove: u64) -> std::io::Result<u64> {
        let Some(path) = self.latest_log()? else {
            return Ok(0);
        };
        let original = std::fs::metadata(&path)?.len();
        let new_size = original.saturating_sub(bytes_to_remove);
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_len(new_size)?;
        Ok(new_size)
    }

    /// Append arbitrary garbage bytes to the latest log's tail.
    pub fn append_garbage(&self, garbage: &[u8]) -> std::io::Result<()> {
        let Some(path) = self.latest_log()? else {
            return Ok(());
        };
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
        file.write_all(garbage)
    }

    /// Flip the byte at `offset` in the latest log, returning whether a log
    /// existed and the offset was in range.
    pub fn flip_byte(&self, offset: u64) -> std::io::Result<bool> {
        let Some(path) = self.latest_log()? else {
            return Ok(false);
        };
        let mut bytes = std::fs::read(&path)?;
        let idx = offset as usize;
        if idx >= bytes.len() {
            return Ok(false);
        }
        bytes[idx] ^= 0xff;
        std::fs::write(&path, bytes)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::Store;
    use core_common::{Key, ManualTimeSource};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write_one(store: &Store) {
        let mut w = store.create(Key::new([1u8; 32]), 0);
        w.write(b"payload bytes");
        w.commit().unwrap();
    }

    #[test]
    fn truncate_tail_shrinks_latest_log() {
        let dir = tempdir().unwrap();
        let store = Store::open(
            dir.path(),
            StoreConfig::for_testing(),
            Arc::new(ManualTimeSource::starting_at(0)),
        )
        .unwrap();
        write_one(&store);
        drop(store);

        let tester = LogCorruptionTester::new(dir.path());
        let before = std::fs::metadata(tester.latest_log().unwrap().unwrap())
            .unwrap()
            .len();
        let after = tester.truncate_tail(3).unwrap();
        assert_eq!(after, before - 3);
    }

    #[test]
    fn flip_byte_reports_out_of_range() {
        let dir = tempdir().unwrap();
        let store = Store::open(
            dir.path(),
            StoreConfig::for_testing(),
            Arc::new(ManualTimeSource::starting_at(0)),
        )
        .unwrap();
        write_one(&store);
        drop(store);

        let tester = LogCorruptionTester::new(dir.path());
        assert!(!tester.flip_byte(1_000_000).unwrap());
        assert!(tester.flip_byte(40).unwrap());
    }
}
