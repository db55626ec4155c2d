//! File-handle platform layer.
//!
//! Log files and hash table files are exclusively owned by the `Store` that
//! created them, but a handle can legitimately outlive the path it was
//! opened from: a concurrent process (or a racing compaction pass in this
//! same process) may unlink the file out from under an open reader. On
//! POSIX this is harmless — the inode stays alive until the last descriptor
//! closes — but the engine is written to tolerate platforms where
//! delete-while-open is forbidden too: deletes are routed through
//! [`HandleRegistry`], which defers the actual unlink until every tracked
//! handle for that path has closed.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Open a file for reading only. Reopens lazily tolerate the file having
/// been removed and recreated between calls by returning the fresh handle;
/// callers that hit `ErrorKind::NotFound` should treat it the same as a
/// cache miss rather than a hard error, since the corresponding record may
/// simply have been compacted away.
pub fn open_read(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

/// Open a file for reading and appending (the log's "current" writer).
pub fn open_read_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// Create a new file, failing if one already exists at `path`.
pub fn create(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
}

/// Per-path open-handle accounting used to defer deletes.
///
/// A `Store` holds one registry shared by every log/table path it manages.
/// Readers register/unregister around the span of a single operation;
/// `request_delete` only unlinks immediately when no operation currently
/// holds the path open, otherwise it records the path as pending and a
/// later `unregister` performs the unlink.
#[derive(Clone, Default)]
pub struct HandleRegistry {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    open_counts: HashMap<PathBuf, usize>,
    pending_deletes: HashMap<PathBuf, ()>,
}

impl HandleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        HandleRegistry::default()
    }

    /// Mark one more in-flight operation against `path`.
    pub fn register(&self, path: &Path) {
        let mut inner = self.inner.lock();
        *inner.open_counts.entry(path.to_path_buf()).or_insert(0) += 1;
    }

    /// Release one in-flight operation against `path`. If this was the last
    /// one and a delete was requested in the meantime, perform it now.
    pub fn unregister(&self, path: &Path) {
        let mut inner = self.inner.lock();
        let mut should_delete = false;
        if let Some(count) = inner.open_counts.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                inner.open_counts.remove(path);
                should_delete = inner.pending_deletes.remove(path).is_some();
            }
        }
        if should_delete {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Remove `path`, deferring if it is currently registered as open.
    ///
    /// Returns `Ok(())` whether the delete happened immediately or was
    /// queued; a queued delete is not itself an error condition.
    pub fn request_delete(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.open_counts.contains_key(path) {
            inner.pending_deletes.insert(path.to_path_buf(), ());
            Ok(())
        } else {
            drop(inner);
            match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        }
    }

    /// A scoped guard that registers on construction and unregisters on
    /// drop, so a reader can't race a delete issued mid-operation.
    pub fn guard(&self, path: &Path) -> HandleGuard<'_> {
        self.register(path);
        HandleGuard {
            registry: self,
            path: path.to_path_buf(),
        }
    }
}

/// RAII guard returned by [`HandleRegistry::guard`].
pub struct HandleGuard<'a> {
    registry: &'a HandleRegistry,
    path: PathBuf,
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister(&self.path);
    }
}
