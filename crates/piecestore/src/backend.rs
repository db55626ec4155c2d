//! `PieceBackend`: the storage-node-facing API layered over one
//! `hashstore::Db` (and one [`Retain`] instance) per namespace.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use core_common::{Key, TimeSource};
use dashmap::DashMap;
use hashstore::{CancelToken, CompactionStats, Db};

use crate::bloom::BloomFilter;
use crate::config::{PieceBackendConfig, RetainConfig};
use crate::error::{Error, Result};
use crate::header::HashAlgorithm;
use crate::reader::PieceReader;
use crate::retain::Retain;
use crate::writer::PieceWriter;

/// One namespace's underlying state: a paired store and its retention
/// manager. `PieceBackend` hands out `Arc<Namespace>` so a long-running
/// compaction task can hold a reference independent of the backend's map.
struct Namespace {
    db: Arc<Db>,
    retain: Arc<Retain>,
}

/// Aggregated space-usage figures for one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceUsage {
    /// Total bytes occupied by both stores' log files.
    pub used_total: u64,
    /// Sum of both stores' on-disk hash table sizes.
    pub used_for_metadata: u64,
    /// Headroom this namespace must keep free to run its next compaction.
    pub reserved: u64,
}

/// The piece-level backend: one `Db`+`Retain` pair per namespace, lazily
/// opened on first use.
pub struct PieceBackend {
    root: PathBuf,
    retain_root: PathBuf,
    config: PieceBackendConfig,
    retain_config: RetainConfig,
    time_source: Arc<dyn TimeSource>,
    namespaces: DashMap<Key, Arc<Namespace>>,
}

impl PieceBackend {
    /// Open a backend rooted at `root` (piece data) and `retain_root`
    /// (bloom filter / restore-time state).
    pub fn open(
        root: impl Into<PathBuf>,
        retain_root: impl Into<PathBuf>,
        config: PieceBackendConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> PieceBackend {
        PieceBackend {
            root: root.into(),
            retain_root: retain_root.into(),
            config,
            retain_config: RetainConfig::default(),
            time_source,
            namespaces: DashMap::new(),
        }
    }

    fn namespace(&self, namespace: Key) -> Result<Arc<Namespace>> {
        if let Some(existing) = self.namespaces.get(&namespace) {
            return Ok(Arc::clone(&existing));
        }

        let ns_dir = namespace.to_string();
        let db = Db::open(
            &self.root.join(&ns_dir),
            self.config.db.clone(),
            self.time_source.clone(),
        )?;
        let retain = Retain::open(&self.retain_root.join(&ns_dir))?;
        let created = Arc::new(Namespace {
            db: Arc::new(db),
            retain: Arc::new(retain),
        });

        // Another caller may have raced us to open the same namespace;
        // keep whichever entry won, the loser's `Db`/`Retain` are simply
        // dropped (no partial state was made visible to anyone).
        Ok(Arc::clone(
            self.namespaces.entry(namespace).or_insert(created).value(),
        ))
    }

    /// Begin a new piece write.
    #[tracing::instrument(skip(self))]
    pub fn writer(
        &self,
        namespace: Key,
        piece_id: Key,
        hash_algorithm: HashAlgorithm,
        expires_at: u32,
    ) -> Result<PieceWriter> {
        let ns = self.namespace(namespace)?;
        Ok(PieceWriter::new(
            Arc::clone(&ns.db),
            piece_id,
            hash_algorithm,
            expires_at,
            self.time_source.now_unix(),
        ))
    }

    /// Read back a piece. Returns [`Error::NotFound`] if absent from both
    /// of the namespace's stores.
    #[tracing::instrument(skip(self))]
    pub fn reader(&self, namespace: Key, piece_id: Key) -> Result<PieceReader> {
        let ns = self.namespace(namespace)?;
        let handle = ns.db.read(&piece_id)?.ok_or(Error::NotFound)?;
        PieceReader::from_handle(piece_id, handle)
    }

    /// Set the trash flag on a piece. Deferred removal happens on the next
    /// compaction pass once the configured grace period elapses.
    #[tracing::instrument(skip(self))]
    pub fn trash(&self, namespace: Key, piece_id: Key) -> Result<()> {
        let ns = self.namespace(namespace)?;
        if !ns.db.mark_trash(&piece_id)? {
            return Err(Error::NotFound);
        }
        tracing::debug!(piece_id = %piece_id, "piece trashed");
        Ok(())
    }

    /// Clear the trash flag on a piece, provided its grace window has not
    /// yet elapsed. Returns `false` if the piece was absent, not trashed,
    /// or past grace.
    #[tracing::instrument(skip(self))]
    pub fn restore(&self, namespace: Key, piece_id: Key) -> Result<bool> {
        let ns = self.namespace(namespace)?;
        Ok(ns.db.restore(&piece_id)?)
    }

    /// Aggregated space-usage figures for one namespace.
    pub fn space_usage(&self, namespace: Key) -> Result<SpaceUsage> {
        let ns = self.namespace(namespace)?;
        let stats = ns.db.stats()?;
        Ok(SpaceUsage {
            used_total: stats.s0.total_bytes + stats.s1.total_bytes,
            used_for_metadata: stats.used_for_metadata,
            reserved: stats.reserved,
        })
    }

    /// Run one compaction pass for `namespace`, consulting its `Retain`
    /// state for trash decisions.
    #[tracing::instrument(skip(self, cancel))]
    pub fn compact(&self, namespace: Key, cancel: &CancelToken) -> Result<CompactionStats> {
        let ns = self.namespace(namespace)?;
        Ok(ns.db.compact(&ns.retain, cancel)?)
    }

    /// Deliver a new bloom filter for `namespace`, overwriting any prior
    /// one. `created_at` is the day-epoch the satellite built the filter.
    pub fn queue_bloom_filter(&self, namespace: Key, created_at: u32, filter: BloomFilter) -> Result<()> {
        let ns = self.namespace(namespace)?;
        ns.retain.queue_bloom_filter(created_at, filter)
    }

    /// Build an empty bloom filter sized for this backend's configured
    /// default false-positive rate. A convenience for callers that build
    /// filters locally (primarily tests); the satellite's own filters
    /// arrive pre-built over the wire.
    pub fn new_bloom_filter(&self, expected_items: usize) -> BloomFilter {
        BloomFilter::with_capacity(expected_items, self.retain_config.default_bloom_false_positive_rate)
    }

    /// Set `namespace`'s restore-before watermark.
    pub fn set_restore_before(&self, namespace: Key, restore_before: u32) -> Result<()> {
        let ns = self.namespace(namespace)?;
        ns.retain.set_restore_before(restore_before)
    }

    /// Start `namespace`'s background compaction loop, running one pass
    /// every `compaction.interval` until `cancel` is requested. Returns the
    /// task handle so the caller can await shutdown.
    pub fn spawn_compaction_scheduler(
        &self,
        namespace: Key,
        cancel: CancelToken,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let ns = self.namespace(namespace)?;
        let retain: Arc<dyn hashstore::RetainSource> = ns.retain.clone();
        Ok(Arc::clone(&ns.db).spawn_compaction_scheduler(retain, cancel))
    }
}
