//! A lazily-populated map from placement id to its own [`Queue`], mirroring
//! `piecestore`'s per-namespace lazy instantiation over a `DashMap`.

use std::sync::Arc;

use core_common::TimeSource;
use dashmap::DashMap;

use crate::config::QueueConfig;
use crate::job::PlacementId;
use crate::queue::Queue;

/// Owns one [`Queue`] per placement, creating it on first reference.
pub struct QueueMap {
    config: QueueConfig,
    time_source: Arc<dyn TimeSource>,
    queues: DashMap<PlacementId, Arc<Queue>>,
}

impl QueueMap {
    /// Create an empty map. Every queue it lazily creates shares `config`
    /// and `time_source`.
    pub fn new(config: QueueConfig, time_source: Arc<dyn TimeSource>) -> QueueMap {
        QueueMap {
            config,
            time_source,
            queues: DashMap::new(),
        }
    }

    /// Return the queue for `placement`, creating it (and logging the
    /// placement id) the first time it is referenced.
    pub fn get_or_create(&self, placement: PlacementId) -> Arc<Queue> {
        if let Some(existing) = self.queues.get(&placement) {
            return Arc::clone(&existing);
        }
        Arc::clone(self.queues.entry(placement).or_insert_with(|| {
            tracing::info!(%placement, "creating repair queue for placement");
            Arc::new(Queue::new(self.config, Arc::clone(&self.time_source)))
        }))
    }

    /// Return the queue for `placement` only if it already exists, without
    /// creating one.
    pub fn get(&self, placement: PlacementId) -> Option<Arc<Queue>> {
        self.queues.get(&placement).map(|q| Arc::clone(&q))
    }

    /// Remove a placement's queue entirely, e.g. in response to a
    /// `TrimPlacement`/`Destroy` call that retires it. Returns it if it
    /// existed.
    pub fn remove(&self, placement: PlacementId) -> Option<Arc<Queue>> {
        self.queues.remove(&placement).map(|(_, q)| q)
    }

    /// The number of placements with an active queue.
    pub fn placement_count(&self) -> usize {
        self.queues.len()
    }

    /// Every placement id with an active queue.
    pub fn placements(&self) -> Vec<PlacementId> {
        self.queues.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_common::ManualTimeSource;

    fn map() -> QueueMap {
        QueueMap::new(
            QueueConfig::for_testing(),
            Arc::new(ManualTimeSource::starting_at(0)),
        )
    }

    #[test]
    fn get_or_create_returns_the_same_queue_on_repeat_calls() {
        let map = map();
        let a = map.get_or_create(PlacementId(1));
        let b = map.get_or_create(PlacementId(1));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_placements_get_distinct_queues() {
        let map = map();
        let a = map.get_or_create(PlacementId(1));
        let b = map.get_or_create(PlacementId(2));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(map.placement_count(), 2);
    }

    #[test]
    fn get_without_create_reports_absence() {
        let map = map();
        assert!(map.get(PlacementId(1)).is_none());
        map.get_or_create(PlacementId(1));
        assert!(map.get(PlacementId(1)).is_some());
    }

    #[test]
    fn remove_retires_a_placement() {
        let map = map();
        map.get_or_create(PlacementId(1));
        assert!(map.remove(PlacementId(1)).is_some());
        assert_eq!(map.placement_count(), 0);
    }
}
