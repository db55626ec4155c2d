//! Per-placement prioritized repair job queue.
//!
//! A [`queue::Queue`] holds the work for one placement: jobs ranked by
//! `segment_health` with a retry delay for recently-attempted failures and
//! capacity-bounded eviction of the lowest-priority entry. [`map::QueueMap`]
//! owns one queue per placement, created lazily. [`collector`] is an
//! unrelated but commonly co-located fan-out primitive used by repair
//! workers to gather results from multiple storage nodes.

pub mod collector;
pub mod config;
pub mod error;
pub mod job;
pub mod map;
pub mod queue;

pub use collector::{collect, CollectorConfig, Operation, Outcome};
pub use config::QueueConfig;
pub use error::{Error, Result};
pub use job::{Job, PlacementId};
pub use map::QueueMap;
pub use queue::{Queue, QueueStat};
