//! Crash harness for store durability: reopen a store after simulating a
//! crash at a known point and assert that durability invariants still hold
//! (tail truncation recovers, earlier corruption is a hard error, nothing
//! committed before the simulated crash is lost).

use std::path::Path;
use std::sync::Arc;

use core_common::{Key, ManualTimeSource, TimeSource};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::store::Store;
use crate::testing::corruption::LogCorruptionTester;

/// Where, relative to a commit, the crash is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// The log write never happened (simulated by not committing at all).
    BeforeAppend,
    /// The log write landed but the fsync is presumed not to have reached
    /// disk; simulated by truncating the tail record after the fact.
    AfterAppendBeforeFsync,
    /// The write and its fsync both completed; the record must survive
    /// reopening unchanged.
    AfterFsync,
}

/// Drives a sequence of commits against a fresh store, simulates a crash at
/// `point` after the last one, reopens the store, and reports what
/// survived.
pub struct CrashHarness {
    dir: std::path::PathBuf,
    config: StoreConfig,
}

impl CrashHarness {
    /// Create a harness rooted at `dir` using `config` for every store it
    /// opens.
    pub fn new(dir: impl AsRef<Path>, config: StoreConfig) -> Self {
        CrashHarness {
            dir: dir.as_ref().to_path_buf(),
            config,
        }
    }

    /// Commit `keys.len()` records of `payload` each, then simulate a crash
    /// at `point`, then reopen and return the reopened store plus which
    /// keys are readable afterward.
    pub fn run(&self, keys: &[[u8; 32]], payload: &[u8], point: CrashPoint) -> Result<CrashOutcome> {
        let clock: Arc<dyn TimeSource> = Arc::new(ManualTimeSource::starting_at(0));
        {
            let store = Store::open(&self.dir, self.config.clone(), clock.clone())?;
            let commit_count = match point {
                CrashPoint::BeforeAppend => keys.len().saturating_sub(1),
                _ => keys.len(),
            };
            for key in &keys[..commit_count] {
                let mut w = store.create(Key::new(*key), 0);
                w.write(payload);
                w.commit()?;
            }

            if point == CrashPoint::AfterAppendBeforeFsync {
                let tester = LogCorruptionTester::new(&self.dir);
                tester.truncate_tail(1)?;
            }
        }

        let reopened = Store::open(&self.dir, self.config.clone(), clock)?;
        let mut survived = Vec::new();
        for key in keys {
            if reopened.read(&Key::new(*key))?.is_some() {
                survived.push(*key);
            }
        }
        Ok(CrashOutcome {
            store: reopened,
            survived,
        })
    }
}

/// The result of running [`CrashHarness::run`].
pub struct CrashOutcome {
    /// The store reopened after the simulated crash.
    pub store: Store,
    /// Keys that were readable after reopening.
    pub survived: Vec<[u8; 32]>,
}
