//! Per-placement queue tuning options.

/// Tuning for one [`crate::queue::Queue`] instance.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Hard upper bound on `repair_len + retry_len` for this placement.
    pub max_elements: usize,
    /// Seconds a failed job must wait before it becomes poppable again.
    pub retry_after_secs: i64,
    /// Initial reservation, in elements, for the backing `Vec`s.
    pub init_alloc: usize,
    /// Slack (in elements) tolerated between a `Vec`'s capacity and its
    /// length before `maybe_release_memory` shrinks it back down.
    pub mem_release_threshold: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_elements: 1_000_000,
            retry_after_secs: 30 * 60,
            init_alloc: 1024,
            mem_release_threshold: 4096,
        }
    }
}

impl QueueConfig {
    /// Construct with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration tuned for fast, deterministic tests: small capacity,
    /// short retry delay.
    pub fn for_testing() -> Self {
        QueueConfig {
            max_elements: 64,
            retry_after_secs: 60,
            init_alloc: 8,
            mem_release_threshold: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = QueueConfig::default();
        assert!(config.max_elements > 0);
        assert!(config.retry_after_secs > 0);
    }
}
