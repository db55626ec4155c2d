//! Store and DB configuration.

use crate::compaction::CompactionConfig;

/// Per-store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Size at which the active log is sealed and a successor allocated.
    pub log_target_size: u64,
    /// Compaction tuning (rewrite multiple, target load factor, trash grace).
    pub compaction: CompactionConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            log_target_size: 64 * 1024 * 1024,
            compaction: CompactionConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Create a new store configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log rotation target size (builder pattern).
    pub fn with_log_target_size(mut self, size: u64) -> Self {
        self.log_target_size = size;
        self
    }

    /// Set the compaction tuning knobs (builder pattern).
    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_target_size == 0 {
            return Err(ConfigError::LogTargetSizeZero);
        }
        Ok(())
    }

    /// A configuration tuned for fast, deterministic tests: small logs, no
    /// trash grace period.
    pub fn for_testing() -> Self {
        StoreConfig {
            log_target_size: 64 * 1024,
            compaction: CompactionConfig::for_testing(),
        }
    }
}

/// Per-namespace configuration pairing two stores.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Configuration shared by both of the DB's stores.
    pub store: StoreConfig,
    /// Cadence, in seconds, for [`crate::db::Db::spawn_compaction_scheduler`]'s
    /// background loop. A pass that finds the DB already compacting is
    /// skipped rather than queued.
    pub compaction_interval_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            store: StoreConfig::default(),
            compaction_interval_secs: 60 * 60,
        }
    }
}

impl DbConfig {
    /// Create a new DB configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration tuned for fast, deterministic tests.
    pub fn for_testing() -> Self {
        DbConfig {
            store: StoreConfig::for_testing(),
            compaction_interval_secs: 1,
        }
    }
}

/// Invalid store/DB configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `log_target_size` was zero, which would seal every log immediately.
    #[error("log_target_size must be greater than zero")]
    LogTargetSizeZero,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(StoreConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_log_target_size_is_rejected() {
        let config = StoreConfig::new().with_log_target_size(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LogTargetSizeZero)
        ));
    }

    #[test]
    fn testing_config_has_no_trash_grace() {
        let config = StoreConfig::for_testing();
        assert_eq!(config.compaction.trash_grace_days, 0);
    }
}
