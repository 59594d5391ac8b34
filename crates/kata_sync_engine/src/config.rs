//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Operations drained concurrently per batch.
    pub batch_size: usize,
    /// Timeout applied to each individual remote call.
    pub call_timeout: Duration,
    /// Interval of the periodic background sync.
    pub background_interval: Duration,
    /// Run results retained in the bounded history.
    pub history_limit: usize,
    /// Age threshold for retention cleanup of completed operations and
    /// resolved conflicts.
    pub retention_days: i64,
}

impl SyncConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batch_size: 5,
            call_timeout: Duration::from_secs(10),
            background_interval: Duration::from_secs(15 * 60),
            history_limit: 10,
            retention_days: 7,
        }
    }

    /// Sets the drain batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the background sync interval.
    #[must_use]
    pub fn with_background_interval(mut self, interval: Duration) -> Self {
        self.background_interval = interval;
        self
    }

    /// Sets the history bound.
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Sets the retention age threshold in days.
    #[must_use]
    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_product_settings() {
        let config = SyncConfig::new();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.background_interval, Duration::from_secs(900));
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.retention_days, 7);
    }

    #[test]
    fn builder_overrides() {
        let config = SyncConfig::new()
            .with_batch_size(2)
            .with_call_timeout(Duration::from_millis(50))
            .with_history_limit(3);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.call_timeout, Duration::from_millis(50));
        assert_eq!(config.history_limit, 3);
    }

    #[test]
    fn builder_floors_degenerate_values() {
        let config = SyncConfig::new().with_batch_size(0).with_history_limit(0);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.history_limit, 1);
    }
}
