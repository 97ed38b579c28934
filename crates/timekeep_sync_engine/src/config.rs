//! Configuration for the sync engine.

use chrono::Duration as ChronoDuration;
use std::time::Duration;

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time entries `InSync` and strictly older than this window are purged
    /// by the cleanup graph.
    pub retention_window: ChronoDuration,
    /// Maximum number of per-entity states in flight within one graph phase.
    pub max_concurrency: usize,
    /// Interval for automatic sync runs. `None` disables the timer.
    pub periodic_interval: Option<Duration>,
}

impl SyncConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            retention_window: ChronoDuration::days(56),
            max_concurrency: 4,
            periodic_interval: None,
        }
    }

    /// Sets the retention window for old time entries.
    pub fn with_retention_window(mut self, window: ChronoDuration) -> Self {
        self.retention_window = window;
        self
    }

    /// Sets the per-phase concurrency bound.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Enables periodic runs at the given interval.
    pub fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = Some(interval);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
