//! Database system configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Tuning for query producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Buffered records between a producer and its consumer.
    pub iterator_capacity: usize,

    /// How long a producer waits on a full buffer before aborting.
    pub send_timeout: Duration,

    /// Keys read from a backend per lock acquisition.
    pub batch_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            iterator_capacity: 100,
            send_timeout: Duration::from_secs(1),
            batch_size: 64,
        }
    }
}

impl ScanConfig {
    /// Sets the iterator buffer capacity.
    #[must_use]
    pub const fn iterator_capacity(mut self, capacity: usize) -> Self {
        self.iterator_capacity = capacity;
        self
    }

    /// Sets the producer send timeout.
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the scan batch size.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
}

/// Configuration for initializing a [`crate::DatabaseSystem`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory.
    pub root_dir: PathBuf,

    /// How long the registry writer batches changes before flushing.
    pub registry_flush_delay: Duration,

    /// Query producer tuning.
    pub scan: ScanConfig,

    /// Pending events a subscription may buffer before it is failed.
    pub subscription_capacity: usize,
}

impl Config {
    /// Creates a configuration rooted at `root_dir` with default values.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            registry_flush_delay: Duration::from_secs(1),
            scan: ScanConfig::default(),
            subscription_capacity: 1000,
        }
    }

    /// Sets the registry batching delay.
    #[must_use]
    pub fn registry_flush_delay(mut self, delay: Duration) -> Self {
        self.registry_flush_delay = delay;
        self
    }

    /// Sets the query producer tuning.
    #[must_use]
    pub fn scan(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    /// Sets the subscription feed capacity.
    #[must_use]
    pub fn subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new("/tmp/recdb");
        assert_eq!(config.registry_flush_delay, Duration::from_secs(1));
        assert_eq!(config.subscription_capacity, 1000);
        assert_eq!(config.scan.send_timeout, Duration::from_secs(1));
        assert_eq!(config.scan.iterator_capacity, 100);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new("/tmp/recdb")
            .subscription_capacity(4)
            .scan(ScanConfig::default().batch_size(2).send_timeout(Duration::from_millis(50)));

        assert_eq!(config.subscription_capacity, 4);
        assert_eq!(config.scan.batch_size, 2);
        assert_eq!(config.scan.send_timeout, Duration::from_millis(50));
    }
}
