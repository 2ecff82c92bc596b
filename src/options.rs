use crate::constants;
use std::time::Duration;

/// Lock timing used by the indexer's read-merge-write cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerOptions {
    /// Maximum time one writer may hold an index lock
    pub lock_duration: Duration,
    /// How long to wait for a contended lock before abandoning the update
    pub lock_timeout: Duration,
    /// First backoff delay between lock attempts (doubles per attempt)
    pub lock_initial_delay: Duration,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            lock_duration: constants::DEFAULT_LOCK_DURATION,
            lock_timeout: constants::DEFAULT_LOCK_TIMEOUT,
            lock_initial_delay: constants::DEFAULT_LOCK_INITIAL_DELAY,
        }
    }
}

/// Builder for IndexerOptions
pub struct IndexerOptionsBuilder {
    options: IndexerOptions,
}

impl IndexerOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: IndexerOptions::default(),
        }
    }

    pub fn lock_duration(mut self, duration: Duration) -> Self {
        self.options.lock_duration = duration;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.options.lock_timeout = timeout;
        self
    }

    pub fn lock_initial_delay(mut self, delay: Duration) -> Self {
        self.options.lock_initial_delay = delay;
        self
    }

    pub fn build(self) -> IndexerOptions {
        self.options
    }
}

impl Default for IndexerOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
