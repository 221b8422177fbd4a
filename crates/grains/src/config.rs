//! Router and feed tuning.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Sizing of a [`GrainRouter`](crate::GrainRouter) worker pool.
///
/// Each worker owns a fixed slice of the key space and processes its
/// messages one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Number of single-writer workers. Clamped to at least one.
    pub workers: usize,

    /// Bounded queue length per worker.
    pub channel_capacity: usize,
}

impl RouterConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4),
            channel_capacity: 256,
        }
    }
}

/// Retry behaviour of a [`LogFeed`](crate::LogFeed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Retries per message before the feed gives up on it.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl FeedConfig {
    /// Backoff before retry number `attempt` (starting at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_router_has_workers() {
        let config = RouterConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.channel_capacity, 256);
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let config = FeedConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(500));
        assert_eq!(config.backoff(40), Duration::from_millis(500));
    }
}
