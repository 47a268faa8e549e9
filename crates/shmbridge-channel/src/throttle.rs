use std::sync::atomic::{AtomicU64, Ordering};

/// Default interval for repeated-failure logging.
pub const DEFAULT_LOG_EVERY: u64 = 200;

/// Rate limiter for log lines emitted on every poll of a bad slot.
///
/// Fires on the first occurrence and then on every `every`th one.
#[derive(Debug)]
pub struct LogThrottle {
    every: u64,
    count: AtomicU64,
}

impl LogThrottle {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            count: AtomicU64::new(0),
        }
    }

    /// Record one occurrence. Returns the running total when it should be
    /// logged.
    pub fn hit(&self) -> Option<u64> {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if n == 1 || n % self.every == 0 {
            Some(n)
        } else {
            None
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_EVERY)
    }
}
