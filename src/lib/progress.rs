//! Progress logging for long-running reads over large inputs.

use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

/// Thread-safe counter that logs a progress line each time the count crosses
/// an interval boundary.
///
/// # Example
///
/// ```
/// use adaptrim_lib::progress::ProgressTracker;
///
/// let tracker = ProgressTracker::new("Processed reads", 100);
/// tracker.add(250); // logs at 100 and 200
/// assert_eq!(tracker.count(), 250);
/// tracker.finish(); // logs "Processed reads 250 (done)"
/// ```
pub struct ProgressTracker {
    message: &'static str,
    interval: u64,
    count: AtomicU64,
}

impl ProgressTracker {
    /// Create a tracker logging `message <count>` every `interval` items.
    #[must_use]
    pub fn new(message: &'static str, interval: u64) -> Self {
        Self { message, interval: interval.max(1), count: AtomicU64::new(0) }
    }

    /// Add `additional` items, logging once per interval boundary crossed.
    pub fn add(&self, additional: u64) {
        if additional == 0 {
            return;
        }
        let previous = self.count.fetch_add(additional, Ordering::Relaxed);
        let updated = previous + additional;
        for crossed in (previous / self.interval + 1)..=(updated / self.interval) {
            info!("{} {}", self.message, crossed * self.interval);
        }
    }

    /// Log the final count.
    pub fn finish(&self) {
        let count = self.count.load(Ordering::Relaxed);
        info!("{} {} (done)", self.message, count);
    }

    /// The current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
