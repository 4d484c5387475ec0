use std::time::{Duration, Instant};

/// Interval of the progress-log ticker.
pub const LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Interval of the handler soft-flush ticker.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Verbose start/finish logs are suppressed when the stage range is at
/// most this many blocks.
pub const SHORT_RANGE_EXECUTION_THRESHOLD: u64 = 16;

/// A coarse ticker for synchronous loops: `tick()` reports whether the
/// interval elapsed since the last report, and resets.
#[derive(Debug)]
pub struct Ticker {
    every: Duration,
    last: Instant,
}

impl Ticker {
    /// Creates a ticker that first fires after `every`.
    pub fn new(every: Duration) -> Self {
        Self { every, last: Instant::now() }
    }

    /// True once per elapsed interval.
    pub fn tick(&mut self) -> bool {
        if self.last.elapsed() >= self.every {
            self.last = Instant::now();
            return true;
        }
        false
    }
}
