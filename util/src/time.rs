//! General time utility functions
//!
//! All control code works on plain millisecond timestamps (`u64`) so it can be driven by a
//! synthetic clock in tests. [`MonotonicClock`] provides the real one.

use chrono::{Duration, Utc};
use std::time::Instant;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Milliseconds since a fixed point in the past, never goes backwards.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Start a new clock, reading zero now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the clock was started.
    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Wall clock time in milliseconds since the unix epoch.
pub fn wall_clock_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(duration_to_seconds(Duration::milliseconds(1500)), Some(1.5));
        assert_eq!(duration_to_seconds(Duration::max_value()), None);
    }

    #[test]
    fn test_monotonic_clock() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.now_ms() >= a + 5);
    }
}
