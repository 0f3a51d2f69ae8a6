//! Local clock sources.
//!
//! `MonotonicClock` is what the kiosk runs on: ticks come from `Instant`, so
//! wall-clock steps (NTP, DST, manual changes) never distort slew pacing.
//! `ManualClock` is driven by hand and backs the simulations in the tests.

use crate::traits::ClockSource;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    fn now_tick(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn wall_clock_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock. Clones share the same underlying counters.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    tick: Arc<AtomicU64>,
    wall: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(tick: u64, wall_ms: i64) -> Self {
        ManualClock {
            tick: Arc::new(AtomicU64::new(tick)),
            wall: Arc::new(AtomicI64::new(wall_ms)),
        }
    }

    /// Advance both the tick counter and the wall clock, as in normal running.
    pub fn advance(&self, ms: u64) {
        self.tick.fetch_add(ms, Ordering::SeqCst);
        self.wall.fetch_add(ms as i64, Ordering::SeqCst);
    }

    /// Move only the wall clock (system time adjustment, or a suspend where
    /// the monotonic counter stood still).
    pub fn step_wall(&self, delta_ms: i64) {
        self.wall.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    fn wall_clock_ms(&self) -> i64 {
        self.wall.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_decreases() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now_tick();
        for _ in 0..1000 {
            let now = clock.now_tick();
            assert!(now >= prev);
            prev = now;
        }
    }

    #[test]
    fn test_monotonic_wall_clock_is_unix_ms() {
        let clock = MonotonicClock::new();
        // Anything after 2020-01-01 is a plausible Unix millisecond value
        assert!(clock.wall_clock_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(0, 1_000);
        let other = clock.clone();

        clock.advance(250);
        assert_eq!(other.now_tick(), 250);
        assert_eq!(other.wall_clock_ms(), 1_250);

        other.step_wall(-1_000);
        assert_eq!(clock.now_tick(), 250);
        assert_eq!(clock.wall_clock_ms(), 250);
    }
}
