//! Time source adapter that amortizes clock reads over a processing batch.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A monotonic time source.
pub trait Clock {
    /// Returns the time elapsed since an arbitrary, fixed origin.
    fn now(&self) -> Duration;
}

/// [`Clock`] backed by [`Instant`], with the origin at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A manually advanced [`Clock`] for simulations and tests.
///
/// Clones share the same time and read counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
    reads: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }

    /// Returns how often [`Clock::now`] has been called.
    pub fn reads(&self) -> u64 {
        self.reads.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.reads.set(self.reads.get() + 1);
        self.now.get()
    }
}

/// Wraps a [`Clock`] so that "now" is read once per batch.
///
/// The router calls [`update_cached_time`](Self::update_cached_time) at the
/// start of each batch and uses [`cached_time`](Self::cached_time) for all
/// timeout arithmetic inside it.
pub struct CachedTimer {
    clock: Box<dyn Clock>,
    cached: Duration,
}

impl CachedTimer {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        let cached = clock.now();
        Self { clock, cached }
    }

    /// Reads the underlying clock and stores the snapshot.
    pub fn update_cached_time(&mut self) {
        self.cached = self.clock.now();
    }

    /// Updates the snapshot and returns it.
    pub fn curr_time(&mut self) -> Duration {
        self.update_cached_time();
        self.cached
    }

    /// Returns the last snapshot without reading the clock.
    pub fn cached_time(&self) -> Duration {
        self.cached
    }
}

impl std::fmt::Debug for CachedTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTimer")
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cached_time_does_not_read_clock() {
        let clock = ManualClock::new();
        let mut timer = CachedTimer::new(Box::new(clock.clone()));
        assert_eq!(clock.reads(), 1);

        clock.advance(Duration::from_secs(3));
        assert_eq!(timer.cached_time(), Duration::ZERO);
        assert_eq!(timer.cached_time(), Duration::ZERO);
        assert_eq!(clock.reads(), 1);

        timer.update_cached_time();
        assert_eq!(timer.cached_time(), Duration::from_secs(3));
        assert_eq!(clock.reads(), 2);
    }

    #[test]
    fn test_curr_time_updates_snapshot() {
        let clock = ManualClock::new();
        let mut timer = CachedTimer::new(Box::new(clock.clone()));
        clock.advance(Duration::from_millis(250));
        assert_eq!(timer.curr_time(), Duration::from_millis(250));
        assert_eq!(timer.cached_time(), Duration::from_millis(250));
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        assert!(clock.now() >= first);
    }
}
