//! Time sources for window computations and client-facing reset times.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Thread-safe time source abstraction.
///
/// Window arithmetic uses `now` (monotonic seconds since an arbitrary
/// origin); only `wall_now` (UNIX epoch seconds) may be surfaced to
/// clients as a reset time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic seconds since this clock's origin.
    fn now(&self) -> f64;

    /// Wall-clock seconds since the UNIX epoch.
    fn wall_now(&self) -> f64;
}

/// Production clock: monotonic readings from an `Instant` epoch captured
/// at creation, wall readings from the system clock.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn wall_now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Settable clock for deterministic tests and embedders.
///
/// Monotonic and wall readings coincide, so reset times computed against a
/// `ManualClock` are directly comparable to `now`.
#[derive(Debug, Default)]
pub struct ManualClock {
    seconds: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            seconds: Mutex::new(start),
        }
    }

    /// Move the clock forward by `delta` seconds.
    pub fn advance(&self, delta: f64) {
        *self.seconds.lock() += delta;
    }

    /// Jump the clock to an absolute reading.
    pub fn set(&self, seconds: f64) {
        *self.seconds.lock() = seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.seconds.lock()
    }

    fn wall_now(&self) -> f64 {
        *self.seconds.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(10.0);
        assert_eq!(clock.now(), 10.0);

        clock.advance(5.5);
        assert_eq!(clock.now(), 15.5);
        assert_eq!(clock.wall_now(), 15.5);

        clock.set(100.0);
        assert_eq!(clock.now(), 100.0);
    }

    #[test]
    fn test_trait_object_usage() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0.0));
        assert_eq!(clock.now(), 0.0);
    }
}
