//! Abstraction over wall-clock time so the scheduler can be driven by a fake
//! clock in tests instead of `SystemTime::now()`.

use std::{
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// A point in time, represented as seconds since the Unix epoch.
///
/// Mirrors what the original Python used `time.time()` for: a plain
/// monotonically-nondecreasing float, compared and subtracted freely.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Timestamp(f64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0.0);

    pub fn from_secs_f64(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self`. Negative if `self` precedes
    /// `earlier`.
    pub fn since(self, earlier: Timestamp) -> f64 {
        self.0 - earlier.0
    }
}

impl std::ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs.as_secs_f64())
    }
}

/// Source of the current time. Production code uses [`SystemClock`]; tests
/// use [`FakeClock`] to control elapsed time deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::from_secs_f64(elapsed.as_secs_f64())
    }
}

/// A clock that only moves when told to. Starts at [`Timestamp::EPOCH`].
pub struct FakeClock(Mutex<Timestamp>);

impl FakeClock {
    pub fn new() -> Self {
        Self(Mutex::new(Timestamp::EPOCH))
    }

    pub fn at(secs: f64) -> Self {
        Self(Mutex::new(Timestamp::from_secs_f64(secs)))
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.0.lock().expect("fake clock poisoned");
        *guard = *guard + by;
    }

    pub fn set(&self, secs: f64) {
        let mut guard = self.0.lock().expect("fake clock poisoned");
        *guard = Timestamp::from_secs_f64(secs);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Timestamp {
        *self.0.lock().expect("fake clock poisoned")
    }
}
