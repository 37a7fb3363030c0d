//! Clock owned by the scenario rather than read globally.
//! Every wait between sampling rounds goes through [`Clock::sleep`], so the
//! whole stall/recovery protocol can be driven by a [`ManualClock`] in tests
//! without any wall-clock delays.
use once_cell::sync::Lazy;
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

// Instant doesn't have a deterministic constructor, so the manual clock
// starts from a single snapshot of Instant::now() shared by all instances.
static FAKE_CLOCK_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Realtime clock.
#[derive(Debug, Clone)]
pub struct RealClock;

impl RealClock {
    /// Current time according to the monotone clock.
    pub fn now(&self) -> Instant {
        // tokio's now() so that `tokio::time::pause()` works in tests.
        tokio::time::Instant::now().into_std()
    }
}

struct ManualState {
    now: Instant,
    /// Every sleep requested so far, in order.
    sleeps: Vec<Duration>,
}

impl fmt::Debug for ManualState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ManualState")
            .field("elapsed", &self.now.duration_since(*FAKE_CLOCK_START))
            .field("sleeps", &self.sleeps.len())
            .finish()
    }
}

/// Fake clock which advances only when somebody sleeps on it (or when
/// advanced explicitly). Sleeping never blocks.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<ManualState>>);

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Constructs a manual clock set to the fake start time.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(ManualState {
            now: *FAKE_CLOCK_START,
            sleeps: vec![],
        })))
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // The state is a plain value, a poisoned lock still holds a usable one.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current time according to the monotone clock.
    pub fn now(&self) -> Instant {
        self.state().now
    }

    /// Time passed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.now().duration_since(*FAKE_CLOCK_START)
    }

    /// Advances the clock by `d`.
    pub fn advance(&self, d: Duration) {
        self.state().now += d;
    }

    /// Sleeps requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state().sleeps.clone()
    }

    fn sleep(&self, d: Duration) {
        let mut state = self.state();
        state.sleeps.push(d);
        state.now += d;
    }
}

/// An abstract clock.
/// We use a concrete enum rather than a trait to
/// avoid abstract method call in runtime.
#[derive(Debug, Clone)]
pub enum Clock {
    /// Realtime clock.
    Real(RealClock),
    /// Manual clock.
    Manual(ManualClock),
}

impl From<RealClock> for Clock {
    fn from(c: RealClock) -> Self {
        Self::Real(c)
    }
}

impl From<ManualClock> for Clock {
    fn from(c: ManualClock) -> Self {
        Self::Manual(c)
    }
}

impl Clock {
    /// Current time according to the monotone clock.
    pub fn now(&self) -> Instant {
        match self {
            Self::Real(c) => c.now(),
            Self::Manual(c) => c.now(),
        }
    }

    /// Suspends the caller until `d` passes. Non-busy.
    pub async fn sleep(&self, d: Duration) {
        match self {
            Self::Real(_) => tokio::time::sleep(d).await,
            Self::Manual(c) => c.sleep(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        let start = clock.now();
        let c = Clock::from(clock.clone());
        c.sleep(Duration::from_secs(40)).await;
        c.sleep(Duration::from_secs(10)).await;
        assert_eq!(c.now() - start, Duration::from_secs(50));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(40), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn manual_clocks_share_the_start() {
        let a = ManualClock::new();
        a.advance(Duration::from_millis(1500));
        let b = ManualClock::new();
        assert_eq!(a.now() - b.now(), Duration::from_millis(1500));
        assert_eq!(b.elapsed(), Duration::ZERO);
    }
}
