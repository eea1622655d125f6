//! Time source abstraction
//!
//! Retry backoff and cache expiry read time through [`Clock`] so that tests can
//! drive them with a [`ManualClock`] instead of waiting on the wall clock.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{self, BoxFuture};
use parking_lot::Mutex;

/// Source of "now" and of suspension between retry attempts
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Suspends the caller for `duration`
    ///
    /// The returned future must be cancel-safe: dropping it abandons the sleep.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Wall-clock implementation backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Returns the shared system clock
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Virtual clock for tests
///
/// `sleep` completes immediately, records the requested duration and advances
/// virtual time by that amount. `advance` moves time forward without recording
/// a sleep, which is how cache expiry is exercised.
#[derive(Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

struct ManualState {
    origin: Instant,
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                origin: Instant::now(),
                offset: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Moves virtual time forward
    pub fn advance(&self, duration: Duration) {
        self.state.lock().offset += duration;
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    /// Total virtual time elapsed since construction
    pub fn elapsed(&self) -> Duration {
        self.state.lock().offset
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualClock")
            .field("offset", &state.offset)
            .field("sleeps", &state.sleeps.len())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.state.lock();
        state.origin + state.offset
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let mut state = self.state.lock();
        state.sleeps.push(duration);
        state.offset += duration;
        Box::pin(future::ready(()))
    }
}
