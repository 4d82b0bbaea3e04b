//! Monotonic time source for the pipeline's maintenance cadence

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Source of monotonic time and sleeps
#[async_trait(?Send)]
pub trait Clock {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Real time backed by tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait(?Send)]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when told to; sleeping advances it instantly
///
/// Clones share the same time, so a test can hold one handle while the
/// pipeline owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Rc<Cell<Duration>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }

    /// Time elapsed since the clock was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
