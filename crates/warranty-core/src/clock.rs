use jiff::Timestamp;
use std::sync::{Arc, Mutex};

/// Source of the current instant.
///
/// Every component that stamps or compares times takes a clock so the
/// warranty math (expiry, days remaining) can be exercised at fixed dates.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time of the clock
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            inner: Arc::new(Mutex::new(now)),
        }
    }

    /// Moves the clock to `target`. Moving backwards is allowed so tests can
    /// exercise clock skew.
    pub fn set(&self, target: Timestamp) {
        let mut now = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *now = target;
    }

    pub fn advance(&self, by: jiff::SignedDuration) {
        let mut now = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}
