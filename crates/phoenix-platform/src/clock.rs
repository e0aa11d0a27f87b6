use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Indirection over wall-clock time so the timeout scanners and the
/// experiment reconciler (both driven by `now() - timestamp` comparisons)
/// can be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test double: starts at a fixed instant, advances only when told to.
#[derive(Clone)]
pub struct FrozenClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FrozenClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(instant)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().unwrap();
        *guard = *guard + delta;
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_advances_on_command_only() {
        let start = Utc::now();
        let clock = FrozenClock::at(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }
}
