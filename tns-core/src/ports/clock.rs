use std::cell::Cell;
use std::time::Duration;
use time::OffsetDateTime;

/// A source of the current time.
///
/// Every interval-state evaluation takes its time from a `Clock` passed in by
/// the caller, so simulations can run in simulated time.
pub trait Clock {
    /// The current time
    fn now(&self) -> OffsetDateTime;
}

/// The wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to
#[derive(Clone, Debug)]
pub struct SimulatedClock {
    now: Cell<OffsetDateTime>,
}

impl SimulatedClock {
    /// Create a clock stopped at `start`
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Jump to `now`
    pub fn set(&self, now: OffsetDateTime) {
        self.now.set(now);
    }

    /// Move forward by `delta`
    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> OffsetDateTime {
        self.now.get()
    }
}
