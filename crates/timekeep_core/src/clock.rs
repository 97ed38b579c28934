//! Time source abstraction.
//!
//! The sync engine never reads the system clock directly; every timestamp
//! (watermarks, retention cutoffs, default-workspace stamping) comes from a
//! [`TimeService`] so tests can pin time.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Provides the current time.
pub trait TimeService: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// A time service backed by the system clock.
#[derive(Debug, Default)]
pub struct SystemTimeService;

impl TimeService for SystemTimeService {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable time service for tests.
pub struct ManualTimeService {
    now: RwLock<DateTime<Utc>>,
}

impl ManualTimeService {
    /// Creates a manual time service pinned to the given instant.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Moves the clock to the given instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl TimeService for ManualTimeService {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
