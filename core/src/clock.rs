//! Clock abstraction so domain timestamps are testable.

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
///
/// Production code uses [`SystemClock`]; tests use the fixed clock from
/// `flashmart-testing` for deterministic timestamps.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
