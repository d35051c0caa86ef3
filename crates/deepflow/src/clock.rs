//! Injectable time source
//!
//! Step transitions, run timestamps and router cooldowns all read time
//! through [`Clock`] so tests can drive them with a [`ManualClock`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the Unix epoch
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add_duration(*now, by);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Default shared clock
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Add a std duration to a timestamp, saturating at the far future
pub(crate) fn add_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_epoch();
        let start = clock.now();
        clock.advance(Duration::from_secs(30));
        assert_eq!((clock.now() - start).num_seconds(), 30);
    }

    #[test]
    fn test_add_duration_saturates() {
        let far = add_duration(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1));
        assert_eq!(far, DateTime::<Utc>::MAX_UTC);
    }
}
