//! Time source shared by every component that stamps or expires records.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of "now" for TTL checks, queue timestamps and sweeps.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to. Millisecond resolution.
#[derive(Debug, Clone)]
pub struct ManualClock {
  millis: Arc<AtomicI64>,
}

impl ManualClock {
  /// Start at the given instant.
  pub fn at(start: DateTime<Utc>) -> Self {
    Self {
      millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
    }
  }

  /// Start at the given number of milliseconds since the epoch.
  pub fn at_millis(millis: i64) -> Self {
    Self {
      millis: Arc::new(AtomicI64::new(millis)),
    }
  }

  pub fn advance(&self, by: Duration) {
    self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
  }

  pub fn set_millis(&self, millis: i64) {
    self.millis.store(millis, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    from_millis(self.millis.load(Ordering::SeqCst))
  }
}

/// Convert epoch milliseconds back into a timestamp, saturating on overflow.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
  Utc
    .timestamp_millis_opt(millis)
    .single()
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances() {
    let clock = ManualClock::at_millis(1_000);
    assert_eq!(clock.now().timestamp_millis(), 1_000);

    clock.advance(Duration::milliseconds(500));
    assert_eq!(clock.now().timestamp_millis(), 1_500);

    clock.set_millis(0);
    assert_eq!(clock.now().timestamp_millis(), 0);
  }

  #[test]
  fn test_clones_share_time() {
    let clock = ManualClock::at_millis(0);
    let other = clock.clone();
    clock.advance(Duration::seconds(1));
    assert_eq!(other.now().timestamp_millis(), 1_000);
  }
}
