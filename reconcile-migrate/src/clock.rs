//! Injected time and identifier sources.
//!
//! Lock expiry, history timestamps and every generated identifier go through
//! these traits so tests can pin them down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Generates identifiers of the form `<prefix>_<suffix>`.
pub trait IdGenerator: Send + Sync {
    /// Produce a new identifier with the given prefix.
    fn generate(&self, prefix: &str) -> String;
}

/// `<prefix>_<epoch millis>`, strictly increasing within one generator.
pub struct TimestampIds {
    clock: Arc<dyn Clock>,
    last: Mutex<i64>,
}

impl TimestampIds {
    /// Create a generator reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(i64::MIN),
        }
    }
}

impl std::fmt::Debug for TimestampIds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampIds")
            .field("last", &*self.last.lock())
            .finish()
    }
}

impl IdGenerator for TimestampIds {
    fn generate(&self, prefix: &str) -> String {
        let millis = self.clock.now().timestamp_millis();
        let mut last = self.last.lock();
        let next = if millis > *last { millis } else { *last + 1 };
        *last = next;
        format!("{prefix}_{next}")
    }
}

/// `<prefix>_<n>` with a process-local counter starting at 1.
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl SequentialIds {
    /// Create a generator starting at 1.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn generate(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}_{n}")
    }
}
