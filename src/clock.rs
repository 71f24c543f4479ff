//! Monotonic snapshot clock
//!
//! Snapshot end times must be strictly increasing. Wall clocks are not: NTP can
//! step them backward, and two polls can land in the same second. This clock
//! hands out unix seconds that never repeat or go backward.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A clock source that guarantees strictly increasing second timestamps.
#[derive(Debug, Default)]
pub struct BoundedClock {
    /// High-water mark: the largest timestamp we've ever returned (seconds)
    high_water: AtomicI64,
}

impl BoundedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock whose first timestamp is later than `secs`.
    pub fn starting_after(secs: i64) -> Self {
        Self {
            high_water: AtomicI64::new(secs),
        }
    }

    /// Returns a strictly increasing unix timestamp in seconds.
    ///
    /// If the wall clock has not advanced past the previous value, returns the
    /// previous high-water mark + 1s instead.
    pub fn now_secs(&self) -> i64 {
        let wall = Utc::now().timestamp();
        loop {
            let prev = self.high_water.load(Ordering::Acquire);
            let ts = wall.max(prev + 1);
            match self.high_water.compare_exchange_weak(
                prev,
                ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ts,
                Err(_) => continue, // CAS failed, retry
            }
        }
    }

    /// Raise the high-water mark so later timestamps are after `secs`.
    pub fn observe(&self, secs: i64) {
        self.high_water.fetch_max(secs, Ordering::AcqRel);
    }
}
