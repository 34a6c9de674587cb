//! Periodic budget reset timestamp.

use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Holds the next instant at which all plan spends are zeroed.
///
/// Starts at UTC midnight of the day it was created, so the first admission
/// check after startup performs a reset and aligns the schedule.
#[derive(Debug)]
pub struct ResetSchedule {
    next_reset: Mutex<DateTime<Utc>>,
    duration: Duration,
}

impl ResetSchedule {
    /// Schedule anchored at midnight of `start`'s day, repeating every `duration`.
    pub fn new(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            next_reset: Mutex::new(start_of_day(start)),
            duration: duration.max(Duration::milliseconds(1)),
        }
    }

    /// Interval between resets.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The currently scheduled reset instant.
    pub fn next_reset(&self) -> DateTime<Utc> {
        *self.lock()
    }

    /// Whether a reset is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= *self.lock()
    }

    /// Move the schedule strictly past `now` if a reset is due.
    ///
    /// Skips over every missed interval at once. Returns `true` only for the
    /// caller that actually moved it, so concurrent callers reset once.
    pub fn advance(&self, now: DateTime<Utc>) -> bool {
        let mut next = self.lock();
        if now < *next {
            return false;
        }
        let elapsed = (now - *next).num_milliseconds();
        let interval = self.duration.num_milliseconds();
        let intervals = elapsed / interval + 1;
        *next += Duration::milliseconds(intervals * interval);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.next_reset
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(at)
}
