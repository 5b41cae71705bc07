//! Process-wide "next update" countdown.
//!
//! The schedule is armed once at startup and again after every successful
//! ingestion cycle. A failed cycle leaves it untouched, so clients see the
//! refresh as overdue until the next cycle succeeds. Nothing is persisted:
//! a restart begins a fresh countdown.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Armed {
    last_update: DateTime<Utc>,
    next_update: DateTime<Utc>,
}

impl Armed {
    fn at(now: DateTime<Utc>, interval: Duration) -> Self {
        let delta = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
        Self {
            last_update: now,
            next_update: now
                .checked_add_signed(delta)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

/// Point-in-time view of the schedule handed to readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_update: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub next_update: DateTime<Utc>,
    /// Whole seconds until `next_update`, rounded up and never negative.
    pub time_remaining: u64,
}

#[derive(Debug)]
pub struct RefreshSchedule {
    state: RwLock<Armed>,
}

impl RefreshSchedule {
    /// Creates a schedule armed `interval` from now.
    pub fn new(interval: Duration) -> Self {
        Self::armed_at(Utc::now(), interval)
    }

    pub fn armed_at(now: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            state: RwLock::new(Armed::at(now, interval)),
        }
    }

    pub fn arm(&self, interval: Duration) {
        self.arm_at(Utc::now(), interval);
    }

    /// Overwrites both timestamps; repeated calls never accumulate.
    pub fn arm_at(&self, now: DateTime<Utc>, interval: Duration) {
        *self.state.write() = Armed::at(now, interval);
    }

    pub fn status(&self) -> RefreshStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> RefreshStatus {
        let armed = *self.state.read();
        RefreshStatus {
            last_update: armed.last_update,
            next_update: armed.next_update,
            time_remaining: seconds_until(armed.next_update, now),
        }
    }
}

fn seconds_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = deadline.signed_duration_since(now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}
