//! Time source for status derivation and reward bookkeeping.
//!
//! Status decisions use calendar dates only. The local day is taken in a
//! fixed UTC offset (the business timezone), so a run just after local
//! midnight sees the new day even while UTC is still on the previous one.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

/// Supplies the current instant and calendar date.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date in the business timezone.
    fn today(&self) -> NaiveDate;
}

/// Wall clock in a fixed business timezone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Creates a clock whose calendar day is taken at `offset`.
    #[must_use]
    pub const fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Clock whose calendar day is the UTC day.
    #[must_use]
    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }
}

/// Clock that only moves when told to. Used by tests and back-fills.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Creates a clock frozen at noon UTC of `date`.
    #[must_use]
    pub fn on(date: NaiveDate) -> Self {
        Self::new(noon(date))
    }

    /// Moves the clock to noon of `date`.
    pub fn set_today(&self, date: NaiveDate) {
        *self.lock() = noon(date);
    }

    /// Moves the clock forward by `days`.
    pub fn advance_days(&self, days: i64) {
        let mut now = self.lock();
        *now += Duration::days(days);
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.lock();
        *now += delta;
    }

    fn lock(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }

    fn today(&self) -> NaiveDate {
        self.lock().date_naive()
    }
}

fn noon(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc() + Duration::hours(12)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        let Some(date) = NaiveDate::from_ymd_opt(y, m, d) else {
            panic!("valid date");
        };
        date
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::on(date(2025, 8, 15));
        assert_eq!(clock.today(), date(2025, 8, 15));
        clock.advance_days(6);
        assert_eq!(clock.today(), date(2025, 8, 21));
        clock.set_today(date(2025, 1, 1));
        assert_eq!(clock.today(), date(2025, 1, 1));
    }

    #[test]
    fn advancing_by_hours_can_cross_midnight() {
        let clock = ManualClock::on(date(2025, 8, 15));
        clock.advance(Duration::hours(11));
        assert_eq!(clock.today(), date(2025, 8, 15));
        clock.advance(Duration::hours(1));
        assert_eq!(clock.today(), date(2025, 8, 16));
    }

    #[test]
    fn system_clock_offset_shifts_the_day() {
        let Some(far_east) = FixedOffset::east_opt(14 * 3600) else {
            panic!("valid offset");
        };
        let Some(far_west) = FixedOffset::west_opt(12 * 3600) else {
            panic!("valid offset");
        };
        let east = SystemClock::new(far_east).today();
        let west = SystemClock::new(far_west).today();
        assert!(east >= west);
        assert!(east - west <= Duration::days(2));
    }
}
