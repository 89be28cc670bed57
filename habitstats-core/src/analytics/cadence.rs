//! Cadence expectation model
//!
//! Answers "how many check-ins should this habit have by now?" for an
//! arbitrary window, which is the denominator of every window-relative
//! completion rate.

use chrono::{Datelike, NaiveDate};

use crate::types::{Cadence, Frequency};

/// Number of calendar days in `[start, end]`, both inclusive.
///
/// Zero when `end` is before `start`.
pub fn days_in_window(start: NaiveDate, end: NaiveDate) -> i64 {
    ((end - start).num_days() + 1).max(0)
}

/// Expected check-ins for a cadence over `[start, end]` (dates inclusive).
///
/// - daily: days whose ISO weekday is in `checkin_days`
/// - weekly: `ceil(days / 7)`
/// - monthly: 1, or 2 when `start` and `end` are in different months
/// - anything else: 0
///
/// The monthly rule only compares the two months; it does not count how
/// many month boundaries lie between them.
pub fn expected_check_ins(cadence: &Cadence, start: NaiveDate, end: NaiveDate) -> i64 {
    let days = days_in_window(start, end);
    if days == 0 {
        return 0;
    }

    match cadence.frequency {
        Frequency::Daily => start
            .iter_days()
            .take(days as usize)
            .filter(|d| cadence.checkin_days.contains_date(*d))
            .count() as i64,
        Frequency::Weekly => (days + 6) / 7,
        Frequency::Monthly => {
            if (start.year(), start.month()) != (end.year(), end.month()) {
                2
            } else {
                1
            }
        }
        Frequency::Other(_) => 0,
    }
}

/// Whether the cadence asks for a check-in on this specific date.
///
/// Only daily habits are tied to particular days; weekly and monthly habits
/// never count toward a single day's denominator.
pub fn expects_check_in_on(cadence: &Cadence, date: NaiveDate) -> bool {
    cadence.frequency == Frequency::Daily && cadence.checkin_days.contains_date(date)
}

/// Successful check-ins over expected, as a 0-1 fraction.
///
/// Returns 0 when nothing was expected. The result can exceed 1 when a
/// habit was checked in more often than its cadence asks for.
pub fn completion_fraction(successful: i64, expected: i64) -> f64 {
    if expected <= 0 {
        0.0
    } else {
        successful as f64 / expected as f64
    }
}

/// Successful check-ins over expected, as a 0-100 percentage.
pub fn completion_percentage(successful: i64, expected: i64) -> f64 {
    if expected <= 0 {
        0.0
    } else {
        successful as f64 * 100.0 / expected as f64
    }
}
