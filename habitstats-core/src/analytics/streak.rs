//! Streak & completion engine
//!
//! Pure computation over one habit's check-in events. Events are first
//! collapsed into a set of check-in dates (a date with several non-failed
//! events counts once), and every statistic is derived from that set, so
//! the result does not depend on event order or duplicates.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::cadence::{completion_percentage, expected_check_ins};
use super::window::TimeRange;
use crate::types::{CheckInEvent, Habit, HabitStats};

/// Default length of the trailing window used when no time range is given.
pub const DEFAULT_TRAILING_DAYS: u32 = 30;

/// Which denominator the completion rate is computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionWindow {
    /// Check-in dates in the last N days (today included) over N
    Trailing(u32),
    /// Check-in dates since the range's period start over the cadence's
    /// expected check-ins
    Range(TimeRange),
}

impl Default for CompletionWindow {
    fn default() -> Self {
        CompletionWindow::Trailing(DEFAULT_TRAILING_DAYS)
    }
}

/// Deduplicated check-in dates of one habit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckInHistory {
    dates: BTreeSet<NaiveDate>,
    failed_count: i64,
}

impl CheckInHistory {
    pub fn from_events<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a CheckInEvent>,
    {
        let mut history = CheckInHistory::default();
        for event in events {
            if event.status.is_failed() {
                history.failed_count += 1;
            } else {
                history.dates.insert(event.date());
            }
        }
        history
    }

    /// Number of distinct check-in dates
    pub fn total_check_ins(&self) -> i64 {
        self.dates.len() as i64
    }

    pub fn failed_count(&self) -> i64 {
        self.failed_count
    }

    pub fn has_check_in(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn last_check_in_date(&self) -> Option<NaiveDate> {
        self.dates.iter().next_back().copied()
    }

    /// Consecutive check-in dates ending at `today`.
    ///
    /// Zero when `today` itself has no check-in.
    pub fn current_streak(&self, today: NaiveDate) -> i64 {
        let mut streak = 0;
        let mut day = today;
        while self.dates.contains(&day) {
            streak += 1;
            match day.pred_opt() {
                Some(prev) => day = prev,
                None => break,
            }
        }
        streak
    }

    /// Longest run of consecutive check-in dates.
    pub fn longest_streak(&self) -> i64 {
        let mut longest = 0i64;
        let mut run = 0i64;
        let mut prev: Option<NaiveDate> = None;

        for &date in &self.dates {
            run = match prev {
                Some(p) if (date - p).num_days() == 1 => run + 1,
                _ => 1,
            };
            longest = longest.max(run);
            prev = Some(date);
        }

        longest
    }

    /// Check-in dates within `[start, end]`, both inclusive.
    pub fn check_ins_between(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        if end < start {
            return 0;
        }
        self.dates.range(start..=end).count() as i64
    }
}

/// Compute the full stats row for one habit.
///
/// `now` is local time; its date is "today" for the current streak.
/// The returned `completion_rate` is a percentage.
pub fn compute_habit_stats(
    habit: &Habit,
    user_id: &str,
    events: &[CheckInEvent],
    now: NaiveDateTime,
    window: CompletionWindow,
) -> HabitStats {
    let history = CheckInHistory::from_events(events);
    let today = now.date();

    let completion_rate = match window {
        CompletionWindow::Trailing(days) => {
            let days = i64::from(days.max(1));
            // Windows reaching before the earliest date start there
            let start = today
                .checked_sub_signed(Duration::days(days - 1))
                .unwrap_or(NaiveDate::MIN);
            completion_percentage(history.check_ins_between(start, today), days)
        }
        CompletionWindow::Range(range) => {
            let start = range.period_start(now).date();
            let expected = expected_check_ins(&habit.cadence, start, today);
            completion_percentage(history.check_ins_between(start, today), expected)
        }
    };

    HabitStats {
        habit_id: habit.id,
        user_id: user_id.to_string(),
        total_check_ins: history.total_check_ins(),
        current_streak: history.current_streak(today),
        longest_streak: history.longest_streak(),
        completion_rate,
        last_check_in_date: history.last_check_in_date(),
        failed_count: history.failed_count(),
        updated_at: now,
    }
}
