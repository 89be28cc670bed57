//! Windowed aggregation
//!
//! Rolls per-habit completion up to a per-user report for the current
//! week, month, quarter or year. Everything in this module is pure; the
//! cache lookup and persistence live in [`crate::service`].
//!
//! Rates here are 0-1 fractions (see [`super::cadence::completion_fraction`]),
//! unlike the percentage stored in [`crate::types::HabitStats`].

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::cadence::{completion_fraction, expected_check_ins, expects_check_in_on};
use crate::error::Error;
use crate::types::{CheckInEvent, Habit, HabitStats};

/// Calendar window anchored to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeRange {
    pub const ALL: [TimeRange; 4] = [
        TimeRange::Week,
        TimeRange::Month,
        TimeRange::Quarter,
        TimeRange::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Week => "week",
            TimeRange::Month => "month",
            TimeRange::Quarter => "quarter",
            TimeRange::Year => "year",
        }
    }

    /// Midnight of the first day of the window containing `now`.
    ///
    /// Weeks start on Monday; quarters start in January, April, July and
    /// October.
    pub fn period_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date();
        let start = match self {
            TimeRange::Week => {
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
            }
            TimeRange::Month => first_of_month(today.year(), today.month()),
            TimeRange::Quarter => {
                let quarter_month = (today.month() - 1) / 3 * 3 + 1;
                first_of_month(today.year(), quarter_month)
            }
            TimeRange::Year => first_of_month(today.year(), 1),
        };
        start.and_time(NaiveTime::MIN)
    }

    /// Human-readable label for the window containing `now`.
    pub fn period_label(&self, now: NaiveDateTime) -> String {
        let today = now.date();
        match self {
            TimeRange::Week => format!(
                "{} to {}",
                self.period_start(now).format("%Y-%m-%d"),
                today.format("%Y-%m-%d")
            ),
            TimeRange::Month => format!("{} {}", month_name(today.month()), today.year()),
            TimeRange::Quarter => format!("{} Q{}", today.year(), (today.month() - 1) / 3 + 1),
            TimeRange::Year => format!("{}", today.year()),
        }
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TimeRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "week" => Ok(TimeRange::Week),
            "month" => Ok(TimeRange::Month),
            "quarter" => Ok(TimeRange::Quarter),
            "year" => Ok(TimeRange::Year),
            _ => Err(Error::InvalidTimeRange(s.to_string())),
        }
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    // Day 1 exists for every valid month
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        12 => "December",
        _ => "Unknown",
    }
}

/// One habit's performance inside a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitWindowStats {
    pub id: i64,
    pub name: String,
    /// Successful check-ins over expected (fraction)
    pub completion_rate: f64,
    /// Current streak from the habit's stats row
    pub streak: i64,
    pub total_completions: i64,
    pub missed_days: i64,
}

/// Completion rate of one calendar day across all habits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub completion_rate: f64,
}

/// Result of aggregating one window from raw events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowAggregate {
    pub overall_completion_rate: f64,
    pub total_check_ins: i64,
    pub total_failed: i64,
    pub best_habit: Option<HabitWindowStats>,
    pub worst_habit: Option<HabitWindowStats>,
    pub habit_stats: Vec<HabitWindowStats>,
    pub daily_trend: Vec<TrendPoint>,
}

/// Aggregate a window for one user.
///
/// `habits` is iterated in order; that order decides best/worst ties.
/// `streaks` maps habit id to its current streak (missing means 0).
/// Events before `period_start` or for habits not in `habits` are ignored.
pub fn aggregate_window(
    habits: &[Habit],
    events: &[CheckInEvent],
    streaks: &HashMap<i64, i64>,
    period_start: NaiveDate,
    today: NaiveDate,
) -> WindowAggregate {
    let habit_ids: HashSet<i64> = habits.iter().map(|h| h.id).collect();
    let in_window: Vec<&CheckInEvent> = events
        .iter()
        .filter(|e| habit_ids.contains(&e.habit_id) && e.date() >= period_start)
        .collect();

    let mut result = WindowAggregate::default();

    for habit in habits {
        let (successful, failed) = in_window
            .iter()
            .filter(|e| e.habit_id == habit.id)
            .fold((0i64, 0i64), |(ok, bad), e| {
                if e.is_success() {
                    (ok + 1, bad)
                } else {
                    (ok, bad + 1)
                }
            });

        let expected = expected_check_ins(&habit.cadence, period_start, today);
        let stat = HabitWindowStats {
            id: habit.id,
            name: habit.name.clone(),
            completion_rate: completion_fraction(successful, expected),
            streak: streaks.get(&habit.id).copied().unwrap_or(0),
            total_completions: successful,
            missed_days: (expected - successful).max(0),
        };

        result.total_check_ins += successful;
        result.total_failed += failed;

        let beats_best = result
            .best_habit
            .as_ref()
            .map_or(true, |best| stat.completion_rate > best.completion_rate);
        if beats_best {
            result.best_habit = Some(stat.clone());
        }

        // The first habit seeds "worst" even when nothing is expected of it;
        // later habits only replace it when they are expected to check in.
        let beats_worst = match &result.worst_habit {
            None => true,
            Some(worst) => stat.completion_rate < worst.completion_rate && expected > 0,
        };
        if beats_worst {
            result.worst_habit = Some(stat.clone());
        }

        result.habit_stats.push(stat);
    }

    result.daily_trend = daily_trend(habits, &in_window);

    if !result.habit_stats.is_empty() {
        result.overall_completion_rate = result
            .habit_stats
            .iter()
            .map(|s| s.completion_rate)
            .sum::<f64>()
            / result.habit_stats.len() as f64;
    }

    result
}

/// Per-day completion over every date that has at least one event.
fn daily_trend(habits: &[Habit], events: &[&CheckInEvent]) -> Vec<TrendPoint> {
    let mut successes_by_date: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for event in events {
        let entry = successes_by_date.entry(event.date()).or_insert(0);
        if event.is_success() {
            *entry += 1;
        }
    }

    successes_by_date
        .into_iter()
        .map(|(date, successful)| {
            let expecting = habits
                .iter()
                .filter(|h| expects_check_in_on(&h.cadence, date))
                .count() as i64;
            TrendPoint {
                date,
                completion_rate: completion_fraction(successful, expecting),
            }
        })
        .collect()
}

/// Persisted window rollup, one per (user, range, period start).
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStatsRecord {
    pub user_id: String,
    pub time_range: TimeRange,
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
    /// Fraction, same scale as [`HabitWindowStats::completion_rate`]
    pub overall_completion_rate: f64,
    pub total_check_ins: i64,
    pub total_failed: i64,
    pub best_habit_id: Option<i64>,
    pub worst_habit_id: Option<i64>,
    pub daily_trend: Vec<TrendPoint>,
    pub updated_at: NaiveDateTime,
}

impl WindowStatsRecord {
    /// A cached row is valid until local midnight of the day it was written.
    pub fn is_fresh(&self, now: NaiveDateTime) -> bool {
        self.updated_at.date() == now.date()
    }
}

/// Window report returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowReport {
    pub time_range: TimeRange,
    pub period_label: String,
    pub period_start: NaiveDateTime,
    pub overall_completion_rate: f64,
    pub total_check_ins: i64,
    pub total_failed: i64,
    pub best_habit: Option<HabitWindowStats>,
    pub worst_habit: Option<HabitWindowStats>,
    pub habit_stats: Vec<HabitWindowStats>,
    pub daily_trend: Vec<TrendPoint>,
    /// Served from the same-day cache rather than recomputed
    pub cached: bool,
}

impl WindowReport {
    /// Zero-valued report for a user with no active habits.
    pub fn empty(time_range: TimeRange, now: NaiveDateTime) -> Self {
        Self {
            time_range,
            period_label: time_range.period_label(now),
            period_start: time_range.period_start(now),
            overall_completion_rate: 0.0,
            total_check_ins: 0,
            total_failed: 0,
            best_habit: None,
            worst_habit: None,
            habit_stats: Vec::new(),
            daily_trend: Vec::new(),
            cached: false,
        }
    }

    pub fn from_aggregate(
        time_range: TimeRange,
        now: NaiveDateTime,
        aggregate: WindowAggregate,
    ) -> Self {
        Self {
            time_range,
            period_label: time_range.period_label(now),
            period_start: time_range.period_start(now),
            overall_completion_rate: aggregate.overall_completion_rate,
            total_check_ins: aggregate.total_check_ins,
            total_failed: aggregate.total_failed,
            best_habit: aggregate.best_habit,
            worst_habit: aggregate.worst_habit,
            habit_stats: aggregate.habit_stats,
            daily_trend: aggregate.daily_trend,
            cached: false,
        }
    }

    /// Rebuild a report from a cached row.
    ///
    /// Per-habit rates are not stored, so they are filled with placeholders:
    /// 1 for the best habit, 0 for the worst, the overall rate for the rest.
    /// Streaks and completion counts come from each habit's cached stats;
    /// missed days are reported as 0.
    pub fn from_cache(
        record: &WindowStatsRecord,
        now: NaiveDateTime,
        habits: &[(Habit, Option<HabitStats>)],
        best: Option<(&Habit, &HabitStats)>,
        worst: Option<(&Habit, &HabitStats)>,
    ) -> Self {
        let placeholder = |habit: &Habit, stats: Option<&HabitStats>, rate: f64| HabitWindowStats {
            id: habit.id,
            name: habit.name.clone(),
            completion_rate: rate,
            streak: stats.map_or(0, |s| s.current_streak),
            total_completions: stats.map_or(0, |s| s.total_check_ins),
            missed_days: 0,
        };

        let habit_stats = habits
            .iter()
            .map(|(habit, stats)| {
                let rate = if Some(habit.id) == record.best_habit_id {
                    1.0
                } else if Some(habit.id) == record.worst_habit_id {
                    0.0
                } else {
                    record.overall_completion_rate
                };
                placeholder(habit, stats.as_ref(), rate)
            })
            .collect();

        Self {
            time_range: record.time_range,
            period_label: record.time_range.period_label(now),
            period_start: record.period_start,
            overall_completion_rate: record.overall_completion_rate,
            total_check_ins: record.total_check_ins,
            total_failed: record.total_failed,
            best_habit: best.map(|(h, s)| placeholder(h, Some(s), 1.0)),
            worst_habit: worst.map(|(h, s)| placeholder(h, Some(s), 0.0)),
            habit_stats,
            daily_trend: record.daily_trend.clone(),
            cached: true,
        }
    }
}
