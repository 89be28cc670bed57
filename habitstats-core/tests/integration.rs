//! Integration tests for the stats pipeline
//!
//! These tests seed a file-backed database through the public API and run
//! the service end to end: sweep, summary report and windowed rollups.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use habitstats_core::analytics::TimeRange;
use habitstats_core::types::{Cadence, NewHabit, WeekdaySet};
use habitstats_core::{Database, StatsService};
use tempfile::TempDir;

/// Wednesday 2026-11-18, 18:00 local
fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 11, 18)
        .unwrap()
        .and_hms_opt(18, 0, 0)
        .unwrap()
}

fn day(days_ago: i64) -> NaiveDate {
    now().date() - Duration::days(days_ago)
}

fn open_db(dir: &TempDir) -> Database {
    let db = Database::open(&dir.path().join("habits.db")).expect("failed to open db");
    db.migrate().expect("failed to migrate");
    db
}

struct Seeded {
    meditate: i64,
    gym: i64,
    budget: i64,
    paused: i64,
}

/// Three active habits and one inactive one for `dana`, one habit for `eli`.
fn seed(db: &Database) -> Seeded {
    let meditate = db
        .insert_habit(&NewHabit::new("dana", "Meditate", Cadence::daily()))
        .unwrap();
    let gym = db
        .insert_habit(&NewHabit::new(
            "dana",
            "Gym",
            Cadence::daily_on(WeekdaySet::from_iso_days(&[1, 3, 5])),
        ))
        .unwrap();
    let budget = db
        .insert_habit(&NewHabit::new("dana", "Review budget", Cadence::monthly()))
        .unwrap();
    let paused = db
        .insert_habit(&NewHabit::new("dana", "Guitar", Cadence::daily()).inactive())
        .unwrap();
    let other = db
        .insert_habit(&NewHabit::new("eli", "Walk", Cadence::daily()))
        .unwrap();

    // Meditate: every day for the last 10 days, with a duplicate today
    for days_ago in 0..10 {
        let ts = format!("{} 06:45:00", day(days_ago).format("%Y-%m-%d"));
        db.insert_check_in(meditate, "dana", &ts, Some("completed"))
            .unwrap();
    }
    let ts = format!("{}T21:10:00", day(0).format("%Y-%m-%d"));
    db.insert_check_in(meditate, "dana", &ts, None).unwrap();

    // Gym: Mon 16th done, Wed 18th failed
    db.insert_check_in(gym, "dana", &format!("{}", day(2).format("%Y-%m-%d")), None)
        .unwrap();
    db.insert_check_in(gym, "dana", &format!("{} 19:00:00", day(0).format("%Y-%m-%d")), Some("failed"))
        .unwrap();

    // Budget: reviewed in October only
    db.insert_check_in(budget, "dana", "2026-10-30 20:00:00", None)
        .unwrap();

    db.insert_check_in(paused, "dana", &format!("{} 12:00:00", day(0).format("%Y-%m-%d")), None)
        .unwrap();
    db.insert_check_in(other, "eli", &format!("{} 12:00:00", day(0).format("%Y-%m-%d")), None)
        .unwrap();

    Seeded {
        meditate,
        gym,
        budget,
        paused,
    }
}

#[test]
fn test_sweep_then_report() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let habits = seed(&db);
    let service = StatsService::new(&db).at(now());

    let sweep = service.update_all_user_stats(None).unwrap();
    assert_eq!(sweep.users, 2);
    assert_eq!(sweep.updated, 5);
    assert!(sweep.is_clean());

    let meditate = db.get_habit_stats(habits.meditate, "dana").unwrap().unwrap();
    assert_eq!(meditate.total_check_ins, 10);
    assert_eq!(meditate.current_streak, 10);
    assert_eq!(meditate.longest_streak, 10);
    assert_eq!(meditate.last_check_in_date, Some(day(0)));

    let gym = db.get_habit_stats(habits.gym, "dana").unwrap().unwrap();
    assert_eq!(gym.failed_count, 1);
    assert_eq!(gym.current_streak, 0);
    assert_eq!(gym.longest_streak, 1);

    // Inactive habits are still swept
    assert!(db.get_habit_stats(habits.paused, "dana").unwrap().is_some());

    let report = service.generate_stats_report("dana").unwrap();
    assert_eq!(report.total_habits, 4);
    assert_eq!(report.active_habits, 2);
    assert_eq!(report.max_streak, 10);
    assert_eq!(report.current_max_streak, 10);
    assert_eq!(report.habits_by_streak[0].name, "Meditate");
}

#[test]
fn test_stats_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let habits = {
        let db = open_db(&dir);
        let habits = seed(&db);
        StatsService::new(&db)
            .at(now())
            .update_all_user_stats(Some("dana"))
            .unwrap();
        habits
    };

    let db = open_db(&dir);
    let all = StatsService::new(&db).at(now()).get_all_user_stats("dana").unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].stats.habit_id, habits.meditate);
}

#[test]
fn test_month_window() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let habits = seed(&db);
    let service = StatsService::new(&db).at(now());

    let month = service.get_window_stats("dana", TimeRange::Month).unwrap();
    assert_eq!(month.period_label, "November 2026");

    // Inactive habit excluded
    let ids: Vec<i64> = month.habit_stats.iter().map(|h| h.id).collect();
    assert_eq!(ids, vec![habits.meditate, habits.gym, habits.budget]);

    // Meditate: 11 events since Nov 1 (duplicate counted), 18 days expected
    let meditate = &month.habit_stats[0];
    assert_eq!(meditate.total_completions, 11);
    assert!((meditate.completion_rate - 11.0 / 18.0).abs() < 1e-9);
    assert_eq!(meditate.missed_days, 7);
    assert_eq!(meditate.streak, 10);

    // Gym: Mon/Wed/Fri from Nov 1 to Nov 18 is 8 days, one success
    let gym = &month.habit_stats[1];
    assert_eq!(gym.total_completions, 1);
    assert!((gym.completion_rate - 1.0 / 8.0).abs() < 1e-9);

    // Budget: nothing in November, one expected
    let budget = &month.habit_stats[2];
    assert_eq!(budget.completion_rate, 0.0);
    assert_eq!(budget.missed_days, 1);

    assert_eq!(month.best_habit.as_ref().map(|h| h.id), Some(habits.meditate));
    assert_eq!(month.worst_habit.as_ref().map(|h| h.id), Some(habits.budget));
    assert_eq!(month.total_check_ins, 12);
    assert_eq!(month.total_failed, 1);

    // Trend starts at the first in-window event
    assert_eq!(month.daily_trend.first().map(|p| p.date), Some(day(9)));
    assert_eq!(month.daily_trend.last().map(|p| p.date), Some(day(0)));
    // Today (Wednesday): 2 meditate events over 2 expecting habits
    assert_eq!(month.daily_trend.last().map(|p| p.completion_rate), Some(1.0));
}

#[test]
fn test_quarter_and_year_windows() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let habits = seed(&db);
    let service = StatsService::new(&db).at(now());

    let quarter = service.get_window_stats("dana", TimeRange::Quarter).unwrap();
    assert_eq!(quarter.period_label, "2026 Q4");
    let budget = quarter
        .habit_stats
        .iter()
        .find(|h| h.id == habits.budget)
        .unwrap();
    // Oct 1 .. Nov 18 spans two months
    assert_eq!(budget.completion_rate, 0.5);
    assert_eq!(budget.total_completions, 1);

    let year = service.get_window_stats("dana", TimeRange::Year).unwrap();
    assert_eq!(year.period_label, "2026");
    assert_eq!(year.total_check_ins, quarter.total_check_ins);

    // Each range is cached separately
    let cached: i64 = db
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM global_habit_stats WHERE user_id = 'dana'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(cached, 2);
}

#[test]
fn test_week_window_cache_lifecycle() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let habits = seed(&db);

    let morning = now() - Duration::hours(10);
    let fresh = StatsService::new(&db)
        .at(morning)
        .get_window_stats("dana", TimeRange::Week)
        .unwrap();
    assert!(!fresh.cached);
    assert_eq!(fresh.period_label, "2026-11-16 to 2026-11-18");

    let served = StatsService::new(&db)
        .at(now())
        .get_window_stats("dana", TimeRange::Week)
        .unwrap();
    assert!(served.cached);
    assert_eq!(served.overall_completion_rate, fresh.overall_completion_rate);
    assert_eq!(served.best_habit.as_ref().map(|h| h.id), Some(habits.meditate));

    let tomorrow = StatsService::new(&db)
        .at(now() + Duration::days(1))
        .get_window_stats("dana", TimeRange::Week)
        .unwrap();
    assert!(!tomorrow.cached);
    assert_eq!(tomorrow.period_label, "2026-11-16 to 2026-11-19");
}
