//! Summary report over a user's cached habit stats.

use serde::Serialize;

use crate::types::NamedHabitStats;

/// Default number of habits listed in [`HabitReport::habits_by_streak`].
pub const DEFAULT_TOP_HABITS: usize = 5;

/// Aggregate view of every habit a user has stats for.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HabitReport {
    pub total_habits: usize,
    /// Habits with a current streak above zero
    pub active_habits: usize,
    /// Mean of the per-habit completion percentages
    pub avg_completion_rate: f64,
    pub max_streak: i64,
    pub current_max_streak: i64,
    /// Top habits by current streak, descending
    pub habits_by_streak: Vec<NamedHabitStats>,
}

impl HabitReport {
    /// Build a report from stats rows; the input order breaks streak ties.
    pub fn from_stats(stats: &[NamedHabitStats], top: usize) -> Self {
        if stats.is_empty() {
            return Self::default();
        }

        let total_habits = stats.len();
        let active_habits = stats.iter().filter(|s| s.stats.current_streak > 0).count();
        let avg_completion_rate =
            stats.iter().map(|s| s.stats.completion_rate).sum::<f64>() / total_habits as f64;
        let max_streak = stats.iter().map(|s| s.stats.longest_streak).max().unwrap_or(0);
        let current_max_streak = stats.iter().map(|s| s.stats.current_streak).max().unwrap_or(0);

        let mut by_streak: Vec<NamedHabitStats> = stats.to_vec();
        // sort_by is stable
        by_streak.sort_by(|a, b| b.stats.current_streak.cmp(&a.stats.current_streak));
        by_streak.truncate(top);

        Self {
            total_habits,
            active_habits,
            avg_completion_rate,
            max_streak,
            current_max_streak,
            habits_by_streak: by_streak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HabitStats;
    use chrono::NaiveDate;

    fn named(id: i64, current: i64, longest: i64, rate: f64) -> NamedHabitStats {
        NamedHabitStats {
            name: format!("habit-{id}"),
            description: None,
            stats: HabitStats {
                habit_id: id,
                user_id: "u1".to_string(),
                total_check_ins: longest,
                current_streak: current,
                longest_streak: longest,
                completion_rate: rate,
                last_check_in_date: None,
                failed_count: 0,
                updated_at: NaiveDate::from_ymd_opt(2026, 10, 16)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
            },
        }
    }

    #[test]
    fn test_report_totals() {
        let stats = vec![
            named(1, 0, 4, 20.0),
            named(2, 3, 3, 50.0),
            named(3, 1, 9, 80.0),
        ];
        let report = HabitReport::from_stats(&stats, DEFAULT_TOP_HABITS);
        assert_eq!(report.total_habits, 3);
        assert_eq!(report.active_habits, 2);
        assert_eq!(report.avg_completion_rate, 50.0);
        assert_eq!(report.max_streak, 9);
        assert_eq!(report.current_max_streak, 3);
        let order: Vec<i64> = report.habits_by_streak.iter().map(|s| s.stats.habit_id).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_report_top_n_keeps_input_order_on_ties() {
        let stats = vec![
            named(1, 2, 2, 0.0),
            named(2, 5, 5, 0.0),
            named(3, 2, 2, 0.0),
            named(4, 2, 2, 0.0),
        ];
        let report = HabitReport::from_stats(&stats, 3);
        let order: Vec<i64> = report.habits_by_streak.iter().map(|s| s.stats.habit_id).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_empty_report() {
        let report = HabitReport::from_stats(&[], DEFAULT_TOP_HABITS);
        assert_eq!(report.total_habits, 0);
        assert_eq!(report.avg_completion_rate, 0.0);
        assert!(report.habits_by_streak.is_empty());
    }
}
