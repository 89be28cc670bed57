//! Analytics for habitstats
//!
//! Pure computation over check-in events:
//! - [`streak`]: per-habit streaks and completion rate
//! - [`cadence`]: how many check-ins a habit is expected to have in a window
//! - [`window`]: week/month/quarter/year rollups across a user's habits
//! - [`report`]: summary over cached per-habit stats
//!
//! Nothing here touches the database; [`crate::service::StatsService`]
//! loads the inputs and persists the outputs.

pub mod cadence;
pub mod report;
pub mod streak;
pub mod window;

pub use cadence::{
    completion_fraction, completion_percentage, days_in_window, expected_check_ins,
    expects_check_in_on,
};
pub use report::{HabitReport, DEFAULT_TOP_HABITS};
pub use streak::{compute_habit_stats, CheckInHistory, CompletionWindow, DEFAULT_TRAILING_DAYS};
pub use window::{
    aggregate_window, HabitWindowStats, TimeRange, TrendPoint, WindowAggregate, WindowReport,
    WindowStatsRecord,
};
