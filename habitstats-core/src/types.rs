//! Core domain types for habitstats
//!
//! Habits and their check-in events are owned by upstream habit-tracking
//! functionality; this crate only reads them. The derived types at the bottom
//! of this module ([`HabitStats`], [`NamedHabitStats`]) are owned by the stats
//! engine and persisted in the `habit_stats` cache table.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Habit** | Something a user wants to do on a schedule |
//! | **Cadence** | How often a habit is expected: daily (with a weekday mask), weekly, monthly |
//! | **Check-in** | One event recording that the habit was done (or explicitly failed) |
//! | **Check-in date** | A local calendar date with at least one non-failed check-in |
//! | **Streak** | A maximal run of consecutive check-in dates |

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================
// Cadence
// ============================================

/// Declared check-in frequency of a habit.
///
/// Unrecognized stored values are preserved in [`Frequency::Other`]; they
/// never expect a check-in, so their window completion rate is always zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Other(String),
}

impl Frequency {
    pub fn as_str(&self) -> &str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Other(s) => s,
        }
    }

    /// Interpret a stored frequency string. Never fails.
    pub fn from_stored(s: &str) -> Self {
        match s {
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            other => Frequency::Other(other.to_string()),
        }
    }
}

impl From<String> for Frequency {
    fn from(s: String) -> Self {
        Frequency::from_stored(&s)
    }
}

impl From<Frequency> for String {
    fn from(f: Frequency) -> Self {
        f.as_str().to_string()
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Set of ISO weekday numbers (Monday=1 .. Sunday=7).
///
/// Stored as a JSON array such as `[1,2,3,4,5]`. Numbers outside 1-7 are
/// dropped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<u32>", from = "Vec<u32>")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    /// Every day of the week.
    pub const ALL: WeekdaySet = WeekdaySet(0b0111_1111);

    /// Build a set from ISO weekday numbers.
    pub fn from_iso_days(days: &[u32]) -> Self {
        let mask = days
            .iter()
            .filter(|d| (1..=7).contains(*d))
            .fold(0u8, |mask, d| mask | (1 << (d - 1)));
        WeekdaySet(mask)
    }

    /// Monday through Friday.
    pub fn weekdays() -> Self {
        Self::from_iso_days(&[1, 2, 3, 4, 5])
    }

    /// Whether ISO weekday `day` (1-7) is in the set.
    pub fn contains(&self, day: u32) -> bool {
        (1..=7).contains(&day) && self.0 & (1 << (day - 1)) != 0
    }

    /// Whether the weekday of `date` is in the set.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;
        self.contains(date.weekday().number_from_monday())
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// ISO weekday numbers in ascending order.
    pub fn iso_days(&self) -> Vec<u32> {
        (1..=7).filter(|d| self.contains(*d)).collect()
    }

    /// Parse the stored JSON column. `None` means all seven days.
    pub fn from_stored(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw else {
            return Ok(Self::ALL);
        };
        let days: Vec<i64> = serde_json::from_str(raw)
            .map_err(|e| Error::parse("habits.checkin_days", format!("{raw:?}: {e}")))?;
        let days: Vec<u32> = days
            .into_iter()
            .filter_map(|d| u32::try_from(d).ok())
            .collect();
        Ok(Self::from_iso_days(&days))
    }

    /// JSON encoding for storage.
    pub fn to_stored(&self) -> String {
        serde_json::Value::from(self.iso_days()).to_string()
    }
}

impl Default for WeekdaySet {
    fn default() -> Self {
        Self::ALL
    }
}

impl From<Vec<u32>> for WeekdaySet {
    fn from(days: Vec<u32>) -> Self {
        Self::from_iso_days(&days)
    }
}

impl From<WeekdaySet> for Vec<u32> {
    fn from(set: WeekdaySet) -> Self {
        set.iso_days()
    }
}

/// Expected check-in schedule of a habit.
///
/// `checkin_days` only matters for [`Frequency::Daily`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cadence {
    pub frequency: Frequency,
    pub checkin_days: WeekdaySet,
}

impl Cadence {
    pub fn daily() -> Self {
        Self::daily_on(WeekdaySet::ALL)
    }

    pub fn daily_on(checkin_days: WeekdaySet) -> Self {
        Self {
            frequency: Frequency::Daily,
            checkin_days,
        }
    }

    pub fn weekly() -> Self {
        Self {
            frequency: Frequency::Weekly,
            checkin_days: WeekdaySet::ALL,
        }
    }

    pub fn monthly() -> Self {
        Self {
            frequency: Frequency::Monthly,
            checkin_days: WeekdaySet::ALL,
        }
    }
}

// ============================================
// Habit
// ============================================

/// Lifecycle status of a habit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HabitStatus {
    Active,
    Inactive,
}

impl HabitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HabitStatus::Active => "active",
            HabitStatus::Inactive => "inactive",
        }
    }

    /// Anything other than `active` counts as inactive.
    pub fn from_stored(s: &str) -> Self {
        if s == "active" {
            HabitStatus::Active
        } else {
            HabitStatus::Inactive
        }
    }
}

/// A habit as defined by its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Habit {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub cadence: Cadence,
    pub status: HabitStatus,
}

/// Fields needed to create a habit row.
#[derive(Debug, Clone)]
pub struct NewHabit {
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub cadence: Cadence,
    pub status: HabitStatus,
}

impl NewHabit {
    /// An active habit with the given cadence.
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, cadence: Cadence) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            description: None,
            cadence,
            status: HabitStatus::Active,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.status = HabitStatus::Inactive;
        self
    }
}

// ============================================
// Check-in events
// ============================================

/// Outcome recorded on a check-in event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum CheckInStatus {
    Completed,
    Failed,
    /// Any other value; counts as a success
    Other(String),
}

impl CheckInStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CheckInStatus::Completed => "completed",
            CheckInStatus::Failed => "failed",
            CheckInStatus::Other(s) => s,
        }
    }

    /// Interpret a stored status. NULL is treated as completed.
    pub fn from_stored(s: Option<&str>) -> Self {
        match s {
            None | Some("completed") => CheckInStatus::Completed,
            Some("failed") => CheckInStatus::Failed,
            Some(other) => CheckInStatus::Other(other.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CheckInStatus::Failed)
    }
}

impl From<String> for CheckInStatus {
    fn from(s: String) -> Self {
        CheckInStatus::from_stored(Some(&s))
    }
}

impl From<CheckInStatus> for String {
    fn from(s: CheckInStatus) -> Self {
        s.as_str().to_string()
    }
}

/// One check-in event for a habit.
///
/// `completed_at` is in local time; its date decides which calendar day
/// the event counts toward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInEvent {
    pub id: i64,
    pub habit_id: i64,
    pub user_id: String,
    pub completed_at: NaiveDateTime,
    pub status: CheckInStatus,
}

impl CheckInEvent {
    /// Local calendar date of the event
    pub fn date(&self) -> NaiveDate {
        self.completed_at.date()
    }

    pub fn is_success(&self) -> bool {
        !self.status.is_failed()
    }
}

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a stored event timestamp into local time.
///
/// Accepts RFC 3339 (converted to the local zone), naive
/// `YYYY-MM-DD HH:MM:SS[.fff]` / `YYYY-MM-DDTHH:MM:SS[.fff]` (taken as
/// local) and a bare `YYYY-MM-DD` (local midnight).
pub fn parse_timestamp(context: &str, raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Local).naive_local());
    }
    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }

    Err(Error::parse(
        context,
        format!("unrecognized timestamp {:?}", raw),
    ))
}

/// Current local wall-clock time.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

// ============================================
// Derived stats
// ============================================

/// Streak and completion statistics for one habit of one user.
///
/// `completion_rate` is a PERCENTAGE (0-100). Window-relative rates in
/// [`crate::analytics::window`] use a 0-1 fraction instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitStats {
    pub habit_id: i64,
    pub user_id: String,
    /// Distinct check-in dates
    pub total_check_ins: i64,
    /// Consecutive check-in dates ending today (0 if today has none)
    pub current_streak: i64,
    /// Longest run of consecutive check-in dates over the full history
    pub longest_streak: i64,
    /// Percentage of expected check-ins that happened
    pub completion_rate: f64,
    pub last_check_in_date: Option<NaiveDate>,
    /// Events with status `failed`
    pub failed_count: i64,
    pub updated_at: NaiveDateTime,
}

/// Habit stats joined with the habit's display fields.
#[derive(Debug, Clone, Serialize)]
pub struct NamedHabitStats {
    pub name: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub stats: HabitStats,
}

/// Narrated report stored in `ai_insights`, one per (user, kind, period).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub user_id: String,
    /// What was narrated, e.g. `habit_report`
    pub kind: String,
    pub period_start: NaiveDate,
    pub title: String,
    pub content: String,
    pub model: Option<String>,
    /// Hex SHA-256 of the prompt the content was generated from
    pub prompt_hash: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
