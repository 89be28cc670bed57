//! Database repository layer
//!
//! Typed query and upsert operations over habits, check-ins and the derived
//! stats tables. Every method is a single statement; there are no
//! transactions spanning calls.

use crate::analytics::window::{TimeRange, TrendPoint, WindowStatsRecord};
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Format used for every timestamp this crate writes (local time).
pub const STORED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Format used for stored calendar dates.
pub const STORED_DATE_FORMAT: &str = "%Y-%m-%d";

fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(STORED_TIMESTAMP_FORMAT).to_string()
}

fn format_date(date: NaiveDate) -> String {
    date.format(STORED_DATE_FORMAT).to_string()
}

fn parse_date(context: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), STORED_DATE_FORMAT)
        .map_err(|e| Error::parse(context, format!("{:?}: {}", raw, e)))
}

/// Habit row before its stored strings are interpreted.
struct HabitRow {
    id: i64,
    user_id: String,
    name: String,
    description: Option<String>,
    frequency: String,
    checkin_days: Option<String>,
    status: String,
}

impl HabitRow {
    fn into_habit(self) -> Result<Habit> {
        let checkin_days = WeekdaySet::from_stored(self.checkin_days.as_deref())?;
        Ok(Habit {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            description: self.description,
            cadence: Cadence {
                frequency: Frequency::from_stored(&self.frequency),
                checkin_days,
            },
            status: HabitStatus::from_stored(&self.status),
        })
    }
}

struct EntryRow {
    id: i64,
    habit_id: i64,
    user_id: String,
    completed_at: String,
    status: Option<String>,
}

impl EntryRow {
    fn into_event(self) -> Result<CheckInEvent> {
        let completed_at = parse_timestamp("habit_entries.completed_at", &self.completed_at)?;
        Ok(CheckInEvent {
            id: self.id,
            habit_id: self.habit_id,
            user_id: self.user_id,
            completed_at,
            status: CheckInStatus::from_stored(self.status.as_deref()),
        })
    }
}

struct StatsRow {
    habit_id: i64,
    user_id: String,
    total_check_ins: i64,
    current_streak: i64,
    longest_streak: i64,
    completion_rate: f64,
    last_check_in_date: Option<String>,
    failed_count: i64,
    updated_at: String,
}

impl StatsRow {
    fn into_stats(self) -> Result<HabitStats> {
        let last_check_in_date = self
            .last_check_in_date
            .as_deref()
            .map(|raw| parse_date("habit_stats.last_check_in_date", raw))
            .transpose()?;
        Ok(HabitStats {
            habit_id: self.habit_id,
            user_id: self.user_id,
            total_check_ins: self.total_check_ins,
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
            completion_rate: self.completion_rate,
            last_check_in_date,
            failed_count: self.failed_count,
            updated_at: parse_timestamp("habit_stats.updated_at", &self.updated_at)?,
        })
    }
}

struct WindowRow {
    user_id: String,
    time_range: String,
    period_start: String,
    period_end: String,
    overall_completion_rate: f64,
    total_check_ins: i64,
    total_failed: i64,
    best_habit_id: Option<i64>,
    worst_habit_id: Option<i64>,
    daily_trend: String,
    updated_at: String,
}

impl WindowRow {
    fn into_record(self) -> Result<WindowStatsRecord> {
        let daily_trend: Vec<TrendPoint> = serde_json::from_str(&self.daily_trend)?;
        Ok(WindowStatsRecord {
            user_id: self.user_id,
            time_range: self.time_range.parse::<TimeRange>()?,
            period_start: parse_timestamp("global_habit_stats.period_start", &self.period_start)?,
            period_end: parse_timestamp("global_habit_stats.period_end", &self.period_end)?,
            overall_completion_rate: self.overall_completion_rate,
            total_check_ins: self.total_check_ins,
            total_failed: self.total_failed,
            best_habit_id: self.best_habit_id,
            worst_habit_id: self.worst_habit_id,
            daily_trend,
            updated_at: parse_timestamp("global_habit_stats.updated_at", &self.updated_at)?,
        })
    }
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        tracing::debug!(path = %path.display(), "Opened database");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Each call is one statement, so a poisoned lock holds no partial state
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============================================
    // Habit operations
    // ============================================

    /// Insert a habit and return its id
    pub fn insert_habit(&self, habit: &NewHabit) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO habits (user_id, name, description, frequency, checkin_days, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                habit.user_id,
                habit.name,
                habit.description,
                habit.cadence.frequency.as_str(),
                habit.cadence.checkin_days.to_stored(),
                habit.status.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Distinct users that own at least one habit, sorted
    pub fn list_user_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM habits ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Habits of a user ordered by id, optionally only active ones
    pub fn list_habits(&self, user_id: &str, active_only: bool) -> Result<Vec<Habit>> {
        let conn = self.conn();
        let sql = if active_only {
            "SELECT * FROM habits WHERE user_id = ?1 AND status = 'active' ORDER BY id"
        } else {
            "SELECT * FROM habits WHERE user_id = ?1 ORDER BY id"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([user_id], Self::row_to_habit)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(HabitRow::into_habit).collect()
    }

    /// Get a habit by id regardless of owner or status
    pub fn get_habit(&self, habit_id: i64) -> Result<Option<Habit>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM habits WHERE id = ?",
            [habit_id],
            Self::row_to_habit,
        )
        .optional()?
        .map(HabitRow::into_habit)
        .transpose()
    }

    fn row_to_habit(row: &Row) -> rusqlite::Result<HabitRow> {
        Ok(HabitRow {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            frequency: row.get("frequency")?,
            checkin_days: row.get("checkin_days")?,
            status: row.get("status")?,
        })
    }

    // ============================================
    // Check-in operations
    // ============================================

    /// Insert a check-in with a raw timestamp string and return its id.
    ///
    /// The timestamp is stored as given; it is only validated when read.
    pub fn insert_check_in(
        &self,
        habit_id: i64,
        user_id: &str,
        completed_at: &str,
        status: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO habit_entries (habit_id, user_id, completed_at, status)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![habit_id, user_id, completed_at, status],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Every check-in of one habit for one user.
    ///
    /// Fails with [`Error::Parse`] if any stored timestamp is malformed.
    pub fn get_habit_entries(&self, habit_id: i64, user_id: &str) -> Result<Vec<CheckInEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM habit_entries WHERE habit_id = ?1 AND user_id = ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![habit_id, user_id], Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(EntryRow::into_event).collect()
    }

    /// Check-ins of the given habits at or after `since`.
    ///
    /// Timestamps are compared after parsing, so mixed stored encodings are
    /// filtered correctly and malformed ones fail instead of being skipped.
    pub fn get_entries_since(
        &self,
        habit_ids: &[i64],
        user_id: &str,
        since: NaiveDateTime,
    ) -> Result<Vec<CheckInEvent>> {
        if habit_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; habit_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM habit_entries WHERE user_id = ? AND habit_id IN ({}) ORDER BY id",
            placeholders
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let bind: Vec<rusqlite::types::Value> = std::iter::once(user_id.to_string().into())
            .chain(habit_ids.iter().map(|id| (*id).into()))
            .collect();
        let rows = stmt
            .query_map(params_from_iter(bind), Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let event = row.into_event()?;
            if event.completed_at >= since {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn row_to_entry(row: &Row) -> rusqlite::Result<EntryRow> {
        Ok(EntryRow {
            id: row.get("id")?,
            habit_id: row.get("habit_id")?,
            user_id: row.get("user_id")?,
            completed_at: row.get("completed_at")?,
            status: row.get("status")?,
        })
    }

    // ============================================
    // Habit stats operations
    // ============================================

    /// Insert or replace the stats row for `(habit_id, user_id)`
    pub fn upsert_habit_stats(&self, stats: &HabitStats) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO habit_stats (
                habit_id, user_id, total_check_ins, current_streak, longest_streak,
                completion_rate, last_check_in_date, failed_count, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(habit_id, user_id) DO UPDATE SET
                total_check_ins = excluded.total_check_ins,
                current_streak = excluded.current_streak,
                longest_streak = excluded.longest_streak,
                completion_rate = excluded.completion_rate,
                last_check_in_date = excluded.last_check_in_date,
                failed_count = excluded.failed_count,
                updated_at = excluded.updated_at
            "#,
            params![
                stats.habit_id,
                stats.user_id,
                stats.total_check_ins,
                stats.current_streak,
                stats.longest_streak,
                stats.completion_rate,
                stats.last_check_in_date.map(format_date),
                stats.failed_count,
                format_timestamp(stats.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Cached stats for one habit, if any
    pub fn get_habit_stats(&self, habit_id: i64, user_id: &str) -> Result<Option<HabitStats>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM habit_stats WHERE habit_id = ?1 AND user_id = ?2",
            params![habit_id, user_id],
            Self::row_to_stats,
        )
        .optional()?
        .map(StatsRow::into_stats)
        .transpose()
    }

    /// Cached stats of every habit of a user, joined with the habit's name.
    ///
    /// Ordered by current streak, then completion rate, both descending.
    pub fn list_user_habit_stats(&self, user_id: &str) -> Result<Vec<NamedHabitStats>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT hs.*, h.name AS habit_name, h.description AS habit_description
            FROM habit_stats hs
            JOIN habits h ON h.id = hs.habit_id
            WHERE hs.user_id = ?1
            ORDER BY hs.current_streak DESC, hs.completion_rate DESC, hs.habit_id
            "#,
        )?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok((
                    row.get::<_, String>("habit_name")?,
                    row.get::<_, Option<String>>("habit_description")?,
                    Self::row_to_stats(row)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(name, description, stats)| {
                Ok(NamedHabitStats {
                    name,
                    description,
                    stats: stats.into_stats()?,
                })
            })
            .collect()
    }

    fn row_to_stats(row: &Row) -> rusqlite::Result<StatsRow> {
        Ok(StatsRow {
            habit_id: row.get("habit_id")?,
            user_id: row.get("user_id")?,
            total_check_ins: row.get("total_check_ins")?,
            current_streak: row.get("current_streak")?,
            longest_streak: row.get("longest_streak")?,
            completion_rate: row.get("completion_rate")?,
            last_check_in_date: row.get("last_check_in_date")?,
            failed_count: row.get("failed_count")?,
            updated_at: row.get("updated_at")?,
        })
    }

    // ============================================
    // Windowed stats operations
    // ============================================

    /// Cached window rollup for `(user, range, period_start)`, fresh or not
    pub fn get_window_stats(
        &self,
        user_id: &str,
        time_range: TimeRange,
        period_start: NaiveDateTime,
    ) -> Result<Option<WindowStatsRecord>> {
        let conn = self.conn();
        conn.query_row(
            r#"
            SELECT * FROM global_habit_stats
            WHERE user_id = ?1 AND time_range = ?2 AND period_start = ?3
            "#,
            params![user_id, time_range.as_str(), format_timestamp(period_start)],
            Self::row_to_window,
        )
        .optional()?
        .map(WindowRow::into_record)
        .transpose()
    }

    /// Insert the rollup or update the existing row for the same period
    pub fn upsert_window_stats(&self, record: &WindowStatsRecord) -> Result<()> {
        let trend = serde_json::to_string(&record.daily_trend)?;
        let updated_at = format_timestamp(record.updated_at);
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO global_habit_stats (
                user_id, time_range, period_start, period_end, overall_completion_rate,
                total_check_ins, total_failed, best_habit_id, worst_habit_id, daily_trend,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            ON CONFLICT(user_id, time_range, period_start) DO UPDATE SET
                period_end = excluded.period_end,
                overall_completion_rate = excluded.overall_completion_rate,
                total_check_ins = excluded.total_check_ins,
                total_failed = excluded.total_failed,
                best_habit_id = excluded.best_habit_id,
                worst_habit_id = excluded.worst_habit_id,
                daily_trend = excluded.daily_trend,
                updated_at = excluded.updated_at
            "#,
            params![
                record.user_id,
                record.time_range.as_str(),
                format_timestamp(record.period_start),
                format_timestamp(record.period_end),
                record.overall_completion_rate,
                record.total_check_ins,
                record.total_failed,
                record.best_habit_id,
                record.worst_habit_id,
                trend,
                updated_at,
            ],
        )?;
        Ok(())
    }

    fn row_to_window(row: &Row) -> rusqlite::Result<WindowRow> {
        Ok(WindowRow {
            user_id: row.get("user_id")?,
            time_range: row.get("time_range")?,
            period_start: row.get("period_start")?,
            period_end: row.get("period_end")?,
            overall_completion_rate: row.get("overall_completion_rate")?,
            total_check_ins: row.get("total_check_ins")?,
            total_failed: row.get("total_failed")?,
            best_habit_id: row.get("best_habit_id")?,
            worst_habit_id: row.get("worst_habit_id")?,
            daily_trend: row.get("daily_trend")?,
            updated_at: row.get("updated_at")?,
        })
    }

    // ============================================
    // Insight operations
    // ============================================

    /// Stored narrative for `(user, kind, period_start)`, if any
    pub fn get_insight(
        &self,
        user_id: &str,
        kind: &str,
        period_start: NaiveDate,
    ) -> Result<Option<Insight>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                r#"
                SELECT user_id, kind, period_start, title, content, model, prompt_hash,
                       created_at, updated_at
                FROM ai_insights
                WHERE user_id = ?1 AND kind = ?2 AND period_start = ?3
                "#,
                params![user_id, kind, format_date(period_start)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((user_id, kind, period, title, content, model, prompt_hash, created, updated)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(Insight {
            user_id,
            kind,
            period_start: parse_date("ai_insights.period_start", &period)?,
            title,
            content,
            model,
            prompt_hash,
            created_at: parse_timestamp("ai_insights.created_at", &created)?,
            updated_at: parse_timestamp("ai_insights.updated_at", &updated)?,
        }))
    }

    /// Insert the narrative or replace the one stored for the same period
    pub fn upsert_insight(&self, insight: &Insight) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO ai_insights (
                user_id, kind, period_start, title, content, model, prompt_hash,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(user_id, kind, period_start) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                model = excluded.model,
                prompt_hash = excluded.prompt_hash,
                updated_at = excluded.updated_at
            "#,
            params![
                insight.user_id,
                insight.kind,
                format_date(insight.period_start),
                insight.title,
                insight.content,
                insight.model,
                insight.prompt_hash,
                format_timestamp(insight.created_at),
                format_timestamp(insight.updated_at),
            ],
        )?;
        Ok(())
    }
}
