//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: habits, check-ins and derived stats
    r#"
    -- ============================================
    -- Upstream records (read-only to the engine)
    -- ============================================

    CREATE TABLE IF NOT EXISTS habits (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id          TEXT NOT NULL,
        name             TEXT NOT NULL,
        description      TEXT,
        frequency        TEXT NOT NULL DEFAULT 'daily',
        checkin_days     TEXT,              -- JSON array of ISO weekdays, NULL = every day
        status           TEXT NOT NULL DEFAULT 'active'
    );

    CREATE INDEX IF NOT EXISTS idx_habits_user ON habits(user_id, status);

    CREATE TABLE IF NOT EXISTS habit_entries (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        habit_id         INTEGER NOT NULL REFERENCES habits(id),
        user_id          TEXT NOT NULL,
        completed_at     TEXT NOT NULL,
        status           TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_habit_entries_habit ON habit_entries(habit_id, user_id);

    -- ============================================
    -- Derived (regenerable)
    -- ============================================

    CREATE TABLE IF NOT EXISTS habit_stats (
        habit_id           INTEGER NOT NULL REFERENCES habits(id),
        user_id            TEXT NOT NULL,
        total_check_ins    INTEGER NOT NULL DEFAULT 0,
        current_streak     INTEGER NOT NULL DEFAULT 0,
        longest_streak     INTEGER NOT NULL DEFAULT 0,
        completion_rate    REAL NOT NULL DEFAULT 0,    -- percent
        last_check_in_date TEXT,
        failed_count       INTEGER NOT NULL DEFAULT 0,
        updated_at         TEXT NOT NULL,
        PRIMARY KEY (habit_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS global_habit_stats (
        id                      INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id                 TEXT NOT NULL,
        time_range              TEXT NOT NULL,
        period_start            TEXT NOT NULL,
        period_end              TEXT NOT NULL,
        overall_completion_rate REAL NOT NULL DEFAULT 0,    -- fraction
        total_check_ins         INTEGER NOT NULL DEFAULT 0,
        total_failed            INTEGER NOT NULL DEFAULT 0,
        best_habit_id           INTEGER,
        worst_habit_id          INTEGER,
        daily_trend             TEXT NOT NULL DEFAULT '[]',
        created_at              TEXT NOT NULL,
        updated_at              TEXT NOT NULL,
        UNIQUE (user_id, time_range, period_start)
    );
    "#,
    // Version 2: narrated reports
    r#"
    CREATE TABLE IF NOT EXISTS ai_insights (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id          TEXT NOT NULL,
        kind             TEXT NOT NULL,
        period_start     TEXT NOT NULL,
        title            TEXT NOT NULL,
        content          TEXT NOT NULL,
        model            TEXT,
        prompt_hash      TEXT,
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL,
        UNIQUE (user_id, kind, period_start)
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "habits",
            "habit_entries",
            "habit_stats",
            "global_habit_stats",
            "ai_insights",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_upgrade_from_v1() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.execute("PRAGMA user_version = 1", []).unwrap();

        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), 2);
        let exists: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='ai_insights'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(exists, 1);
    }

    #[test]
    fn test_window_stats_unique_per_period() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let insert = "INSERT INTO global_habit_stats
            (user_id, time_range, period_start, period_end, created_at, updated_at)
            VALUES ('u1', 'month', '2026-10-01 00:00:00', '2026-10-16 09:00:00',
                    '2026-10-16 09:00:00', '2026-10-16 09:00:00')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
