//! # habitstats-core
//!
//! Core library for habitstats - streaks and completion rates for habit
//! check-ins.
//!
//! This library provides:
//! - Domain types for habits, check-ins and derived stats
//! - Database storage layer with SQLite
//! - Streak, cadence and windowed-rollup computation
//! - A stats service that keeps the derived caches current
//! - Optional LLM narration of reports
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! - **Upstream records:** `habits` and `habit_entries`, read-only to the engine
//! - **Analytics:** pure functions over loaded events ([`analytics`])
//! - **Derived caches:** `habit_stats` per habit, `global_habit_stats` per
//!   user and calendar window, both regenerable
//!
//! ## Example
//!
//! ```rust,no_run
//! use habitstats_core::{Config, Database, StatsService, TimeRange};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&config.resolved_database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let service = StatsService::with_config(&db, config.analytics.clone());
//! let month = service.get_window_stats("user-1", TimeRange::Month).expect("stats");
//! println!("{:.0}%", month.overall_completion_rate * 100.0);
//! ```

pub use analytics::{HabitReport, TimeRange, WindowReport};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use service::{StatsService, SweepFailure, SweepReport};
pub use types::*;

pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod narrative;
pub mod service;
pub mod types;
