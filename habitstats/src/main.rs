//! habitstats - habit streaks and completion rates
//!
//! Commands:
//! - `update`: recompute cached stats for one user or everyone
//! - `stats`: one habit's streaks and completion rate
//! - `all`: every habit of a user
//! - `report`: summary report, optionally narrated by an LLM
//! - `range`: week/month/quarter/year rollup
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/habitstats/data.db (~/.local/share/habitstats/data.db)
//! - Config: $XDG_CONFIG_HOME/habitstats/config.toml (~/.config/habitstats/config.toml)

mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use habitstats_core::narrative::{create_narrative_client, narrate_report};
use habitstats_core::{local_now, Config, Database, StatsService, TimeRange};

use crate::render::OutputFormat;

#[derive(Parser)]
#[command(name = "habitstats")]
#[command(about = "Habit check-in streaks, completion rates and windowed reports")]
#[command(version)]
struct Args {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Database path (default: [database] path from config, then the XDG data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recompute cached stats for every habit of one user, or of all users
    Update {
        /// Only update this user
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Show stats for one habit
    Stats {
        user_id: String,
        habit_id: i64,

        /// Recompute instead of using cached stats
        #[arg(long)]
        refresh: bool,

        /// Compute the completion rate against this window's expected check-ins
        #[arg(long, value_parser = parse_range)]
        range: Option<TimeRange>,
    },

    /// Show cached stats for all habits of a user
    All { user_id: String },

    /// Summary report over a user's habits
    Report {
        user_id: String,

        /// Add an LLM-written narrative (needs [llm] config or OPENAI_* env vars)
        #[arg(long)]
        narrate: bool,

        /// Regenerate the narrative even if the data has not changed
        #[arg(long, requires = "narrate")]
        force: bool,
    },

    /// Rollup for the current week, month, quarter or year
    Range {
        user_id: String,

        #[arg(default_value = "month", value_parser = parse_range)]
        range: TimeRange,
    },
}

fn parse_range(s: &str) -> std::result::Result<TimeRange, String> {
    s.parse::<TimeRange>().map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = habitstats_core::logging::init(&config.logging).ok();

    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| config.resolved_database_path());
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let service = StatsService::with_config(&db, config.analytics.clone());

    match args.command {
        Command::Update { user_id } => {
            let report = service
                .update_all_user_stats(user_id.as_deref())
                .context("failed to update stats")?;
            print!("{}", render::sweep(&report, args.format)?);
            if !report.is_clean() {
                anyhow::bail!("{} update(s) failed", report.failures.len());
            }
        }
        Command::Stats {
            user_id,
            habit_id,
            refresh,
            range,
        } => {
            let stats = match range {
                Some(range) => service.refresh_habit_stats(habit_id, &user_id, Some(range)),
                None => service.get_habit_stats(habit_id, &user_id, refresh),
            }
            .with_context(|| format!("failed to get stats for habit {}", habit_id))?;
            let habit = db.get_habit(habit_id)?;
            print!(
                "{}",
                render::habit_stats(&stats, habit.as_ref(), range, args.format)?
            );
        }
        Command::All { user_id } => {
            let stats = service
                .get_all_user_stats(&user_id)
                .context("failed to load stats")?;
            print!("{}", render::all_stats(&user_id, &stats, args.format)?);
        }
        Command::Report {
            user_id,
            narrate,
            force,
        } => {
            let report = service
                .generate_stats_report(&user_id)
                .context("failed to generate report")?;

            if !narrate {
                print!("{}", render::report(&user_id, &report, None, args.format)?);
                return Ok(());
            }

            let llm = config.resolve_llm().context(
                "narration needs an [llm] section in config.toml or OPENAI_API_KEY and OPENAI_MODEL",
            )?;
            let client = create_narrative_client(&llm).context("failed to create LLM client")?;
            let payload = serde_json::to_value(&report)?;
            let narration = narrate_report(
                &db,
                &user_id,
                local_now().date(),
                &payload,
                &llm,
                client.as_ref(),
                force,
            );

            match narration {
                Ok(narration) => print!(
                    "{}",
                    render::report(&user_id, &report, Some(&narration.insight), args.format)?
                ),
                Err(e) => {
                    // Stats are still valid without the narrative
                    print!("{}", render::report(&user_id, &report, None, args.format)?);
                    return Err(e).context("failed to narrate report");
                }
            }
        }
        Command::Range { user_id, range } => {
            let window = service
                .get_window_stats(&user_id, range)
                .with_context(|| format!("failed to compute {} stats", range))?;
            print!("{}", render::window(&user_id, &window, args.format)?);
        }
    }

    Ok(())
}
