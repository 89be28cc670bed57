//! Text, Markdown, JSON and CSV output for each command.

use std::fmt::Write as _;

use anyhow::Result;
use clap::ValueEnum;
use habitstats_core::{
    Habit, HabitReport, HabitStats, Insight, NamedHabitStats, SweepReport, TimeRange,
    WindowReport,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Md,
    /// Tabular rows only, for spreadsheets
    Csv,
}

fn json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(format!("{}\n", serde_json::to_string_pretty(value)?))
}

fn csv_rows<T, I>(rows: I) -> Result<String>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV output: {}", e.error()))?;
    Ok(String::from_utf8(bytes)?)
}

/// One habit's cached stats as a CSV record
#[derive(Serialize)]
struct HabitCsvRow<'a> {
    habit_id: i64,
    name: &'a str,
    current_streak: i64,
    longest_streak: i64,
    total_check_ins: i64,
    failed_count: i64,
    completion_rate: f64,
    last_check_in_date: Option<String>,
    updated_at: String,
}

impl<'a> HabitCsvRow<'a> {
    fn new(name: &'a str, stats: &HabitStats) -> Self {
        Self {
            habit_id: stats.habit_id,
            name,
            current_streak: stats.current_streak,
            longest_streak: stats.longest_streak,
            total_check_ins: stats.total_check_ins,
            failed_count: stats.failed_count,
            completion_rate: stats.completion_rate,
            last_check_in_date: stats
                .last_check_in_date
                .map(|d| d.format("%Y-%m-%d").to_string()),
            updated_at: stats.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Percentage stored on [`HabitStats`]
fn percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Fraction used by windowed stats
fn fraction(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

fn days(n: i64) -> String {
    format!("{} day{}", n, if n == 1 { "" } else { "s" })
}

fn last_check_in(stats: &HabitStats) -> String {
    stats
        .last_check_in_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "never".to_string())
}

// ============================================
// update
// ============================================

pub fn sweep(report: &SweepReport, format: OutputFormat) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => return json(report),
        OutputFormat::Csv => return csv_rows(&report.failures),
        OutputFormat::Text => {
            writeln!(out, "Stats update complete:")?;
            writeln!(out, "  Users:   {}", report.users)?;
            writeln!(out, "  Updated: {}", report.updated)?;
            writeln!(out, "  Failed:  {}", report.failures.len())?;
            for failure in &report.failures {
                let habit = failure
                    .habit_id
                    .map(|id| format!("habit {}", id))
                    .unwrap_or_else(|| "all habits".to_string());
                writeln!(out, "    {} / {}: {}", failure.user_id, habit, failure.error)?;
            }
        }
        OutputFormat::Md => {
            writeln!(out, "# Stats update")?;
            writeln!(out)?;
            writeln!(out, "| Metric | Value |")?;
            writeln!(out, "|--------|-------|")?;
            writeln!(out, "| Users | {} |", report.users)?;
            writeln!(out, "| Updated | {} |", report.updated)?;
            writeln!(out, "| Failed | {} |", report.failures.len())?;
            if !report.failures.is_empty() {
                writeln!(out)?;
                writeln!(out, "## Failures")?;
                writeln!(out)?;
                for failure in &report.failures {
                    let habit = failure
                        .habit_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    writeln!(
                        out,
                        "- `{}` habit {}: {}",
                        failure.user_id, habit, failure.error
                    )?;
                }
            }
        }
    }
    Ok(out)
}

// ============================================
// stats
// ============================================

pub fn habit_stats(
    stats: &HabitStats,
    habit: Option<&Habit>,
    range: Option<TimeRange>,
    format: OutputFormat,
) -> Result<String> {
    if format == OutputFormat::Json {
        return json(stats);
    }

    let name = habit
        .map(|h| h.name.clone())
        .unwrap_or_else(|| format!("Habit {}", stats.habit_id));
    if format == OutputFormat::Csv {
        return csv_rows([HabitCsvRow::new(&name, stats)]);
    }
    let rate_label = match range {
        Some(range) => format!("Completion ({})", range),
        None => "Completion".to_string(),
    };

    let mut out = String::new();
    if format == OutputFormat::Md {
        writeln!(out, "# {}", name)?;
        writeln!(out)?;
        writeln!(out, "| Metric | Value |")?;
        writeln!(out, "|--------|-------|")?;
        writeln!(out, "| Current streak | {} |", days(stats.current_streak))?;
        writeln!(out, "| Longest streak | {} |", days(stats.longest_streak))?;
        writeln!(out, "| Check-ins | {} |", stats.total_check_ins)?;
        writeln!(out, "| Failed | {} |", stats.failed_count)?;
        writeln!(out, "| {} | {} |", rate_label, percent(stats.completion_rate))?;
        writeln!(out, "| Last check-in | {} |", last_check_in(stats))?;
        return Ok(out);
    }

    writeln!(out, "{}", name)?;
    writeln!(out, "  Current streak: {}", days(stats.current_streak))?;
    writeln!(out, "  Longest streak: {}", days(stats.longest_streak))?;
    writeln!(out, "  Check-ins:      {}", stats.total_check_ins)?;
    writeln!(out, "  Failed:         {}", stats.failed_count)?;
    writeln!(out, "  {:<16}{}", format!("{}:", rate_label), percent(stats.completion_rate))?;
    writeln!(out, "  Last check-in:  {}", last_check_in(stats))?;
    Ok(out)
}

// ============================================
// all
// ============================================

pub fn all_stats(user_id: &str, stats: &[NamedHabitStats], format: OutputFormat) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => return json(stats),
        OutputFormat::Csv => {
            return csv_rows(stats.iter().map(|s| HabitCsvRow::new(&s.name, &s.stats)))
        }
        OutputFormat::Text => {
            writeln!(out, "Habits for {}", user_id)?;
            if stats.is_empty() {
                writeln!(out, "  No stats yet. Run `habitstats update` first.")?;
                return Ok(out);
            }
            writeln!(
                out,
                "  {:<24} {:>8} {:>8} {:>10} {:>9}",
                "Habit", "Current", "Longest", "Completion", "Check-ins"
            )?;
            for s in stats {
                writeln!(
                    out,
                    "  {:<24} {:>8} {:>8} {:>10} {:>9}",
                    s.name,
                    s.stats.current_streak,
                    s.stats.longest_streak,
                    percent(s.stats.completion_rate),
                    s.stats.total_check_ins
                )?;
            }
        }
        OutputFormat::Md => {
            writeln!(out, "# Habits for {}", user_id)?;
            writeln!(out)?;
            if stats.is_empty() {
                writeln!(out, "*No stats yet.*")?;
                return Ok(out);
            }
            writeln!(out, "| Habit | Current | Longest | Completion | Check-ins |")?;
            writeln!(out, "|-------|---------|---------|------------|-----------|")?;
            for s in stats {
                writeln!(
                    out,
                    "| {} | {} | {} | {} | {} |",
                    s.name,
                    s.stats.current_streak,
                    s.stats.longest_streak,
                    percent(s.stats.completion_rate),
                    s.stats.total_check_ins
                )?;
            }
        }
    }
    Ok(out)
}

// ============================================
// report
// ============================================

#[derive(Serialize)]
struct ReportOutput<'a> {
    #[serde(flatten)]
    report: &'a HabitReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    narrative: Option<&'a Insight>,
}

pub fn report(
    user_id: &str,
    report: &HabitReport,
    narrative: Option<&Insight>,
    format: OutputFormat,
) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => return json(&ReportOutput { report, narrative }),
        // Narrative text has no tabular form
        OutputFormat::Csv => {
            return csv_rows(
                report
                    .habits_by_streak
                    .iter()
                    .map(|s| HabitCsvRow::new(&s.name, &s.stats)),
            )
        }
        OutputFormat::Text => {
            writeln!(out, "Habit report for {}", user_id)?;
            writeln!(out, "  Habits:          {}", report.total_habits)?;
            writeln!(out, "  On a streak:     {}", report.active_habits)?;
            writeln!(out, "  Avg completion:  {}", percent(report.avg_completion_rate))?;
            writeln!(out, "  Longest streak:  {}", days(report.max_streak))?;
            writeln!(out, "  Best current:    {}", days(report.current_max_streak))?;
            if !report.habits_by_streak.is_empty() {
                writeln!(out)?;
                writeln!(out, "TOP STREAKS")?;
                for (i, s) in report.habits_by_streak.iter().enumerate() {
                    writeln!(
                        out,
                        "  {}. {:<24} {}",
                        i + 1,
                        s.name,
                        days(s.stats.current_streak)
                    )?;
                }
            }
            if let Some(insight) = narrative {
                writeln!(out)?;
                writeln!(out, "{}", insight.title.to_uppercase())?;
                writeln!(out, "{}", insight.content)?;
            }
        }
        OutputFormat::Md => {
            writeln!(out, "# Habit report for {}", user_id)?;
            writeln!(out)?;
            writeln!(out, "| Metric | Value |")?;
            writeln!(out, "|--------|-------|")?;
            writeln!(out, "| Habits | {} |", report.total_habits)?;
            writeln!(out, "| On a streak | {} |", report.active_habits)?;
            writeln!(out, "| Avg completion | {} |", percent(report.avg_completion_rate))?;
            writeln!(out, "| Longest streak | {} |", days(report.max_streak))?;
            writeln!(out, "| Best current streak | {} |", days(report.current_max_streak))?;
            if !report.habits_by_streak.is_empty() {
                writeln!(out)?;
                writeln!(out, "## Top streaks")?;
                writeln!(out)?;
                for (i, s) in report.habits_by_streak.iter().enumerate() {
                    writeln!(
                        out,
                        "{}. **{}**: {}",
                        i + 1,
                        s.name,
                        days(s.stats.current_streak)
                    )?;
                }
            }
            if let Some(insight) = narrative {
                writeln!(out)?;
                writeln!(out, "## {}", insight.title)?;
                writeln!(out)?;
                writeln!(out, "{}", insight.content)?;
            }
        }
    }
    Ok(out)
}

// ============================================
// range
// ============================================

pub fn window(user_id: &str, report: &WindowReport, format: OutputFormat) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => return json(report),
        OutputFormat::Csv => return csv_rows(&report.habit_stats),
        OutputFormat::Text => {
            writeln!(out, "{} for {}", report.period_label, user_id)?;
            writeln!(out, "  Overall completion: {}", fraction(report.overall_completion_rate))?;
            writeln!(out, "  Check-ins:          {}", report.total_check_ins)?;
            writeln!(out, "  Failed:             {}", report.total_failed)?;
            if let Some(best) = &report.best_habit {
                writeln!(out, "  Best:               {} ({})", best.name, fraction(best.completion_rate))?;
            }
            if let Some(worst) = &report.worst_habit {
                writeln!(out, "  Needs attention:    {} ({})", worst.name, fraction(worst.completion_rate))?;
            }
            if report.habit_stats.is_empty() {
                writeln!(out, "  No active habits.")?;
                return Ok(out);
            }
            writeln!(out)?;
            writeln!(
                out,
                "  {:<24} {:>10} {:>7} {:>6} {:>7}",
                "Habit", "Completion", "Streak", "Done", "Missed"
            )?;
            for h in &report.habit_stats {
                writeln!(
                    out,
                    "  {:<24} {:>10} {:>7} {:>6} {:>7}",
                    h.name,
                    fraction(h.completion_rate),
                    h.streak,
                    h.total_completions,
                    h.missed_days
                )?;
            }
            if !report.daily_trend.is_empty() {
                writeln!(out)?;
                writeln!(out, "DAILY TREND")?;
                for point in &report.daily_trend {
                    writeln!(
                        out,
                        "  {}  {:>6}",
                        point.date.format("%Y-%m-%d"),
                        fraction(point.completion_rate)
                    )?;
                }
            }
        }
        OutputFormat::Md => {
            writeln!(out, "# {} for {}", report.period_label, user_id)?;
            writeln!(out)?;
            writeln!(out, "| Metric | Value |")?;
            writeln!(out, "|--------|-------|")?;
            writeln!(out, "| Overall completion | {} |", fraction(report.overall_completion_rate))?;
            writeln!(out, "| Check-ins | {} |", report.total_check_ins)?;
            writeln!(out, "| Failed | {} |", report.total_failed)?;
            if let Some(best) = &report.best_habit {
                writeln!(out, "| Best | {} |", best.name)?;
            }
            if let Some(worst) = &report.worst_habit {
                writeln!(out, "| Needs attention | {} |", worst.name)?;
            }
            if !report.habit_stats.is_empty() {
                writeln!(out)?;
                writeln!(out, "## Habits")?;
                writeln!(out)?;
                writeln!(out, "| Habit | Completion | Streak | Done | Missed |")?;
                writeln!(out, "|-------|------------|--------|------|--------|")?;
                for h in &report.habit_stats {
                    writeln!(
                        out,
                        "| {} | {} | {} | {} | {} |",
                        h.name,
                        fraction(h.completion_rate),
                        h.streak,
                        h.total_completions,
                        h.missed_days
                    )?;
                }
            }
        }
    }
    Ok(out)
}
