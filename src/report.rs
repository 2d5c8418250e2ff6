use std::fmt::Write;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};

use crate::analytics::{Dashboard, weekday_label};

/// Compact age for the status banner, e.g. `42s`, `10m`, `2h 5m`.
pub fn format_elapsed(duration: Duration) -> String {
    match duration.as_secs() {
        secs @ 0..=59 => format!("{secs}s"),
        secs @ 60..=3599 => format!("{}m", secs / 60),
        secs => match (secs / 3600, secs % 3600 / 60) {
            (hours, 0) => format!("{hours}h"),
            (hours, minutes) => format!("{hours}h {minutes}m"),
        },
    }
}

pub fn format_captured_at(captured_at: DateTime<Utc>) -> String {
    captured_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Fraction of the monthly goal reached, capped at 1.0.
pub fn goal_progress(count: usize, goal: u32) -> f32 {
    if goal == 0 {
        return 0.0;
    }
    (count as f32 / goal as f32).min(1.0)
}

pub fn render_text(dashboard: &Dashboard, monthly_goal: u32) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Todoist Analytics (updated {})\n",
        format_captured_at(dashboard.captured_at)
    );
    let _ = writeln!(
        out,
        "Completed this month: {} / {} ({:.0}%)",
        dashboard.monthly_total,
        monthly_goal,
        goal_progress(dashboard.monthly_total, monthly_goal) * 100.0
    );

    let _ = writeln!(out, "\nTop sections:");
    if dashboard.top_sections.is_empty() {
        let _ = writeln!(out, " (no completed tasks this month)");
    }
    for (idx, (name, count)) in dashboard.top_sections.iter().enumerate() {
        let _ = writeln!(out, " {}. {} - {} / {}", idx + 1, name, count, monthly_goal);
    }

    if !dashboard.monthly_counts.is_empty() {
        let _ = writeln!(out, "\nCompleted by section:");
        for (name, count) in dashboard.monthly_counts.entries() {
            let _ = writeln!(out, " - {name}: {count}");
        }
    }

    write_name_list(&mut out, "Sections without active tasks", &dashboard.sections_without_active);
    write_name_list(
        &mut out,
        "Sections without completions this month",
        &dashboard.sections_without_completions,
    );

    let _ = writeln!(out, "\nThis week:");
    let week = dashboard
        .weekday_counts
        .iter()
        .map(|(day, count)| format!("{} {}", weekday_label(day), count))
        .collect::<Vec<_>>()
        .join(" | ");
    let _ = writeln!(out, " {week}");

    if !dashboard.calendar_counts.is_empty() {
        let _ = writeln!(out, "\nActive days this month:");
        for (day, count) in &dashboard.calendar_counts {
            let _ = writeln!(out, " {} - {}", day.format("%Y-%m-%d"), count);
        }
    }
    out
}

fn write_name_list(out: &mut String, title: &str, names: &[String]) {
    let _ = writeln!(out, "\n{title}:");
    if names.is_empty() {
        let _ = writeln!(out, " (none)");
    }
    for name in names {
        let _ = writeln!(out, " - {name}");
    }
}
