use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};

use crate::model::{Snapshot, Task};

pub const DEFAULT_TOP_SECTIONS: usize = 3;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Completion counts per section name, in the order each name was first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionCounts {
    entries: Vec<(String, usize)>,
}

impl SectionCounts {
    pub fn add(&mut self, name: &str) {
        match self.entries.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((name.to_string(), 1)),
        }
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, count)| *count)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn entries(&self) -> &[(String, usize)] {
        &self.entries
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Completions per ISO weekday for the current week, always Mon..Sun.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeekdayCounts {
    counts: [usize; 7],
}

impl WeekdayCounts {
    pub fn get(&self, weekday: Weekday) -> usize {
        self.counts[weekday.num_days_from_monday() as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Weekday, usize)> + '_ {
        WEEKDAYS.iter().map(|day| (*day, self.get(*day)))
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

pub fn weekday_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// Everything the dashboard shows, derived from one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dashboard {
    pub captured_at: DateTime<Utc>,
    pub monthly_counts: SectionCounts,
    pub monthly_total: usize,
    pub top_sections: Vec<(String, usize)>,
    pub sections_without_active: Vec<String>,
    pub sections_without_completions: Vec<String>,
    pub weekday_counts: WeekdayCounts,
    pub calendar_counts: BTreeMap<NaiveDate, usize>,
}

impl Dashboard {
    pub fn calendar_max(&self) -> usize {
        self.calendar_counts.values().copied().max().unwrap_or(0)
    }
}

pub fn compute_dashboard(snapshot: &Snapshot, now: DateTime<Utc>, top_n: usize) -> Dashboard {
    let monthly_counts = monthly_section_counts(snapshot, now);
    let top = top_sections(&monthly_counts, top_n);
    let sections_without_completions = sections_without_monthly_completions(snapshot, &monthly_counts);
    Dashboard {
        captured_at: snapshot.captured_at,
        monthly_total: monthly_counts.total(),
        top_sections: top,
        sections_without_active: sections_without_active(snapshot),
        sections_without_completions,
        weekday_counts: weekday_counts(&snapshot.all_completed, now),
        calendar_counts: calendar_day_counts(&snapshot.all_completed, now),
        monthly_counts,
    }
}

fn same_month(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    timestamp.year() == now.year() && timestamp.month() == now.month()
}

pub fn monthly_section_counts(snapshot: &Snapshot, now: DateTime<Utc>) -> SectionCounts {
    let mut counts = SectionCounts::default();
    for task in &snapshot.completed_tasks {
        let Some(completed) = task.completed_at_utc() else {
            continue;
        };
        if same_month(completed, now) {
            counts.add(snapshot.resolved_section_name(task.section_id.as_deref()));
        }
    }
    counts
}

pub fn top_sections(counts: &SectionCounts, n: usize) -> Vec<(String, usize)> {
    let mut ranked = counts.entries().to_vec();
    // sort_by is stable, so equal counts keep their first-seen order
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(n);
    ranked
}

pub fn sections_without_active(snapshot: &Snapshot) -> Vec<String> {
    let with_active: HashSet<&str> = snapshot
        .active_tasks
        .iter()
        .filter_map(|task| snapshot.section_name(task.section_id.as_deref()))
        .collect();
    snapshot
        .sections
        .iter()
        .filter(|section| !with_active.contains(section.name.as_str()))
        .map(|section| section.name.clone())
        .collect()
}

pub fn sections_without_monthly_completions(
    snapshot: &Snapshot,
    counts: &SectionCounts,
) -> Vec<String> {
    snapshot
        .sections
        .iter()
        .filter(|section| !counts.contains(&section.name))
        .map(|section| section.name.clone())
        .collect()
}

/// Monday 00:00:00 UTC of the week containing `now`.
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_back = i64::from(now.weekday().num_days_from_monday());
    let monday = now.date_naive() - Duration::days(days_back);
    monday.and_time(NaiveTime::MIN).and_utc()
}

pub fn weekday_counts(tasks: &[Task], now: DateTime<Utc>) -> WeekdayCounts {
    let start = week_start(now);
    let mut counts = WeekdayCounts::default();
    for completed in tasks.iter().filter_map(Task::completed_at_utc) {
        if completed >= start {
            counts.counts[completed.weekday().num_days_from_monday() as usize] += 1;
        }
    }
    counts
}

pub fn calendar_day_counts(tasks: &[Task], now: DateTime<Utc>) -> BTreeMap<NaiveDate, usize> {
    let mut days = BTreeMap::new();
    for completed in tasks.iter().filter_map(Task::completed_at_utc) {
        if same_month(completed, now) {
            *days.entry(completed.date_naive()).or_default() += 1;
        }
    }
    days
}

/// Heat-map band for a day: 0 for no completions, then quarters of `max`.
pub fn intensity_level(count: usize, max: usize) -> u8 {
    if count == 0 || max == 0 {
        return 0;
    }
    let ratio = count as f64 / max as f64;
    if ratio <= 0.25 {
        1
    } else if ratio <= 0.5 {
        2
    } else if ratio <= 0.75 {
        3
    } else {
        4
    }
}
