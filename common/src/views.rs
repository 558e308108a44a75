// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.

//! Read-only projections over the task collection.
//!
//! Every function here scans the slice it is given; nothing is cached.
//! Calendar-day bucketing uses the offset carried by `now`.
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc, Weekday};
use serde::Serialize;

use crate::store::{percentage, sort_tasks};
use crate::task::{DEFAULT_CATEGORY, SortKey, Task};

const TREND_DAYS: i64 = 7;
const PRODUCTIVITY_WINDOW_DAYS: i64 = 30;
const UPCOMING_WINDOW_DAYS: i64 = 7;
const DASHBOARD_LIST_LEN: usize = 5;
const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// The calendar day `ts` falls on at `offset`.
pub fn local_day(ts: DateTime<Utc>, offset: &FixedOffset) -> NaiveDate {
    ts.with_timezone(offset).date_naive()
}

fn is_due_on(task: &Task, day: NaiveDate, offset: &FixedOffset) -> bool {
    task.due_date.is_some_and(|due| local_day(due, offset) == day)
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub overdue: usize,
    pub due_today: usize,
}

pub fn summary(tasks: &[Task], now: DateTime<FixedOffset>) -> Summary {
    let now_utc = now.with_timezone(&Utc);
    let today = now.date_naive();
    let completed = tasks.iter().filter(|t| t.completed).count();
    Summary {
        total: tasks.len(),
        active: tasks.len() - completed,
        completed,
        overdue: tasks.iter().filter(|t| t.is_overdue(now_utc)).count(),
        due_today: tasks
            .iter()
            .filter(|t| is_due_on(t, today, now.offset()))
            .count(),
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrendDay {
    pub date: NaiveDate,
    pub completed: usize,
    pub created: usize,
    /// `completed / created` as a whole percentage, 0 when nothing was created.
    pub efficiency: u32,
}

/// One entry per day for the trailing week, oldest first, today last.
pub fn completion_trend(tasks: &[Task], now: DateTime<FixedOffset>) -> Vec<TrendDay> {
    let offset = now.offset();
    let today = now.date_naive();
    (0..TREND_DAYS)
        .rev()
        .map(|days_back| {
            let date = today - Duration::days(days_back);
            let completed = tasks
                .iter()
                .filter(|t| t.completed_at.is_some_and(|at| local_day(at, offset) == date))
                .count();
            let created = tasks
                .iter()
                .filter(|t| local_day(t.created_at, offset) == date)
                .count();
            TrendDay {
                date,
                completed,
                created,
                efficiency: percentage(completed, created),
            }
        })
        .collect()
}

/// Tasks grouped by the day they are due. Tasks without a due date are left out.
pub fn group_by_due_day(tasks: &[Task], offset: &FixedOffset) -> BTreeMap<NaiveDate, Vec<Task>> {
    let mut groups: BTreeMap<NaiveDate, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        if let Some(due) = task.due_date {
            groups
                .entry(local_day(due, offset))
                .or_default()
                .push(task.clone());
        }
    }
    groups
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub is_today: bool,
    pub is_past: bool,
    pub tasks: Vec<Task>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarMonth {
    pub year: i32,
    pub month: u32,
    /// Blank cells before the 1st; Sunday is column 0.
    pub leading_blanks: u32,
    /// Row-major cells of a 7-column grid: `leading_blanks` `None`s, then one
    /// cell per day of the month.
    pub cells: Vec<Option<CalendarDay>>,
}

fn calendar_day(
    groups: &BTreeMap<NaiveDate, Vec<Task>>,
    date: NaiveDate,
    today: NaiveDate,
) -> CalendarDay {
    CalendarDay {
        date,
        is_today: date == today,
        is_past: date < today,
        tasks: groups.get(&date).cloned().unwrap_or_default(),
    }
}

/// Month grid for `year`/`month`. `None` for an invalid month.
pub fn calendar_month(
    tasks: &[Task],
    year: i32,
    month: u32,
    now: DateTime<FixedOffset>,
) -> Option<CalendarMonth> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let leading_blanks = first.weekday().num_days_from_sunday();
    let groups = group_by_due_day(tasks, now.offset());
    let today = now.date_naive();

    let mut cells: Vec<Option<CalendarDay>> = (0..leading_blanks).map(|_| None).collect();
    cells.extend(
        first
            .iter_days()
            .take_while(|date| *date < next_first)
            .map(|date| Some(calendar_day(&groups, date, today))),
    );

    Some(CalendarMonth {
        year,
        month,
        leading_blanks,
        cells,
    })
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarWeek {
    pub start: NaiveDate,
    pub days: Vec<CalendarDay>,
}

/// The Sunday-to-Saturday week containing `date`.
pub fn calendar_week(tasks: &[Task], date: NaiveDate, now: DateTime<FixedOffset>) -> CalendarWeek {
    let start = date - Duration::days(i64::from(date.weekday().num_days_from_sunday()));
    let groups = group_by_due_day(tasks, now.offset());
    let today = now.date_naive();
    CalendarWeek {
        start,
        days: start
            .iter_days()
            .take(7)
            .map(|day| calendar_day(&groups, day, today))
            .collect(),
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub name: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub total: usize,
    pub by_category: Vec<Share>,
    pub by_priority: Vec<Share>,
}

fn shares<'a>(names: impl Iterator<Item = &'a str>, total: usize) -> Vec<Share> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in names {
        *counts.entry(name).or_default() += 1;
    }
    let mut shares: Vec<Share> = counts
        .into_iter()
        .map(|(name, count)| Share {
            name: name.to_string(),
            count,
            percentage: if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            },
        })
        .collect();
    shares.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    shares
}

/// Occurrence counts of every category and priority actually present,
/// largest first.
pub fn distribution(tasks: &[Task]) -> Distribution {
    let total = tasks.len();
    Distribution {
        total,
        by_category: shares(tasks.iter().map(|t| t.category.as_str()), total),
        by_priority: shares(tasks.iter().map(|t| t.priority.as_str()), total),
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub summary: Summary,
    pub recent: Vec<Task>,
    pub upcoming: Vec<Task>,
    pub overdue: Vec<Task>,
    pub today: Vec<Task>,
}

pub fn dashboard(tasks: &[Task], now: DateTime<FixedOffset>) -> Dashboard {
    let now_utc = now.with_timezone(&Utc);
    let horizon = now_utc + Duration::days(UPCOMING_WINDOW_DAYS);
    let today = now.date_naive();

    let mut recent = tasks.to_vec();
    sort_tasks(&mut recent, SortKey::Created);
    recent.truncate(DASHBOARD_LIST_LEN);

    let mut upcoming: Vec<Task> = tasks
        .iter()
        .filter(|t| !t.completed && t.due_date.is_some_and(|due| due >= now_utc && due <= horizon))
        .cloned()
        .collect();
    sort_tasks(&mut upcoming, SortKey::DueDate);
    upcoming.truncate(DASHBOARD_LIST_LEN);

    Dashboard {
        summary: summary(tasks, now),
        recent,
        upcoming,
        overdue: tasks.iter().filter(|t| t.is_overdue(now_utc)).cloned().collect(),
        today: tasks
            .iter()
            .filter(|t| is_due_on(t, today, now.offset()))
            .cloned()
            .collect(),
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Productivity {
    pub completed: usize,
    pub created: usize,
    pub completion_rate: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    /// Activity over the last 30 days.
    pub productivity: Productivity,
    pub overdue: Vec<Task>,
    pub without_due_date: usize,
    pub average_completion_days: u32,
    pub most_productive_day: Option<Weekday>,
    pub trend: Vec<TrendDay>,
    pub distribution: Distribution,
}

pub fn analytics(tasks: &[Task], now: DateTime<FixedOffset>) -> Analytics {
    let now_utc = now.with_timezone(&Utc);
    let window_start = now_utc - Duration::days(PRODUCTIVITY_WINDOW_DAYS);
    let completed = tasks
        .iter()
        .filter(|t| t.completed && t.completed_at.is_some_and(|at| at >= window_start))
        .count();
    let created = tasks.iter().filter(|t| t.created_at >= window_start).count();

    Analytics {
        productivity: Productivity {
            completed,
            created,
            completion_rate: percentage(completed, created),
        },
        overdue: tasks.iter().filter(|t| t.is_overdue(now_utc)).cloned().collect(),
        without_due_date: tasks
            .iter()
            .filter(|t| !t.completed && t.due_date.is_none())
            .count(),
        average_completion_days: average_completion_days(tasks),
        most_productive_day: most_productive_day(tasks, now.offset()),
        trend: completion_trend(tasks, now),
        distribution: distribution(tasks),
    }
}

/// Mean of the whole days (rounded up) each completed task took, rounded.
pub fn average_completion_days(tasks: &[Task]) -> u32 {
    let spans: Vec<i64> = tasks
        .iter()
        .filter(|t| t.completed)
        .filter_map(|t| t.completed_at.map(|done| (done - t.created_at).abs()))
        .map(|span| {
            let secs = span.num_seconds();
            (secs + 86_399) / 86_400
        })
        .collect();
    if spans.is_empty() {
        return 0;
    }
    (spans.iter().sum::<i64>() as f64 / spans.len() as f64).round() as u32
}

/// Weekday with the most completions; ties go to the earlier weekday
/// (Monday first).
pub fn most_productive_day(tasks: &[Task], offset: &FixedOffset) -> Option<Weekday> {
    let mut counts = [0usize; 7];
    for task in tasks.iter().filter(|t| t.completed) {
        if let Some(at) = task.completed_at {
            let weekday = at.with_timezone(offset).weekday();
            counts[weekday.num_days_from_monday() as usize] += 1;
        }
    }
    let (index, best) = counts
        .iter()
        .enumerate()
        .fold((0, 0), |acc, (i, &n)| if n > acc.1 { (i, n) } else { acc });
    if best == 0 {
        return None;
    }
    Some(WEEKDAYS[index])
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub total: usize,
    pub completed: usize,
    /// Minutes across all tasks.
    pub total_time_spent: u64,
    /// Minutes per completed task.
    pub average_time_per_task: f64,
    pub favorite_category: String,
    pub most_productive_day: Option<Weekday>,
}

pub fn profile(tasks: &[Task], now: DateTime<FixedOffset>) -> Profile {
    let completed = tasks.iter().filter(|t| t.completed).count();
    let total_time_spent: u64 = tasks.iter().map(|t| u64::from(t.time_spent)).sum();
    Profile {
        total: tasks.len(),
        completed,
        total_time_spent,
        average_time_per_task: if completed == 0 {
            0.0
        } else {
            total_time_spent as f64 / completed as f64
        },
        favorite_category: favorite_category(tasks),
        most_productive_day: most_productive_day(tasks, now.offset()),
    }
}

/// Category with the most completed tasks, "Personal" when nothing is done.
pub fn favorite_category(tasks: &[Task]) -> String {
    shares(
        tasks.iter().filter(|t| t.completed).map(|t| t.category.as_str()),
        0,
    )
    .into_iter()
    .next()
    .map(|share| share.name)
    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
}
