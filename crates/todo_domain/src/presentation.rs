use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    date_status::{classify, due_label, DateStatus},
    error::{Result, TodoError},
    todo::Todo,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub status: DateStatus,
    pub priority: u8,
    pub label: String,
}

/// Higher sorts first.
pub fn priority(status: DateStatus) -> u8 {
    match status {
        DateStatus::Overdue => 4,
        DateStatus::DueSoon => 3,
        DateStatus::Upcoming => 2,
        DateStatus::NoDate => 1,
    }
}

pub fn status_label(status: DateStatus) -> &'static str {
    match status {
        DateStatus::Overdue => "Overdue",
        DateStatus::DueSoon => "Due soon",
        DateStatus::Upcoming => "Upcoming",
        DateStatus::NoDate => "No due date",
    }
}

pub fn status_info(todo: &Todo, now: DateTime<Utc>) -> StatusInfo {
    let status = classify(todo.due_date, now);
    StatusInfo {
        status,
        priority: priority(status),
        label: status_label(status).to_string(),
    }
}

/// Status label plus the relative due phrase, e.g. "Due soon · Due in 2 hours".
pub fn describe(todo: &Todo, now: DateTime<Utc>) -> String {
    let info = status_info(todo, now);
    match todo.due_date {
        Some(due) => format!("{} · {}", info.label, due_label(due, now)),
        None => info.label,
    }
}

/// Priority descending, then due date ascending (undated last), then newest first.
pub fn compare_by_priority(a: &Todo, b: &Todo, now: DateTime<Utc>) -> Ordering {
    let pa = priority(classify(a.due_date, now));
    let pb = priority(classify(b.due_date, now));
    pb.cmp(&pa)
        .then_with(|| match (a.due_date, b.due_date) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| b.created_at.cmp(&a.created_at))
}

pub fn sort_by_priority(todos: &[Todo], now: DateTime<Utc>) -> Vec<Todo> {
    let mut sorted = todos.to_vec();
    sorted.sort_by(|a, b| compare_by_priority(a, b, now));
    sorted
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusGroups {
    pub overdue: Vec<Todo>,
    pub due_soon: Vec<Todo>,
    pub upcoming: Vec<Todo>,
    pub no_date: Vec<Todo>,
}

impl StatusGroups {
    pub fn get(&self, status: DateStatus) -> &[Todo] {
        match status {
            DateStatus::Overdue => &self.overdue,
            DateStatus::DueSoon => &self.due_soon,
            DateStatus::Upcoming => &self.upcoming,
            DateStatus::NoDate => &self.no_date,
        }
    }

    fn bucket_mut(&mut self, status: DateStatus) -> &mut Vec<Todo> {
        match status {
            DateStatus::Overdue => &mut self.overdue,
            DateStatus::DueSoon => &mut self.due_soon,
            DateStatus::Upcoming => &mut self.upcoming,
            DateStatus::NoDate => &mut self.no_date,
        }
    }
}

/// Partitions by status, keeping input order within each group.
pub fn group_by_status(todos: &[Todo], now: DateTime<Utc>) -> StatusGroups {
    let mut groups = StatusGroups::default();
    for todo in todos {
        groups
            .bucket_mut(classify(todo.due_date, now))
            .push(todo.clone());
    }
    groups
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub overdue: usize,
    pub due_soon: usize,
    pub upcoming: usize,
    pub no_date: usize,
    pub total: usize,
}

/// Counts incomplete todos per status.
pub fn summarize(todos: &[Todo], now: DateTime<Utc>) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for todo in todos.iter().filter(|todo| !todo.completed) {
        match classify(todo.due_date, now) {
            DateStatus::Overdue => summary.overdue += 1,
            DateStatus::DueSoon => summary.due_soon += 1,
            DateStatus::Upcoming => summary.upcoming += 1,
            DateStatus::NoDate => summary.no_date += 1,
        }
        summary.total += 1;
    }
    summary
}

pub fn needs_attention(todo: &Todo, now: DateTime<Utc>) -> bool {
    !todo.completed
        && matches!(
            classify(todo.due_date, now),
            DateStatus::Overdue | DateStatus::DueSoon
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateValidationOptions {
    pub allow_past_due: bool,
    pub max_future_days: i64,
    pub require_reminder_before_due: bool,
}

impl Default for DateValidationOptions {
    fn default() -> Self {
        Self {
            allow_past_due: false,
            max_future_days: 365,
            require_reminder_before_due: true,
        }
    }
}

/// Checks a candidate due/reminder pair against `now` and each other, reporting every
/// problem found.
pub fn validate_todo_dates(
    due: Option<DateTime<Utc>>,
    reminder: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    options: &DateValidationOptions,
) -> Result<()> {
    validate_date_change(due, reminder, (true, true), now, options)
}

/// Like [`validate_todo_dates`] for an edit of a stored todo. `due` and `reminder` are the
/// merged values; `changed` says which of (due, reminder) the edit sets. Only changed
/// fields are checked against `now`, while the ordering check always uses the merged pair.
pub fn validate_date_change(
    due: Option<DateTime<Utc>>,
    reminder: Option<DateTime<Utc>>,
    changed: (bool, bool),
    now: DateTime<Utc>,
    options: &DateValidationOptions,
) -> Result<()> {
    let (due_changed, reminder_changed) = changed;
    let mut problems = Vec::new();

    if let Some(due) = due.filter(|_| due_changed) {
        if !options.allow_past_due && due < now {
            problems.push("due date cannot be in the past".to_string());
        }
        // An out-of-range horizon means there is no upper bound.
        let latest = Duration::try_days(options.max_future_days)
            .and_then(|horizon| now.checked_add_signed(horizon));
        if latest.is_some_and(|latest| due > latest) {
            problems.push(format!(
                "due date cannot be more than {} days in the future",
                options.max_future_days
            ));
        }
    }

    if let Some(reminder) = reminder {
        if reminder_changed && reminder < now {
            problems.push("reminder time cannot be in the past".to_string());
        }
        if let Some(due) = due {
            if options.require_reminder_before_due && reminder > due {
                problems.push("reminder time must be before the due date".to_string());
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(TodoError::Validation(problems))
    }
}
