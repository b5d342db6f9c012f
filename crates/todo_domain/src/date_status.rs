use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TodoError};

/// Width of the "due soon" window ahead of now.
pub const DUE_SOON_THRESHOLD: Duration = Duration::hours(24);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum DateStatus {
    Overdue,
    DueSoon,
    Upcoming,
    NoDate,
}

impl DateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DateStatus::Overdue => "overdue",
            DateStatus::DueSoon => "due-soon",
            DateStatus::Upcoming => "upcoming",
            DateStatus::NoDate => "no-date",
        }
    }
}

impl fmt::Display for DateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a due date relative to `now`.
pub fn classify(due: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateStatus {
    let Some(due) = due else {
        return DateStatus::NoDate;
    };
    if due < now {
        DateStatus::Overdue
    } else if due < now + DUE_SOON_THRESHOLD {
        DateStatus::DueSoon
    } else {
        DateStatus::Upcoming
    }
}

/// Same as [`classify`] for raw timestamps; unparseable input is treated as missing.
pub fn classify_str(raw: Option<&str>, now: DateTime<Utc>) -> DateStatus {
    classify(raw.and_then(parse_timestamp), now)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReminderInterval {
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "1hr")]
    OneHour,
    #[serde(rename = "1day")]
    OneDay,
    /// Picker sentinel for a hand-entered reminder time; has no fixed offset.
    #[serde(rename = "custom")]
    Custom,
}

impl ReminderInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderInterval::FifteenMinutes => "15min",
            ReminderInterval::OneHour => "1hr",
            ReminderInterval::OneDay => "1day",
            ReminderInterval::Custom => "custom",
        }
    }

    pub fn offset(self) -> Option<Duration> {
        match self {
            ReminderInterval::FifteenMinutes => Some(Duration::minutes(15)),
            ReminderInterval::OneHour => Some(Duration::hours(1)),
            ReminderInterval::OneDay => Some(Duration::days(1)),
            ReminderInterval::Custom => None,
        }
    }
}

impl fmt::Display for ReminderInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderInterval {
    type Err = TodoError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "15min" => Ok(ReminderInterval::FifteenMinutes),
            "1hr" => Ok(ReminderInterval::OneHour),
            "1day" => Ok(ReminderInterval::OneDay),
            "custom" => Ok(ReminderInterval::Custom),
            other => Err(TodoError::InvalidInput(format!(
                "unknown reminder interval `{other}`"
            ))),
        }
    }
}

/// Returns `base - interval`. The `custom` sentinel is rejected.
pub fn offset_before(base: DateTime<Utc>, interval: ReminderInterval) -> Result<DateTime<Utc>> {
    let offset = interval.offset().ok_or_else(|| {
        TodoError::InvalidInput("the `custom` interval has no fixed offset".to_string())
    })?;
    base.checked_sub_signed(offset)
        .ok_or_else(|| TodoError::InvalidInput(format!("`{base}` minus {interval} is out of range")))
}

pub fn offset_before_str(base: &str, interval: &str) -> Result<DateTime<Utc>> {
    let base = parse_timestamp(base)
        .ok_or_else(|| TodoError::InvalidInput(format!("`{base}` is not a valid timestamp")))?;
    offset_before(base, interval.parse()?)
}

/// True iff both timestamps are present and the reminder precedes the due date.
pub fn is_reminder_time_valid(
    reminder: Option<DateTime<Utc>>,
    due: Option<DateTime<Utc>>,
) -> bool {
    match (reminder, due) {
        (Some(reminder), Some(due)) => reminder < due,
        _ => false,
    }
}

/// Parses RFC 3339 timestamps and `datetime-local` style values (`2025-11-07T09:00`),
/// the latter interpreted in the local timezone.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc));
        }
    }
    None
}

/// Human description of `target` relative to `now`, e.g. "in 2 hours" or "3 days ago".
pub fn describe_relative(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = target - now;
    let future = delta >= Duration::zero();
    let magnitude = if future { delta } else { -delta };

    let amount = if magnitude < Duration::minutes(1) {
        return "now".to_string();
    } else if magnitude < Duration::hours(1) {
        plural(magnitude.num_minutes(), "minute")
    } else if magnitude < Duration::days(1) {
        plural(magnitude.num_hours(), "hour")
    } else {
        plural(magnitude.num_days(), "day")
    };

    if future {
        format!("in {amount}")
    } else {
        format!("{amount} ago")
    }
}

/// Short phrase about a due date, used in reminder bodies and list labels.
pub fn due_label(due: DateTime<Utc>, now: DateTime<Utc>) -> String {
    match classify(Some(due), now) {
        DateStatus::Overdue => format!("Was due {}", describe_relative(due, now)),
        _ => format!("Due {}", describe_relative(due, now)),
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}
