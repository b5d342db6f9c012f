use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TodoError};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoId(String);

impl TodoId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TodoId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TodoId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A todo as stored. Timestamps serialize as RFC 3339 strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: TodoId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Todo {
    /// Checks the invariants a loaded record must satisfy.
    pub fn check_invariants(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.id.as_str().trim().is_empty() {
            problems.push("id must not be empty".to_string());
        }
        if let Err(TodoError::Validation(mut issues)) = normalize_title(&self.title) {
            problems.append(&mut issues);
        }
        if let Some(description) = &self.description {
            if description.trim().chars().count() > MAX_DESCRIPTION_LEN {
                problems.push(format!(
                    "description must be at most {MAX_DESCRIPTION_LEN} characters"
                ));
            }
        }
        if self.updated_at < self.created_at {
            problems.push("updatedAt precedes createdAt".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(TodoError::Validation(problems))
        }
    }

    pub fn has_schedule(&self) -> bool {
        self.due_date.is_some() || self.reminder_time.is_some()
    }
}

/// Input for creating a todo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTodo {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_time: Option<DateTime<Utc>>,
}

impl NewTodo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_reminder(mut self, reminder: DateTime<Utc>) -> Self {
        self.reminder_time = Some(reminder);
        self
    }

    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }
}

/// Partial update. `Some(None)` clears an optional field.
///
/// `id` and `created_at` are accepted only so that a caller echoing them back unchanged is
/// not rejected; any other value fails with [`TodoError::ImmutableField`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoPatch {
    pub id: Option<TodoId>,
    pub created_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub reminder_time: Option<Option<DateTime<Utc>>>,
}

impl TodoPatch {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn due_date(mut self, due: Option<DateTime<Utc>>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn reminder_time(mut self, reminder: Option<DateTime<Utc>>) -> Self {
        self.reminder_time = Some(reminder);
        self
    }

    pub fn touches_dates(&self) -> bool {
        self.due_date.is_some() || self.reminder_time.is_some()
    }

    pub(crate) fn apply(self, todo: &mut Todo) -> Result<()> {
        if matches!(&self.id, Some(id) if *id != todo.id) {
            return Err(TodoError::ImmutableField("id"));
        }
        if matches!(self.created_at, Some(created) if created != todo.created_at) {
            return Err(TodoError::ImmutableField("createdAt"));
        }

        let title = self.title.as_deref().map(normalize_title).transpose()?;
        let description = self
            .description
            .map(|value| normalize_description(value.as_deref()))
            .transpose()?;

        if let Some(title) = title {
            todo.title = title;
        }
        if let Some(description) = description {
            todo.description = description;
        }
        if let Some(completed) = self.completed {
            todo.completed = completed;
        }
        if let Some(due) = self.due_date {
            todo.due_date = due;
        }
        if let Some(reminder) = self.reminder_time {
            todo.reminder_time = reminder;
        }
        Ok(())
    }
}

pub fn normalize_title(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TodoError::validation("title must not be empty"));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(TodoError::validation(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Trims the description; blank input becomes `None`.
pub fn normalize_description(raw: Option<&str>) -> Result<Option<String>> {
    let Some(trimmed) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(TodoError::validation(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(now: DateTime<Utc>) -> Todo {
        Todo {
            id: TodoId::from("a1"),
            title: "Pay rent".into(),
            description: None,
            completed: false,
            due_date: Some(now + Duration::hours(1)),
            reminder_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn title_is_trimmed_and_bounded() {
        assert_eq!(normalize_title("  Pay rent ").unwrap(), "Pay rent");
        assert!(normalize_title("   ").is_err());
        assert!(normalize_title(&"x".repeat(MAX_TITLE_LEN)).is_ok());
        assert!(normalize_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn blank_description_is_absent() {
        assert_eq!(normalize_description(Some("   ")).unwrap(), None);
        assert_eq!(normalize_description(None).unwrap(), None);
        assert_eq!(
            normalize_description(Some(" note ")).unwrap(),
            Some("note".to_string())
        );
        assert!(normalize_description(Some(&"y".repeat(MAX_DESCRIPTION_LEN + 1))).is_err());
    }

    #[test]
    fn patch_rejects_identity_changes() {
        let now = Utc::now();
        let mut todo = sample(now);
        let patch = TodoPatch {
            id: Some(TodoId::from("other")),
            ..TodoPatch::default()
        };
        assert_eq!(patch.apply(&mut todo), Err(TodoError::ImmutableField("id")));

        let patch = TodoPatch {
            created_at: Some(now - Duration::days(1)),
            ..TodoPatch::default()
        };
        assert_eq!(
            patch.apply(&mut todo),
            Err(TodoError::ImmutableField("createdAt"))
        );

        let echoed = TodoPatch {
            id: Some(todo.id.clone()),
            created_at: Some(todo.created_at),
            ..TodoPatch::default()
        }
        .title("Pay rent early");
        echoed.apply(&mut todo).unwrap();
        assert_eq!(todo.title, "Pay rent early");
    }

    #[test]
    fn patch_clears_optional_fields() {
        let now = Utc::now();
        let mut todo = sample(now);
        TodoPatch::default()
            .due_date(None)
            .description(Some("  ".into()))
            .apply(&mut todo)
            .unwrap();
        assert!(todo.due_date.is_none());
        assert!(todo.description.is_none());
    }

    #[test]
    fn durable_form_round_trips() {
        let now = Utc::now();
        let mut todo = sample(now);
        todo.description = Some("landlord".into());
        todo.reminder_time = Some(now + Duration::minutes(30));
        let json = serde_json::to_value(&todo).unwrap();
        assert!(json["dueDate"].is_string());
        assert!(json["createdAt"].is_string());
        let back: Todo = serde_json::from_value(json).unwrap();
        assert_eq!(back, todo);
    }

    #[test]
    fn invariants_flag_bad_records() {
        let now = Utc::now();
        let mut todo = sample(now);
        todo.updated_at = now - Duration::seconds(1);
        todo.title = " ".into();
        let Err(TodoError::Validation(problems)) = todo.check_invariants() else {
            panic!("expected validation failure");
        };
        assert_eq!(problems.len(), 2);
    }
}
