use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    error::{Result, TodoError},
    todo::{normalize_description, normalize_title, NewTodo, Todo, TodoId, TodoPatch},
};

/// Key under which the todo collection is persisted.
pub const TODO_STORAGE_KEY: &str = "todos";

/// Durable string key-value layer backing the store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some(limit) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if others + key.len() + value.len() > limit {
                return Err(TodoError::PersistenceQuotaExceeded {
                    key: key.to_string(),
                    limit,
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileKeyValueStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|err| unavailable(&dir, err))?;
        Ok(Self {
            dir,
            quota_bytes: None,
        })
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(unavailable(&path, err)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Some(limit) = self.quota_bytes {
            if value.len() > limit {
                return Err(TodoError::PersistenceQuotaExceeded {
                    key: key.to_string(),
                    limit,
                });
            }
        }
        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value).map_err(|err| unavailable(&staging, err))?;
        fs::rename(&staging, &path).map_err(|err| {
            let _ = fs::remove_file(&staging);
            unavailable(&path, err)
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(unavailable(&path, err)),
        }
    }
}

fn unavailable(path: &Path, err: io::Error) -> TodoError {
    TodoError::PersistenceUnavailable(format!("{}: {err}", path.display()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoFilter {
    pub completed: Option<bool>,
    /// Keeps todos due strictly before this instant.
    pub due_before: Option<DateTime<Utc>>,
    /// Keeps todos due strictly after this instant.
    pub due_after: Option<DateTime<Utc>>,
    pub has_reminder: Option<bool>,
}

impl TodoFilter {
    pub fn matches(&self, todo: &Todo) -> bool {
        if matches!(self.completed, Some(flag) if flag != todo.completed) {
            return false;
        }
        if let Some(bound) = self.due_before {
            if !todo.due_date.is_some_and(|due| due < bound) {
                return false;
            }
        }
        if let Some(bound) = self.due_after {
            if !todo.due_date.is_some_and(|due| due > bound) {
                return false;
            }
        }
        if matches!(self.has_reminder, Some(flag) if flag != todo.reminder_time.is_some()) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    DueDate,
    Title,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TodoSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl TodoSort {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }

    /// Items lacking the sort field go last in either direction.
    pub fn compare(&self, a: &Todo, b: &Todo) -> Ordering {
        let directed = |ordering: Ordering| match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        match self.field {
            SortField::CreatedAt => directed(a.created_at.cmp(&b.created_at)),
            SortField::UpdatedAt => directed(a.updated_at.cmp(&b.updated_at)),
            SortField::Title => directed(compare_text(&a.title, &b.title)),
            SortField::DueDate => match (a.due_date, b.due_date) {
                (Some(left), Some(right)) => directed(left.cmp(&right)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }
}

/// Case-insensitive comparison first, so "apple" and "Banana" order like a collator would.
pub fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Todo collection cached in memory and written through to a [`KeyValueStore`].
pub struct TodoStore {
    backend: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    todos: RwLock<Vec<Todo>>,
}

impl TodoStore {
    /// Opens the store and loads whatever the backend holds.
    pub fn open(backend: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Self {
            backend,
            clock,
            todos: RwLock::new(Vec::new()),
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-reads the collection from the backend, dropping malformed entries.
    pub fn reload(&self) -> Result<usize> {
        let loaded = match self.backend.get(TODO_STORAGE_KEY)? {
            Some(raw) => decode_collection(&raw),
            None => Vec::new(),
        };
        let count = loaded.len();
        *self.todos.write() = loaded;
        debug!(count, "todo collection loaded");
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.todos.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.todos.read().is_empty()
    }

    pub fn create(&self, input: NewTodo) -> Result<Todo> {
        let title = normalize_title(&input.title)?;
        let description = normalize_description(input.description.as_deref())?;
        let now = self.clock.now();
        let todo = Todo {
            id: TodoId::generate(),
            title,
            description,
            completed: input.completed,
            due_date: input.due_date,
            reminder_time: input.reminder_time,
            created_at: now,
            updated_at: now,
        };
        self.mutate(|todos| {
            todos.push(todo.clone());
            Ok(())
        })?;
        Ok(todo)
    }

    pub fn update(&self, id: &TodoId, patch: TodoPatch) -> Result<Todo> {
        let now = self.clock.now();
        self.mutate(|todos| {
            let todo = todos
                .iter_mut()
                .find(|todo| &todo.id == id)
                .ok_or_else(|| TodoError::NotFound(id.clone()))?;
            patch.apply(todo)?;
            todo.updated_at = now.max(todo.created_at);
            Ok(todo.clone())
        })
    }

    pub fn toggle(&self, id: &TodoId) -> Result<Todo> {
        let current = self.get(id)?;
        self.update(id, TodoPatch::default().completed(!current.completed))
    }

    /// Returns whether a todo was removed.
    pub fn delete(&self, id: &TodoId) -> Result<bool> {
        self.mutate(|todos| {
            let before = todos.len();
            todos.retain(|todo| &todo.id != id);
            Ok(todos.len() != before)
        })
    }

    pub fn get_by_id(&self, id: &TodoId) -> Option<Todo> {
        self.todos.read().iter().find(|todo| &todo.id == id).cloned()
    }

    pub fn get(&self, id: &TodoId) -> Result<Todo> {
        self.get_by_id(id)
            .ok_or_else(|| TodoError::NotFound(id.clone()))
    }

    pub fn get_all(&self, filter: Option<&TodoFilter>, sort: Option<TodoSort>) -> Vec<Todo> {
        let mut todos: Vec<Todo> = self
            .todos
            .read()
            .iter()
            .filter(|todo| filter.map_or(true, |filter| filter.matches(todo)))
            .cloned()
            .collect();
        if let Some(sort) = sort {
            todos.sort_by(|a, b| sort.compare(a, b));
        }
        todos
    }

    /// Applies `change` to a working copy and commits it only once the backend accepted it.
    fn mutate<T>(&self, change: impl FnOnce(&mut Vec<Todo>) -> Result<T>) -> Result<T> {
        let mut guard = self.todos.write();
        let mut working = guard.clone();
        let outcome = change(&mut working)?;
        let encoded = serde_json::to_string(&working)
            .map_err(|err| TodoError::Serialization(err.to_string()))?;
        self.backend.set(TODO_STORAGE_KEY, &encoded)?;
        *guard = working;
        Ok(outcome)
    }
}

fn decode_collection(raw: &str) -> Vec<Todo> {
    let entries: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(%err, "stored todo collection is not a JSON array; starting empty");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut todos = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let todo = match serde_json::from_value::<Todo>(entry) {
            Ok(todo) => todo,
            Err(err) => {
                warn!(index, %err, "dropping malformed todo record");
                continue;
            }
        };
        if let Err(err) = todo.check_invariants() {
            warn!(index, id = %todo.id, %err, "dropping invalid todo record");
            continue;
        }
        if !seen.insert(todo.id.clone()) {
            warn!(index, id = %todo.id, "dropping duplicate todo id");
            continue;
        }
        todos.push(todo);
    }
    todos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use chrono::Duration;

    fn store_with(backend: Arc<dyn KeyValueStore>) -> (TodoStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = TodoStore::open(backend, clock.clone()).unwrap();
        (store, clock)
    }

    #[test]
    fn create_normalizes_and_persists() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        let (store, _) = store_with(backend.clone());
        let todo = store
            .create(NewTodo::new("  Pay rent  ").with_description("   "))
            .unwrap();
        assert_eq!(todo.title, "Pay rent");
        assert!(todo.description.is_none());
        assert_eq!(todo.created_at, todo.updated_at);

        let raw = backend.get(TODO_STORAGE_KEY).unwrap().expect("persisted");
        assert!(raw.contains("Pay rent"));
        assert!(store.create(NewTodo::new("   ")).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_stamps_and_rejects_unknown_ids() {
        let (store, clock) = store_with(Arc::new(MemoryKeyValueStore::new()));
        let todo = store.create(NewTodo::new("Water plants")).unwrap();
        clock.advance(Duration::minutes(5));
        let updated = store
            .update(&todo.id, TodoPatch::default().title("Water all plants"))
            .unwrap();
        assert_eq!(updated.title, "Water all plants");
        assert_eq!(updated.created_at, todo.created_at);
        assert_eq!(updated.updated_at, todo.created_at + Duration::minutes(5));

        let missing = TodoId::from("missing");
        assert_eq!(
            store.update(&missing, TodoPatch::default().completed(true)),
            Err(TodoError::NotFound(missing.clone()))
        );
        assert!(matches!(store.get(&missing), Err(TodoError::NotFound(_))));
        assert!(store.get_by_id(&missing).is_none());
    }

    #[test]
    fn toggle_and_delete() {
        let (store, _) = store_with(Arc::new(MemoryKeyValueStore::new()));
        let todo = store.create(NewTodo::new("Call Mom")).unwrap();
        assert!(store.toggle(&todo.id).unwrap().completed);
        assert!(!store.toggle(&todo.id).unwrap().completed);
        assert!(store.delete(&todo.id).unwrap());
        assert!(!store.delete(&todo.id).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn quota_failure_leaves_collection_untouched() {
        let (store, _) = store_with(Arc::new(MemoryKeyValueStore::with_quota(400)));
        store.create(NewTodo::new("short")).unwrap();
        let err = store
            .create(NewTodo::new("x".repeat(150)).with_description("y".repeat(300)))
            .unwrap_err();
        assert!(matches!(err, TodoError::PersistenceQuotaExceeded { .. }));
        assert!(err.is_persistence());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn filters_by_flags_and_bounds() {
        let (store, clock) = store_with(Arc::new(MemoryKeyValueStore::new()));
        let now = clock.now();
        let soon = store
            .create(NewTodo::new("soon").with_due_date(now + Duration::hours(2)))
            .unwrap();
        let later = store
            .create(
                NewTodo::new("later")
                    .with_due_date(now + Duration::days(3))
                    .with_reminder(now + Duration::days(2)),
            )
            .unwrap();
        let done = store.create(NewTodo::new("done").completed()).unwrap();

        let filter = TodoFilter {
            due_before: Some(now + Duration::days(1)),
            ..TodoFilter::default()
        };
        assert_eq!(store.get_all(Some(&filter), None), vec![soon.clone()]);

        let filter = TodoFilter {
            has_reminder: Some(true),
            ..TodoFilter::default()
        };
        assert_eq!(store.get_all(Some(&filter), None), vec![later.clone()]);

        let filter = TodoFilter {
            completed: Some(true),
            ..TodoFilter::default()
        };
        assert_eq!(store.get_all(Some(&filter), None), vec![done]);

        let filter = TodoFilter {
            due_after: Some(now + Duration::days(1)),
            completed: Some(false),
            ..TodoFilter::default()
        };
        assert_eq!(store.get_all(Some(&filter), None), vec![later]);
    }

    #[test]
    fn missing_sort_keys_go_last_in_both_directions() {
        let (store, clock) = store_with(Arc::new(MemoryKeyValueStore::new()));
        let now = clock.now();
        store.create(NewTodo::new("none")).unwrap();
        store
            .create(NewTodo::new("late").with_due_date(now + Duration::days(2)))
            .unwrap();
        store
            .create(NewTodo::new("early").with_due_date(now + Duration::days(1)))
            .unwrap();

        let titles = |sort| {
            store
                .get_all(None, Some(sort))
                .into_iter()
                .map(|todo| todo.title)
                .collect::<Vec<_>>()
        };
        assert_eq!(titles(TodoSort::asc(SortField::DueDate)), ["early", "late", "none"]);
        assert_eq!(titles(TodoSort::desc(SortField::DueDate)), ["late", "early", "none"]);
    }

    #[test]
    fn title_sort_ignores_case() {
        let (store, _) = store_with(Arc::new(MemoryKeyValueStore::new()));
        for title in ["banana", "Apple", "cherry"] {
            store.create(NewTodo::new(title)).unwrap();
        }
        let titles: Vec<String> = store
            .get_all(None, Some(TodoSort::asc(SortField::Title)))
            .into_iter()
            .map(|todo| todo.title)
            .collect();
        assert_eq!(titles, ["Apple", "banana", "cherry"]);
    }

    #[test]
    fn load_drops_malformed_records() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        let raw = r#"[
            {"id":"ok","title":"Keep me","completed":false,
             "createdAt":"2025-11-07T09:00:00Z","updatedAt":"2025-11-07T09:00:00Z"},
            {"id":"bad-date","title":"Broken","createdAt":"yesterday","updatedAt":"2025-11-07T09:00:00Z"},
            {"id":"no-title","title":"   ","createdAt":"2025-11-07T09:00:00Z","updatedAt":"2025-11-07T09:00:00Z"},
            {"id":"ok","title":"Duplicate","createdAt":"2025-11-07T09:00:00Z","updatedAt":"2025-11-07T09:00:00Z"},
            42
        ]"#;
        backend.set(TODO_STORAGE_KEY, raw).unwrap();
        let (store, _) = store_with(backend);
        let todos = store.get_all(None, None);
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].title, "Keep me");
    }

    #[test]
    fn file_backend_persists_between_opens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = Arc::new(FileKeyValueStore::open(dir.path()).unwrap());
        let (store, _) = store_with(backend.clone());
        let todo = store.create(NewTodo::new("Renew passport")).unwrap();
        assert!(backend.path_for(TODO_STORAGE_KEY).exists());

        let (reopened, _) = store_with(Arc::new(FileKeyValueStore::open(dir.path()).unwrap()));
        assert_eq!(reopened.get(&todo.id).unwrap(), todo);
    }

    #[test]
    fn file_backend_reports_quota() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileKeyValueStore::open(dir.path()).unwrap().with_quota(8);
        assert!(matches!(
            backend.set(TODO_STORAGE_KEY, "[1,2,3,4,5]"),
            Err(TodoError::PersistenceQuotaExceeded { limit: 8, .. })
        ));
        assert_eq!(backend.get(TODO_STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn failed_replace_leaves_no_staging_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileKeyValueStore::open(dir.path()).unwrap();
        let target = backend.path_for(TODO_STORAGE_KEY);
        // A non-empty directory in the way makes the rename fail.
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();

        assert!(matches!(
            backend.set(TODO_STORAGE_KEY, "[]"),
            Err(TodoError::PersistenceUnavailable(_))
        ));
        assert!(!target.with_extension("json.tmp").exists());
    }
}
