use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    clock::{Clock, SystemClock},
    error::Result,
    notifications::Permission,
    presentation::{self, DateValidationOptions, StatusSummary},
    scheduler::NotificationScheduler,
    store::{KeyValueStore, TodoFilter, TodoSort, TodoStore},
    todo::{NewTodo, Todo, TodoId, TodoPatch},
};

/// Store plus scheduler, kept in step: every mutation resyncs that todo's timer.
pub struct TodoService {
    store: TodoStore,
    scheduler: Option<NotificationScheduler>,
    clock: Arc<dyn Clock>,
    date_rules: DateValidationOptions,
}

pub struct TodoServiceBuilder {
    backend: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    scheduler: Option<NotificationScheduler>,
    date_rules: DateValidationOptions,
}

impl TodoServiceBuilder {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            scheduler: None,
            date_rules: DateValidationOptions::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_scheduler(mut self, scheduler: NotificationScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_date_rules(mut self, rules: DateValidationOptions) -> Self {
        self.date_rules = rules;
        self
    }

    /// Loads the collection and runs the first reschedule pass.
    pub fn build(self) -> Result<TodoService> {
        let store = TodoStore::open(self.backend, self.clock.clone())?;
        let service = TodoService {
            store,
            scheduler: self.scheduler,
            clock: self.clock,
            date_rules: self.date_rules,
        };
        service.reschedule_all();
        Ok(service)
    }
}

impl TodoService {
    pub fn builder(backend: Arc<dyn KeyValueStore>) -> TodoServiceBuilder {
        TodoServiceBuilder::new(backend)
    }

    pub fn store(&self) -> &TodoStore {
        &self.store
    }

    pub fn scheduler(&self) -> Option<&NotificationScheduler> {
        self.scheduler.as_ref()
    }

    pub fn create(&self, input: NewTodo) -> Result<Todo> {
        presentation::validate_todo_dates(
            input.due_date,
            input.reminder_time,
            self.clock.now(),
            &self.date_rules,
        )?;
        let todo = self.store.create(input)?;
        info!(id = %todo.id, "todo created");
        self.sync(&todo);
        Ok(todo)
    }

    /// Only the dates a patch sets are checked against now; the ordering rule applies to
    /// the merged pair.
    pub fn update(&self, id: &TodoId, patch: TodoPatch) -> Result<Todo> {
        if patch.touches_dates() {
            let current = self.store.get(id)?;
            let changed = (patch.due_date.is_some(), patch.reminder_time.is_some());
            let due = patch.due_date.unwrap_or(current.due_date);
            let reminder = patch.reminder_time.unwrap_or(current.reminder_time);
            presentation::validate_date_change(
                due,
                reminder,
                changed,
                self.clock.now(),
                &self.date_rules,
            )?;
        }
        let todo = self.store.update(id, patch)?;
        debug!(id = %todo.id, "todo updated");
        self.sync(&todo);
        Ok(todo)
    }

    pub fn toggle(&self, id: &TodoId) -> Result<Todo> {
        let todo = self.store.toggle(id)?;
        debug!(id = %todo.id, completed = todo.completed, "todo toggled");
        self.sync(&todo);
        Ok(todo)
    }

    pub fn delete(&self, id: &TodoId) -> Result<bool> {
        let removed = self.store.delete(id)?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.clear_notification(id);
        }
        if removed {
            info!(%id, "todo deleted");
        }
        Ok(removed)
    }

    pub fn get(&self, id: &TodoId) -> Result<Todo> {
        self.store.get(id)
    }

    pub fn list(&self, filter: Option<&TodoFilter>, sort: Option<TodoSort>) -> Vec<Todo> {
        self.store.get_all(filter, sort)
    }

    /// Re-reads durable data and rebuilds every timer. Returns the number of todos loaded.
    pub fn reload(&self) -> Result<usize> {
        let loaded = self.store.reload()?;
        self.reschedule_all();
        Ok(loaded)
    }

    /// Requests permission; a fresh grant triggers a reschedule pass.
    pub fn request_permission(&self) -> Permission {
        let Some(scheduler) = &self.scheduler else {
            return Permission::Denied;
        };
        let before = scheduler.permission();
        let after = scheduler.request_permission();
        if after == Permission::Granted && before != Permission::Granted {
            self.reschedule_all();
        }
        after
    }

    pub fn reschedule_all(&self) -> usize {
        match &self.scheduler {
            Some(scheduler) => scheduler.reschedule_notifications(&self.store.get_all(None, None)),
            None => 0,
        }
    }

    pub fn pending_notifications(&self) -> usize {
        self.scheduler
            .as_ref()
            .map_or(0, NotificationScheduler::pending_count)
    }

    pub fn prioritized(&self) -> Vec<Todo> {
        presentation::sort_by_priority(&self.store.get_all(None, None), self.clock.now())
    }

    pub fn summary(&self) -> StatusSummary {
        presentation::summarize(&self.store.get_all(None, None), self.clock.now())
    }

    fn sync(&self, todo: &Todo) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.sync_todo(todo);
        }
    }
}
