//! Per-todo notification timers.
//!
//! The scheduler keeps at most one pending timer per todo id. Scheduling again for the
//! same id replaces the earlier timer. Entries leave the map when they fire, when they
//! are cleared, or when a reschedule pass starts over. Nothing here is persisted; after a
//! fresh load the owner calls [`NotificationScheduler::reschedule_notifications`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    date_status::due_label,
    notifications::{
        notification_tag, NotificationData, NotificationHandle, NotificationHandlers,
        NotificationKind, NotificationPlatform, Permission, PlatformNotification, TimerHandle,
        TimerHost, TodoHighlighter,
    },
    todo::{Todo, TodoId},
};

pub const DEFAULT_AUTO_DISMISS: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Shown notifications nobody interacted with are closed after this long.
    pub auto_dismiss: Duration,
    pub icon: Option<String>,
    pub require_interaction: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            auto_dismiss: DEFAULT_AUTO_DISMISS,
            icon: None,
            require_interaction: false,
        }
    }
}

/// Bookkeeping for one pending timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNotification {
    pub todo_id: TodoId,
    pub kind: NotificationKind,
    pub scheduled_time: DateTime<Utc>,
    pub timer: TimerHandle,
    /// Title as it was when scheduled.
    pub title: String,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    PermissionChanged(Permission),
    Scheduled {
        todo_id: TodoId,
        kind: NotificationKind,
        scheduled_time: DateTime<Utc>,
    },
    Cleared {
        todo_id: TodoId,
    },
    Fired {
        todo_id: TodoId,
        kind: NotificationKind,
        notification: NotificationHandle,
    },
    Clicked {
        todo_id: TodoId,
    },
    Dismissed {
        todo_id: TodoId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&SchedulerEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener)>,
}

struct PendingEntry {
    notification: ScheduledNotification,
    token: u64,
}

struct Displayed {
    todo_id: TodoId,
    dismiss_timer: Option<TimerHandle>,
}

#[derive(Default)]
struct SchedulerState {
    pending: HashMap<TodoId, PendingEntry>,
    displayed: HashMap<NotificationHandle, Displayed>,
    next_token: u64,
}

struct Shared {
    platform: Arc<dyn NotificationPlatform>,
    timers: Arc<dyn TimerHost>,
    clock: Arc<dyn Clock>,
    highlighter: Option<Arc<dyn TodoHighlighter>>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    listeners: Mutex<Listeners>,
}

pub struct NotificationSchedulerBuilder {
    platform: Arc<dyn NotificationPlatform>,
    timers: Arc<dyn TimerHost>,
    clock: Arc<dyn Clock>,
    highlighter: Option<Arc<dyn TodoHighlighter>>,
    config: SchedulerConfig,
}

impl NotificationSchedulerBuilder {
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_highlighter(mut self, highlighter: Arc<dyn TodoHighlighter>) -> Self {
        self.highlighter = Some(highlighter);
        self
    }

    pub fn build(self) -> NotificationScheduler {
        NotificationScheduler {
            shared: Arc::new(Shared {
                platform: self.platform,
                timers: self.timers,
                clock: self.clock,
                highlighter: self.highlighter,
                config: self.config,
                state: Mutex::new(SchedulerState::default()),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }
}

/// Owns every pending notification timer. Dropping it cancels them all.
pub struct NotificationScheduler {
    shared: Arc<Shared>,
}

impl NotificationScheduler {
    pub fn builder(
        platform: Arc<dyn NotificationPlatform>,
        timers: Arc<dyn TimerHost>,
        clock: Arc<dyn Clock>,
    ) -> NotificationSchedulerBuilder {
        NotificationSchedulerBuilder {
            platform,
            timers,
            clock,
            highlighter: None,
            config: SchedulerConfig::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn is_supported(&self) -> bool {
        self.shared.platform.is_supported()
    }

    pub fn permission(&self) -> Permission {
        if !self.is_supported() {
            return Permission::Denied;
        }
        self.shared.platform.permission()
    }

    /// Asks the platform for permission. Platform failures come back as `Denied`.
    pub fn request_permission(&self) -> Permission {
        let status = if !self.is_supported() {
            Permission::Denied
        } else {
            match self.shared.platform.request_permission() {
                Ok(status) => status,
                Err(err) => {
                    warn!(%err, "notification permission request failed");
                    Permission::Denied
                }
            }
        };
        info!(%status, "notification permission resolved");
        self.shared.emit(&SchedulerEvent::PermissionChanged(status));
        status
    }

    /// Schedules a notification at `todo.reminder_time`. Returns false when ineligible.
    pub fn schedule_reminder(&self, todo: &Todo) -> bool {
        self.shared.schedule(todo, NotificationKind::Reminder)
    }

    /// Schedules a notification at `todo.due_date`. Returns false when ineligible.
    pub fn schedule_due_notification(&self, todo: &Todo) -> bool {
        self.shared.schedule(todo, NotificationKind::Due)
    }

    pub fn clear_notification(&self, todo_id: &TodoId) {
        if self.shared.cancel_pending(todo_id).is_some() {
            debug!(%todo_id, "notification cleared");
            self.shared.emit(&SchedulerEvent::Cleared {
                todo_id: todo_id.clone(),
            });
        }
    }

    /// Cancels every pending timer and returns how many there were.
    pub fn clear_all_notifications(&self) -> usize {
        let drained: Vec<ScheduledNotification> = {
            let mut state = self.shared.state.lock();
            state
                .pending
                .drain()
                .map(|(_, entry)| entry.notification)
                .collect()
        };
        for entry in &drained {
            self.shared.timers.clear_timer(entry.timer);
        }
        for entry in &drained {
            self.shared.emit(&SchedulerEvent::Cleared {
                todo_id: entry.todo_id.clone(),
            });
        }
        drained.len()
    }

    /// Rebuilds every timer from `todos`. Returns how many got scheduled.
    pub fn reschedule_notifications(&self, todos: &[Todo]) -> usize {
        self.clear_all_notifications();
        let scheduled = todos
            .iter()
            .filter(|todo| self.schedule_preferred(todo))
            .count();
        info!(total = todos.len(), scheduled, "notifications rescheduled");
        scheduled
    }

    /// Brings one todo's timer in line with its current fields.
    pub fn sync_todo(&self, todo: &Todo) -> bool {
        self.clear_notification(&todo.id);
        self.schedule_preferred(todo)
    }

    pub fn pending(&self) -> Vec<ScheduledNotification> {
        let mut pending: Vec<ScheduledNotification> = self
            .shared
            .state
            .lock()
            .pending
            .values()
            .map(|entry| entry.notification.clone())
            .collect();
        pending.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.todo_id.cmp(&b.todo_id))
        });
        pending
    }

    pub fn pending_for(&self, todo_id: &TodoId) -> Option<ScheduledNotification> {
        self.shared
            .state
            .lock()
            .pending
            .get(todo_id)
            .map(|entry| entry.notification.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&SchedulerEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut listeners = self.shared.listeners.lock();
        listeners.next_id += 1;
        let id = SubscriptionId(listeners.next_id);
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(existing, _)| *existing != id);
        listeners.entries.len() != before
    }

    /// Cancels pending and auto-dismiss timers without emitting events.
    pub fn shutdown(&self) {
        let (pending, dismissals) = {
            let mut state = self.shared.state.lock();
            let pending: Vec<TimerHandle> = state
                .pending
                .drain()
                .map(|(_, entry)| entry.notification.timer)
                .collect();
            let dismissals: Vec<TimerHandle> = state
                .displayed
                .drain()
                .filter_map(|(_, displayed)| displayed.dismiss_timer)
                .collect();
            (pending, dismissals)
        };
        for timer in pending.into_iter().chain(dismissals) {
            self.shared.timers.clear_timer(timer);
        }
    }

    /// Reminder wins over due date; completed todos get nothing.
    fn schedule_preferred(&self, todo: &Todo) -> bool {
        if todo.completed {
            return false;
        }
        if todo.reminder_time.is_some() {
            self.schedule_reminder(todo)
        } else if todo.due_date.is_some() {
            self.schedule_due_notification(todo)
        } else {
            false
        }
    }
}

impl Drop for NotificationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn schedule(self: &Arc<Self>, todo: &Todo, kind: NotificationKind) -> bool {
        let target = match kind {
            NotificationKind::Reminder => todo.reminder_time,
            NotificationKind::Due => todo.due_date,
        };
        let Some(target) = target else {
            debug!(todo_id = %todo.id, ?kind, "no timestamp to schedule from");
            return false;
        };
        if todo.title.trim().is_empty() {
            debug!(todo_id = %todo.id, "refusing to schedule an untitled todo");
            return false;
        }
        if !self.platform.is_supported() {
            debug!(todo_id = %todo.id, "notifications unsupported");
            return false;
        }
        let permission = self.platform.permission();
        if permission != Permission::Granted {
            debug!(todo_id = %todo.id, %permission, "notification permission not granted");
            return false;
        }
        let now = self.clock.now();
        let delay = match (target - now).to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ => {
                debug!(todo_id = %todo.id, ?kind, %target, "timestamp is not in the future");
                return false;
            }
        };

        self.cancel_pending(&todo.id);

        let token = {
            let mut state = self.state.lock();
            state.next_token += 1;
            state.next_token
        };
        let weak: Weak<Shared> = Arc::downgrade(self);
        let fire_id = todo.id.clone();
        let timer = self.timers.set_timer(
            delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.fire(&fire_id, token);
                }
            }),
        );

        let notification = ScheduledNotification {
            todo_id: todo.id.clone(),
            kind,
            scheduled_time: target,
            timer,
            title: todo.title.clone(),
            due_date: todo.due_date,
        };
        let replaced = self.state.lock().pending.insert(
            todo.id.clone(),
            PendingEntry {
                notification,
                token,
            },
        );
        if let Some(stale) = replaced {
            self.timers.clear_timer(stale.notification.timer);
        }

        info!(todo_id = %todo.id, ?kind, %target, delay_ms = delay.as_millis() as u64, "notification scheduled");
        self.emit(&SchedulerEvent::Scheduled {
            todo_id: todo.id.clone(),
            kind,
            scheduled_time: target,
        });
        true
    }

    fn cancel_pending(&self, todo_id: &TodoId) -> Option<ScheduledNotification> {
        let removed = self.state.lock().pending.remove(todo_id)?;
        self.timers.clear_timer(removed.notification.timer);
        Some(removed.notification)
    }

    fn fire(self: &Arc<Self>, todo_id: &TodoId, token: u64) {
        let entry = {
            let mut state = self.state.lock();
            match state.pending.get(todo_id) {
                Some(entry) if entry.token == token => state.pending.remove(todo_id),
                _ => None,
            }
        };
        let Some(PendingEntry { notification: scheduled, .. }) = entry else {
            debug!(%todo_id, "ignoring superseded timer");
            return;
        };

        let now = self.clock.now();
        let (title, body) = match scheduled.kind {
            NotificationKind::Reminder => (
                format!("Reminder: {}", scheduled.title),
                scheduled
                    .due_date
                    .map(|due| due_label(due, now))
                    .unwrap_or_else(|| "Reminder for your task".to_string()),
            ),
            NotificationKind::Due => (
                format!("Due now: {}", scheduled.title),
                "This task is due now.".to_string(),
            ),
        };
        let notification = PlatformNotification {
            title,
            body,
            tag: notification_tag(todo_id),
            icon: self.config.icon.clone(),
            require_interaction: self.config.require_interaction,
            data: NotificationData {
                todo_id: todo_id.clone(),
                kind: scheduled.kind,
            },
        };

        let handle = match self.platform.show(notification, self.handlers(todo_id)) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%todo_id, %err, "failed to show notification");
                return;
            }
        };

        let weak = Arc::downgrade(self);
        let dismiss_timer = self.timers.set_timer(
            self.config.auto_dismiss,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.auto_dismiss(handle);
                }
            }),
        );
        self.state.lock().displayed.insert(
            handle,
            Displayed {
                todo_id: todo_id.clone(),
                dismiss_timer: Some(dismiss_timer),
            },
        );

        info!(%todo_id, kind = ?scheduled.kind, "notification fired");
        self.emit(&SchedulerEvent::Fired {
            todo_id: todo_id.clone(),
            kind: scheduled.kind,
            notification: handle,
        });
    }

    fn handlers(self: &Arc<Self>, todo_id: &TodoId) -> NotificationHandlers {
        let on_click = {
            let weak = Arc::downgrade(self);
            let todo_id = todo_id.clone();
            Box::new(move |handle: NotificationHandle| {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_click(&todo_id, handle);
                }
            })
        };
        let on_close = {
            let weak = Arc::downgrade(self);
            Box::new(move |handle: NotificationHandle| {
                if let Some(shared) = weak.upgrade() {
                    shared.forget_displayed(handle);
                }
            })
        };
        let on_error = {
            let weak = Arc::downgrade(self);
            let todo_id = todo_id.clone();
            Box::new(move |handle: NotificationHandle, message: String| {
                warn!(%todo_id, %message, "platform notification error");
                if let Some(shared) = weak.upgrade() {
                    shared.forget_displayed(handle);
                }
            })
        };
        NotificationHandlers {
            on_click,
            on_close,
            on_error,
        }
    }

    fn handle_click(&self, todo_id: &TodoId, handle: NotificationHandle) {
        if let Some(highlighter) = &self.highlighter {
            if let Err(err) = highlighter.focus_window() {
                debug!(%err, "unable to focus window");
            }
            if let Err(err) = highlighter.highlight(todo_id) {
                debug!(%todo_id, %err, "unable to highlight todo");
            }
        }
        self.forget_displayed(handle);
        self.platform.close(handle);
        self.emit(&SchedulerEvent::Clicked {
            todo_id: todo_id.clone(),
        });
    }

    fn auto_dismiss(&self, handle: NotificationHandle) {
        let Some(displayed) = self.state.lock().displayed.remove(&handle) else {
            return;
        };
        debug!(todo_id = %displayed.todo_id, "auto-dismissing notification");
        self.platform.close(handle);
        self.emit(&SchedulerEvent::Dismissed {
            todo_id: displayed.todo_id,
        });
    }

    fn forget_displayed(&self, handle: NotificationHandle) {
        let removed = self.state.lock().displayed.remove(&handle);
        if let Some(timer) = removed.and_then(|displayed| displayed.dismiss_timer) {
            self.timers.clear_timer(timer);
        }
    }

    fn emit(&self, event: &SchedulerEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::PlatformError;
    use crate::testing::{FakePlatform, ManualClock, RecordingHighlighter};
    use chrono::Duration as ChronoDuration;

    struct Harness {
        clock: Arc<ManualClock>,
        platform: Arc<FakePlatform>,
        scheduler: NotificationScheduler,
        events: Arc<Mutex<Vec<SchedulerEvent>>>,
    }

    fn harness_with(highlighter: Option<Arc<RecordingHighlighter>>) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let platform = Arc::new(FakePlatform::new(clock.clone()));
        let mut builder =
            NotificationScheduler::builder(platform.clone(), platform.clone(), clock.clone());
        if let Some(highlighter) = highlighter {
            builder = builder.with_highlighter(highlighter);
        }
        let scheduler = builder.build();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        scheduler.subscribe(move |event| sink.lock().push(event.clone()));
        Harness {
            clock,
            platform,
            scheduler,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(None)
    }

    fn todo(id: &str, now: DateTime<Utc>) -> Todo {
        Todo {
            id: TodoId::from(id),
            title: format!("Task {id}"),
            description: None,
            completed: false,
            due_date: None,
            reminder_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn reminder_must_be_strictly_in_the_future() {
        let h = harness();
        let now = h.clock.now();
        let mut past = todo("a", now);
        past.reminder_time = Some(now - ChronoDuration::milliseconds(1));
        assert!(!h.scheduler.schedule_reminder(&past));
        assert_eq!(h.scheduler.pending_count(), 0);

        let mut exact = todo("b", now);
        exact.reminder_time = Some(now);
        assert!(!h.scheduler.schedule_reminder(&exact));

        let mut future = todo("c", now);
        future.reminder_time = Some(now + ChronoDuration::milliseconds(1));
        assert!(h.scheduler.schedule_reminder(&future));
        assert_eq!(h.scheduler.pending_count(), 1);
    }

    #[test]
    fn ineligible_without_support_permission_or_timestamp() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("a", now);
        assert!(!h.scheduler.schedule_reminder(&item));
        assert!(!h.scheduler.schedule_due_notification(&item));

        item.due_date = Some(now + ChronoDuration::hours(1));
        h.platform.set_permission(Permission::Default);
        assert!(!h.scheduler.schedule_due_notification(&item));
        h.platform.set_permission(Permission::Denied);
        assert!(!h.scheduler.schedule_due_notification(&item));

        h.platform.set_permission(Permission::Granted);
        h.platform.set_supported(false);
        assert!(!h.scheduler.schedule_due_notification(&item));
        assert_eq!(h.scheduler.permission(), Permission::Denied);

        h.platform.set_supported(true);
        item.title = "  ".into();
        assert!(!h.scheduler.schedule_due_notification(&item));
        assert_eq!(h.scheduler.pending_count(), 0);
        assert_eq!(h.platform.active_timers(), 0);
    }

    #[test]
    fn rescheduling_same_todo_replaces_entry() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.reminder_time = Some(now + ChronoDuration::hours(1));
        assert!(h.scheduler.schedule_reminder(&item));
        item.reminder_time = Some(now + ChronoDuration::hours(2));
        assert!(h.scheduler.schedule_reminder(&item));

        let pending = h.scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].scheduled_time, now + ChronoDuration::hours(2));
        assert_eq!(h.platform.active_timers(), 1);

        h.platform.advance(ChronoDuration::hours(3));
        assert_eq!(h.platform.shown().len(), 1);
    }

    #[test]
    fn fired_reminder_shows_once_and_leaves_pending_empty() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("rent", now);
        item.title = "Pay rent".into();
        item.reminder_time = Some(now + ChronoDuration::minutes(30));
        item.due_date = Some(now + ChronoDuration::hours(2) + ChronoDuration::minutes(30));
        assert!(h.scheduler.schedule_reminder(&item));

        h.platform.advance(ChronoDuration::minutes(29));
        assert!(h.platform.shown().is_empty());
        h.platform.advance(ChronoDuration::minutes(1));

        let shown = h.platform.shown();
        assert_eq!(shown.len(), 1);
        let note = &shown[0].notification;
        assert_eq!(note.title, "Reminder: Pay rent");
        assert_eq!(note.body, "Due in 2 hours");
        assert_eq!(note.tag, "todo-rent");
        assert_eq!(note.data.kind, NotificationKind::Reminder);
        assert_eq!(h.scheduler.pending_count(), 0);

        assert!(h.events.lock().iter().any(|event| matches!(
            event,
            SchedulerEvent::Fired { todo_id, kind: NotificationKind::Reminder, .. }
                if todo_id.as_str() == "rent"
        )));
    }

    #[test]
    fn reminder_without_due_uses_generic_body() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.reminder_time = Some(now + ChronoDuration::minutes(1));
        h.scheduler.schedule_reminder(&item);
        h.platform.advance(ChronoDuration::minutes(1));
        assert_eq!(h.platform.shown()[0].notification.body, "Reminder for your task");
    }

    #[test]
    fn title_snapshot_is_taken_at_schedule_time() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.title = "Old title".into();
        item.due_date = Some(now + ChronoDuration::minutes(5));
        h.scheduler.schedule_due_notification(&item);
        item.title = "New title".into();
        h.platform.advance(ChronoDuration::minutes(5));
        let shown = h.platform.shown();
        assert_eq!(shown[0].notification.title, "Due now: Old title");
        assert_eq!(shown[0].notification.body, "This task is due now.");
    }

    #[test]
    fn cleared_notifications_never_fire() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.due_date = Some(now + ChronoDuration::hours(1));
        h.scheduler.schedule_due_notification(&item);
        h.scheduler.clear_notification(&item.id);
        h.scheduler.clear_notification(&item.id);
        assert_eq!(h.scheduler.pending_count(), 0);

        h.platform.advance(ChronoDuration::hours(2));
        assert!(h.platform.shown().is_empty());
        let cleared = h
            .events
            .lock()
            .iter()
            .filter(|event| matches!(event, SchedulerEvent::Cleared { .. }))
            .count();
        assert_eq!(cleared, 1);
    }

    #[test]
    fn clear_all_cancels_everything() {
        let h = harness();
        let now = h.clock.now();
        for (index, id) in ["a", "b", "c"].iter().enumerate() {
            let mut item = todo(id, now);
            item.due_date = Some(now + ChronoDuration::hours(index as i64 + 1));
            assert!(h.scheduler.schedule_due_notification(&item));
        }
        assert_eq!(h.scheduler.clear_all_notifications(), 3);
        assert_eq!(h.platform.active_timers(), 0);
        h.platform.advance(ChronoDuration::days(1));
        assert!(h.platform.shown().is_empty());
    }

    #[test]
    fn reschedule_prefers_reminder_and_skips_ineligible() {
        let h = harness();
        let now = h.clock.now();

        let mut due_only = todo("due-only", now);
        due_only.due_date = Some(now + ChronoDuration::hours(3));

        let mut both = todo("both", now);
        both.due_date = Some(now + ChronoDuration::hours(5));
        both.reminder_time = Some(now + ChronoDuration::hours(4));

        let mut completed = todo("completed", now);
        completed.completed = true;
        completed.due_date = Some(now + ChronoDuration::hours(5));
        completed.reminder_time = Some(now + ChronoDuration::hours(4));

        let mut stale = todo("stale", now);
        stale.reminder_time = Some(now - ChronoDuration::hours(1));

        let scheduled = h
            .scheduler
            .reschedule_notifications(&[due_only, both, completed, stale]);
        assert_eq!(scheduled, 2);

        let pending = h.scheduler.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].todo_id.as_str(), "due-only");
        assert_eq!(pending[0].kind, NotificationKind::Due);
        assert_eq!(pending[1].todo_id.as_str(), "both");
        assert_eq!(pending[1].kind, NotificationKind::Reminder);
        assert_eq!(pending[1].scheduled_time, now + ChronoDuration::hours(4));
    }

    #[test]
    fn sync_todo_clears_completed() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.due_date = Some(now + ChronoDuration::hours(1));
        assert!(h.scheduler.sync_todo(&item));
        item.completed = true;
        assert!(!h.scheduler.sync_todo(&item));
        assert!(h.scheduler.pending_for(&item.id).is_none());
    }

    #[test]
    fn unanswered_notifications_auto_dismiss() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.due_date = Some(now + ChronoDuration::minutes(1));
        h.scheduler.schedule_due_notification(&item);
        h.platform.advance(ChronoDuration::minutes(1));
        assert_eq!(h.platform.open_notifications().len(), 1);

        h.platform.advance(ChronoDuration::seconds(9));
        assert_eq!(h.platform.open_notifications().len(), 1);
        h.platform.advance(ChronoDuration::seconds(1));
        assert!(h.platform.open_notifications().is_empty());
        assert!(h
            .events
            .lock()
            .contains(&SchedulerEvent::Dismissed { todo_id: item.id.clone() }));
        assert_eq!(h.platform.active_timers(), 0);
    }

    #[test]
    fn click_focuses_and_highlights() {
        let highlighter = Arc::new(RecordingHighlighter::default());
        let h = harness_with(Some(highlighter.clone()));
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.due_date = Some(now + ChronoDuration::minutes(1));
        h.scheduler.schedule_due_notification(&item);
        h.platform.advance(ChronoDuration::minutes(1));

        let handle = h.platform.shown()[0].handle;
        h.platform.click(handle);
        assert_eq!(highlighter.focus_requests(), 1);
        assert_eq!(highlighter.highlighted(), vec![item.id.clone()]);
        assert!(h.platform.open_notifications().is_empty());
        assert_eq!(h.platform.active_timers(), 0);

        let events = h.events.lock();
        assert!(events.contains(&SchedulerEvent::Clicked { todo_id: item.id.clone() }));
        assert!(!events
            .iter()
            .any(|event| matches!(event, SchedulerEvent::Dismissed { .. })));
    }

    #[test]
    fn highlight_failures_are_swallowed() {
        let highlighter = Arc::new(RecordingHighlighter::failing());
        let h = harness_with(Some(highlighter.clone()));
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.due_date = Some(now + ChronoDuration::minutes(1));
        h.scheduler.schedule_due_notification(&item);
        h.platform.advance(ChronoDuration::minutes(1));
        h.platform.click(h.platform.shown()[0].handle);
        assert_eq!(highlighter.focus_requests(), 1);
        assert!(h.platform.open_notifications().is_empty());
    }

    #[test]
    fn platform_errors_release_the_notification() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.due_date = Some(now + ChronoDuration::minutes(1));
        h.scheduler.schedule_due_notification(&item);
        h.platform.advance(ChronoDuration::minutes(1));
        h.platform.fail(h.platform.shown()[0].handle, "renderer crashed");
        assert_eq!(h.platform.active_timers(), 0);
    }

    #[test]
    fn show_failure_is_not_fatal() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.due_date = Some(now + ChronoDuration::minutes(1));
        h.platform.set_show_failure(true);
        h.scheduler.schedule_due_notification(&item);
        h.platform.advance(ChronoDuration::minutes(1));
        assert!(h.platform.shown().is_empty());
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[test]
    fn permission_requests_normalize_failures() {
        let h = harness();
        h.platform.set_permission(Permission::Default);
        h.platform
            .set_request_outcome(Err(PlatformError::Rejected("blocked by policy".into())));
        assert_eq!(h.scheduler.request_permission(), Permission::Denied);

        h.platform.set_request_outcome(Ok(Permission::Granted));
        assert_eq!(h.scheduler.request_permission(), Permission::Granted);
        assert_eq!(h.scheduler.permission(), Permission::Granted);

        let changes: Vec<Permission> = h
            .events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SchedulerEvent::PermissionChanged(status) => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(changes, [Permission::Denied, Permission::Granted]);

        h.platform.set_supported(false);
        assert_eq!(h.scheduler.request_permission(), Permission::Denied);
    }

    #[test]
    fn every_subscriber_hears_events_until_unsubscribed() {
        let h = harness();
        let second = Arc::new(Mutex::new(0usize));
        let counter = second.clone();
        let id = h.scheduler.subscribe(move |_| *counter.lock() += 1);

        h.scheduler.request_permission();
        assert_eq!(*second.lock(), 1);
        assert_eq!(h.events.lock().len(), 1);

        assert!(h.scheduler.unsubscribe(id));
        assert!(!h.scheduler.unsubscribe(id));
        h.scheduler.request_permission();
        assert_eq!(*second.lock(), 1);
        assert_eq!(h.events.lock().len(), 2);
    }

    #[test]
    fn dropping_the_scheduler_cancels_timers() {
        let h = harness();
        let now = h.clock.now();
        let mut item = todo("a", now);
        item.due_date = Some(now + ChronoDuration::minutes(1));
        h.scheduler.schedule_due_notification(&item);
        assert_eq!(h.platform.active_timers(), 1);

        let Harness {
            platform, scheduler, ..
        } = h;
        drop(scheduler);
        assert_eq!(platform.active_timers(), 0);
        platform.advance(ChronoDuration::minutes(5));
        assert!(platform.shown().is_empty());
    }
}
