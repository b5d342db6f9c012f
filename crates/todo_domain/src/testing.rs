//! In-process stand-ins for the host: a settable clock and a notification platform whose
//! timers run on that clock. Tests call [`FakePlatform::advance`] instead of sleeping.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::{
    clock::Clock,
    notifications::{
        NotificationHandle, NotificationHandlers, NotificationPlatform, Permission,
        PlatformError, PlatformNotification, TimerCallback, TimerHandle, TimerHost,
        TodoHighlighter,
    },
    todo::TodoId,
};

/// 2025-11-07T09:00:00Z
const DEFAULT_EPOCH_SECS: i64 = 1_762_506_000;

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(DEFAULT_EPOCH_SECS))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShownNotification {
    pub handle: NotificationHandle,
    pub notification: PlatformNotification,
    pub shown_at: DateTime<Utc>,
    pub closed: bool,
}

struct FakeTimer {
    handle: TimerHandle,
    due: DateTime<Utc>,
    callback: TimerCallback,
}

struct FakeState {
    supported: bool,
    permission: Permission,
    request_outcome: Result<Permission, PlatformError>,
    fail_show: bool,
    next_id: u64,
    timers: Vec<FakeTimer>,
    shown: Vec<ShownNotification>,
    handlers: HashMap<NotificationHandle, Arc<NotificationHandlers>>,
}

/// Notification platform and timer host sharing one [`ManualClock`].
pub struct FakePlatform {
    clock: Arc<ManualClock>,
    state: Mutex<FakeState>,
}

impl FakePlatform {
    /// Supported, permission granted.
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(FakeState {
                supported: true,
                permission: Permission::Granted,
                request_outcome: Ok(Permission::Granted),
                fail_show: false,
                next_id: 0,
                timers: Vec::new(),
                shown: Vec::new(),
                handlers: HashMap::new(),
            }),
        }
    }

    pub fn clock(&self) -> Arc<ManualClock> {
        self.clock.clone()
    }

    pub fn set_supported(&self, supported: bool) {
        self.state.lock().supported = supported;
    }

    pub fn set_permission(&self, permission: Permission) {
        self.state.lock().permission = permission;
    }

    /// What the next `request_permission` call yields. `Ok` values also become the
    /// current permission.
    pub fn set_request_outcome(&self, outcome: Result<Permission, PlatformError>) {
        self.state.lock().request_outcome = outcome;
    }

    pub fn set_show_failure(&self, fail: bool) {
        self.state.lock().fail_show = fail;
    }

    pub fn shown(&self) -> Vec<ShownNotification> {
        self.state.lock().shown.clone()
    }

    pub fn open_notifications(&self) -> Vec<ShownNotification> {
        self.state
            .lock()
            .shown
            .iter()
            .filter(|shown| !shown.closed)
            .cloned()
            .collect()
    }

    pub fn active_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Moves the clock forward, running every timer that comes due on the way in
    /// deadline order.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + by;
        loop {
            let next = {
                let mut state = self.state.lock();
                let index = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by_key(|(_, timer)| (timer.due, timer.handle))
                    .map(|(index, _)| index);
                index.map(|index| state.timers.remove(index))
            };
            let Some(timer) = next else {
                break;
            };
            if timer.due > self.clock.now() {
                self.clock.set(timer.due);
            }
            (timer.callback)();
        }
        self.clock.set(target);
    }

    pub fn click(&self, handle: NotificationHandle) {
        let handlers = self.state.lock().handlers.get(&handle).cloned();
        if let Some(handlers) = handlers {
            (handlers.on_click)(handle);
        }
    }

    pub fn fail(&self, handle: NotificationHandle, message: &str) {
        let handlers = self.state.lock().handlers.remove(&handle);
        if let Some(handlers) = handlers {
            (handlers.on_error)(handle, message.to_string());
        }
    }

    fn next_id(state: &mut FakeState) -> u64 {
        state.next_id += 1;
        state.next_id
    }
}

impl NotificationPlatform for FakePlatform {
    fn is_supported(&self) -> bool {
        self.state.lock().supported
    }

    fn permission(&self) -> Permission {
        self.state.lock().permission
    }

    fn request_permission(&self) -> Result<Permission, PlatformError> {
        let mut state = self.state.lock();
        let outcome = state.request_outcome.clone();
        if let Ok(permission) = outcome {
            state.permission = permission;
        }
        outcome
    }

    fn show(
        &self,
        notification: PlatformNotification,
        handlers: NotificationHandlers,
    ) -> Result<NotificationHandle, PlatformError> {
        let mut state = self.state.lock();
        if state.fail_show {
            return Err(PlatformError::ShowFailed("fake platform refused".into()));
        }
        let handle = NotificationHandle(Self::next_id(&mut state));
        state.shown.push(ShownNotification {
            handle,
            notification,
            shown_at: self.clock.now(),
            closed: false,
        });
        state.handlers.insert(handle, Arc::new(handlers));
        Ok(handle)
    }

    fn close(&self, handle: NotificationHandle) {
        let handlers = {
            let mut state = self.state.lock();
            let Some(shown) = state
                .shown
                .iter_mut()
                .find(|shown| shown.handle == handle && !shown.closed)
            else {
                return;
            };
            shown.closed = true;
            state.handlers.remove(&handle)
        };
        if let Some(handlers) = handlers {
            (handlers.on_close)(handle);
        }
    }
}

impl TimerHost for FakePlatform {
    fn set_timer(&self, delay: std::time::Duration, callback: TimerCallback) -> TimerHandle {
        let delay = Duration::from_std(delay).unwrap_or_else(|_| Duration::weeks(52 * 100));
        let due = self.clock.now() + delay;
        let mut state = self.state.lock();
        let handle = TimerHandle(Self::next_id(&mut state));
        state.timers.push(FakeTimer {
            handle,
            due,
            callback,
        });
        handle
    }

    fn clear_timer(&self, handle: TimerHandle) {
        self.state.lock().timers.retain(|timer| timer.handle != handle);
    }
}

/// Records highlight requests; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingHighlighter {
    highlighted: Mutex<Vec<TodoId>>,
    focus_requests: Mutex<usize>,
    fail: Mutex<bool>,
}

impl RecordingHighlighter {
    pub fn failing() -> Self {
        let highlighter = Self::default();
        *highlighter.fail.lock() = true;
        highlighter
    }

    pub fn highlighted(&self) -> Vec<TodoId> {
        self.highlighted.lock().clone()
    }

    pub fn focus_requests(&self) -> usize {
        *self.focus_requests.lock()
    }
}

impl TodoHighlighter for RecordingHighlighter {
    fn focus_window(&self) -> Result<(), PlatformError> {
        *self.focus_requests.lock() += 1;
        if *self.fail.lock() {
            return Err(PlatformError::Host("window is gone".into()));
        }
        Ok(())
    }

    fn highlight(&self, todo_id: &TodoId) -> Result<(), PlatformError> {
        if *self.fail.lock() {
            return Err(PlatformError::Host("element not rendered".into()));
        }
        self.highlighted.lock().push(todo_id.clone());
        Ok(())
    }
}
