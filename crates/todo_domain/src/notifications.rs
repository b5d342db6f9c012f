use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::todo::TodoId;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Default,
    Granted,
    Denied,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::Default => "default",
            Permission::Granted => "granted",
            Permission::Denied => "denied",
        })
    }
}

/// Which timestamp of a todo a notification was scheduled from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Reminder,
    Due,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

pub type TimerCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub todo_id: TodoId,
    pub kind: NotificationKind,
}

/// What gets handed to the platform when a scheduled notification fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformNotification {
    pub title: String,
    pub body: String,
    /// Stable per todo so the platform replaces rather than stacks.
    pub tag: String,
    pub icon: Option<String>,
    pub require_interaction: bool,
    pub data: NotificationData,
}

/// Callbacks the platform invokes for a shown notification.
pub struct NotificationHandlers {
    pub on_click: Box<dyn Fn(NotificationHandle) + Send + Sync>,
    pub on_close: Box<dyn Fn(NotificationHandle) + Send + Sync>,
    pub on_error: Box<dyn Fn(NotificationHandle, String) + Send + Sync>,
}

impl fmt::Debug for NotificationHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHandlers").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("notifications are not supported")]
    Unsupported,
    #[error("permission request rejected: {0}")]
    Rejected(String),
    #[error("failed to show notification: {0}")]
    ShowFailed(String),
    #[error("host request failed: {0}")]
    Host(String),
}

/// Platform notification primitive. Implemented by hosts and by test fakes.
pub trait NotificationPlatform: Send + Sync {
    fn is_supported(&self) -> bool;
    fn permission(&self) -> Permission;
    fn request_permission(&self) -> Result<Permission, PlatformError>;
    fn show(
        &self,
        notification: PlatformNotification,
        handlers: NotificationHandlers,
    ) -> Result<NotificationHandle, PlatformError>;
    fn close(&self, handle: NotificationHandle);
}

/// Deferred callbacks on the host's event loop. Callbacks never run inside `set_timer`.
pub trait TimerHost: Send + Sync {
    fn set_timer(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
    /// Unknown or already-fired handles are ignored.
    fn clear_timer(&self, handle: TimerHandle);
}

/// Brings the app forward and points at a todo after a notification click.
pub trait TodoHighlighter: Send + Sync {
    fn focus_window(&self) -> Result<(), PlatformError>;
    fn highlight(&self, todo_id: &TodoId) -> Result<(), PlatformError>;
}

pub fn notification_tag(todo_id: &TodoId) -> String {
    format!("todo-{todo_id}")
}
