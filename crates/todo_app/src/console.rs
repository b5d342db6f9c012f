use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use todo_domain::notifications::{
    NotificationHandle, NotificationHandlers, NotificationPlatform, Permission, PlatformError,
    PlatformNotification,
};
use tracing::debug;

/// Prints notifications to a terminal. Permission comes from configuration: a configured
/// `denied` sticks, anything else is granted on request.
pub struct ConsoleNotifier<W: Write + Send = std::io::Stdout> {
    out: Mutex<W>,
    configured: Permission,
    permission: Mutex<Permission>,
    next_id: Mutex<u64>,
    open: Mutex<HashMap<NotificationHandle, Arc<NotificationHandlers>>>,
}

impl ConsoleNotifier {
    pub fn stdout(configured: Permission) -> Self {
        Self::with_writer(std::io::stdout(), configured)
    }
}

impl<W: Write + Send> ConsoleNotifier<W> {
    pub fn with_writer(out: W, configured: Permission) -> Self {
        Self {
            out: Mutex::new(out),
            configured,
            permission: Mutex::new(configured),
            next_id: Mutex::new(0),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }

    pub fn into_writer(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> NotificationPlatform for ConsoleNotifier<W> {
    fn is_supported(&self) -> bool {
        true
    }

    fn permission(&self) -> Permission {
        *self.permission.lock()
    }

    fn request_permission(&self) -> Result<Permission, PlatformError> {
        let mut permission = self.permission.lock();
        if self.configured != Permission::Denied {
            *permission = Permission::Granted;
        }
        Ok(*permission)
    }

    fn show(
        &self,
        notification: PlatformNotification,
        handlers: NotificationHandlers,
    ) -> Result<NotificationHandle, PlatformError> {
        {
            let mut out = self.out.lock();
            writeln!(out, "[{}] {}", notification.tag, notification.title)
                .and_then(|_| writeln!(out, "    {}", notification.body))
                .and_then(|_| out.flush())
                .map_err(|err| PlatformError::ShowFailed(err.to_string()))?;
        }
        let handle = {
            let mut next_id = self.next_id.lock();
            *next_id += 1;
            NotificationHandle(*next_id)
        };
        self.open.lock().insert(handle, Arc::new(handlers));
        Ok(handle)
    }

    fn close(&self, handle: NotificationHandle) {
        let handlers = self.open.lock().remove(&handle);
        if let Some(handlers) = handlers {
            debug!(?handle, "console notification closed");
            (handlers.on_close)(handle);
        }
    }
}
