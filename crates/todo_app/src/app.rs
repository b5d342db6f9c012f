use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use notify::{RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use todo_domain::{
    clock::SystemClock,
    notifications::Permission,
    presentation,
    scheduler::DEFAULT_AUTO_DISMISS,
    store::FileKeyValueStore,
    NotificationScheduler, SchedulerConfig, SchedulerEvent, TodoService,
};
use todo_sync::TodoSyncService;

use crate::console::ConsoleNotifier;
use crate::runtime::EventLoop;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub notifications: Permission,
    pub auto_dismiss: Duration,
    pub icon: Option<String>,
    pub storage_quota_bytes: Option<usize>,
    /// Upper bound on how long the loop sleeps between checks.
    pub poll_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./todo-data"),
            notifications: Permission::Default,
            auto_dismiss: DEFAULT_AUTO_DISMISS,
            icon: None,
            storage_quota_bytes: None,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_lookup(|name| std::env::var(name).ok()))
    }

    /// Builds a config from an arbitrary variable source. Unparseable values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup("TODO_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir.trim());
            }
        }
        if let Some(value) = lookup("TODO_NOTIFICATIONS") {
            match parse_permission(&value) {
                Some(permission) => config.notifications = permission,
                None => warn!(%value, "ignoring unknown TODO_NOTIFICATIONS value"),
            }
        }
        if let Some(secs) = lookup("TODO_AUTO_DISMISS_SECS") {
            if let Ok(value) = secs.trim().parse::<u64>() {
                if value > 0 {
                    config.auto_dismiss = Duration::from_secs(value);
                }
            }
        }
        if let Some(icon) = lookup("TODO_ICON") {
            let icon = icon.trim();
            if !icon.is_empty() {
                config.icon = Some(icon.to_string());
            }
        }
        if let Some(quota) = lookup("TODO_STORAGE_QUOTA_BYTES") {
            if let Ok(value) = quota.trim().parse::<usize>() {
                config.storage_quota_bytes = Some(value);
            }
        }
        config
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            auto_dismiss: self.auto_dismiss,
            icon: self.icon.clone(),
            ..SchedulerConfig::default()
        }
    }
}

fn parse_permission(value: &str) -> Option<Permission> {
    match value.trim().to_ascii_lowercase().as_str() {
        "granted" => Some(Permission::Granted),
        "denied" => Some(Permission::Denied),
        "default" => Some(Permission::Default),
        _ => None,
    }
}

/// Maps a changed file in the data directory to the storage key it holds. Temporary files
/// written during an atomic replace are skipped.
pub fn storage_key_for(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(".json")
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

fn log_event(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::PermissionChanged(permission) => {
            info!(%permission, "notification permission changed")
        }
        SchedulerEvent::Scheduled {
            todo_id,
            kind,
            scheduled_time,
        } => debug!(%todo_id, ?kind, %scheduled_time, "notification scheduled"),
        SchedulerEvent::Cleared { todo_id } => debug!(%todo_id, "notification cleared"),
        SchedulerEvent::Fired { todo_id, kind, .. } => info!(%todo_id, ?kind, "notification fired"),
        SchedulerEvent::Clicked { todo_id } => info!(%todo_id, "notification clicked"),
        SchedulerEvent::Dismissed { todo_id } => debug!(%todo_id, "notification dismissed"),
    }
}

fn print_overview(service: &TodoService) {
    let now = Utc::now();
    let summary = service.summary();
    println!(
        "{} open: {} overdue, {} due soon, {} upcoming, {} undated",
        summary.total, summary.overdue, summary.due_soon, summary.upcoming, summary.no_date
    );
    for todo in service.prioritized() {
        let mark = if todo.completed { "x" } else { " " };
        println!(
            "[{mark}] {} ({})",
            todo.title,
            presentation::describe(&todo, now)
        );
    }
}

pub fn run(config: AppConfig) -> Result<()> {
    let mut backend = FileKeyValueStore::open(&config.data_dir)
        .with_context(|| format!("failed to open data dir {}", config.data_dir.display()))?;
    if let Some(quota) = config.storage_quota_bytes {
        backend = backend.with_quota(quota);
    }

    let event_loop = Arc::new(EventLoop::new());
    let notifier = Arc::new(ConsoleNotifier::stdout(config.notifications));
    let clock = Arc::new(SystemClock);
    let scheduler = NotificationScheduler::builder(notifier, event_loop.clone(), clock.clone())
        .with_config(config.scheduler_config())
        .build();
    scheduler.subscribe(log_event);

    let service = TodoService::builder(Arc::new(backend))
        .with_clock(clock)
        .with_scheduler(scheduler)
        .build()
        .context("failed to load todos")?;
    let permission = service.request_permission();
    info!(%permission, pending = service.pending_notifications(), "reminders ready");
    print_overview(&service);

    let (tx, rx) = mpsc::channel::<Option<String>>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                for key in event.paths.iter().filter_map(|path| storage_key_for(path)) {
                    let _ = tx.send(Some(key));
                }
            }
            Err(err) => warn!(%err, "storage watcher error"),
        }
    })
    .context("failed to create storage watcher")?;
    watcher
        .watch(&config.data_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", config.data_dir.display()))?;

    let mut sync = TodoSyncService::new();
    loop {
        event_loop.run_due();
        match rx.recv_timeout(event_loop.time_until_next(config.poll_interval)) {
            Ok(key) => {
                sync.notify_external_change(key.as_deref());
                while let Ok(key) = rx.try_recv() {
                    sync.notify_external_change(key.as_deref());
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if sync.pending() > 0 {
            match sync.drain(&service) {
                Ok(reports) => {
                    for report in reports {
                        debug!(?report, "sync job finished");
                    }
                }
                // The failed job stays queued and is retried on the next pass.
                Err(err) => warn!("sync failed: {err:#}"),
            }
        }
    }
    Ok(())
}
