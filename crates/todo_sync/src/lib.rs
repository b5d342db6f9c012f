//! Reacts to changes made to the todo store outside this process (another window, another
//! tab, a hand edit of the storage file) by reloading and rebuilding notification timers.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use todo_domain::{notifications::Permission, store::TODO_STORAGE_KEY, TodoService};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncJobKind {
    InitialLoad,
    /// `key` is the storage key that changed; `None` means the whole store was cleared.
    ExternalChange { key: Option<String> },
    PermissionGranted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncJob {
    pub kind: SyncJobKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub kind: SyncJobKind,
    pub todos_loaded: Option<usize>,
    pub notifications_pending: usize,
}

#[derive(Debug, Default)]
pub struct TodoSyncService {
    pending_jobs: VecDeque<SyncJob>,
}

impl TodoSyncService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_initial_load(&mut self) {
        self.enqueue(SyncJobKind::InitialLoad);
    }

    /// Queues a reload when `key` concerns todos. Returns whether anything was queued.
    pub fn notify_external_change(&mut self, key: Option<&str>) -> bool {
        if key.is_some_and(|key| key != TODO_STORAGE_KEY) {
            tracing::debug!(?key, "ignoring change to unrelated storage key");
            return false;
        }
        self.enqueue(SyncJobKind::ExternalChange {
            key: key.map(str::to_string),
        });
        true
    }

    pub fn notify_permission(&mut self, permission: Permission) {
        if permission == Permission::Granted {
            self.enqueue(SyncJobKind::PermissionGranted);
        }
    }

    pub fn pending(&self) -> usize {
        self.pending_jobs.len()
    }

    pub fn dequeue_job(&mut self) -> Option<SyncJob> {
        self.pending_jobs.pop_front()
    }

    #[instrument(skip(self, service))]
    pub fn perform_job(&mut self, job: SyncJob, service: &TodoService) -> Result<SyncReport> {
        let todos_loaded = match &job.kind {
            SyncJobKind::InitialLoad | SyncJobKind::ExternalChange { .. } => Some(
                service
                    .reload()
                    .with_context(|| format!("failed to reload todos for {:?}", job.kind))?,
            ),
            SyncJobKind::PermissionGranted => {
                service.reschedule_all();
                None
            }
        };
        Ok(SyncReport {
            kind: job.kind,
            todos_loaded,
            notifications_pending: service.pending_notifications(),
        })
    }

    /// Runs queued jobs in order until the queue is empty or one fails; the failing job is
    /// put back at the front.
    pub fn drain(&mut self, service: &TodoService) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::new();
        while let Some(job) = self.dequeue_job() {
            match self.perform_job(job.clone(), service) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    self.pending_jobs.push_front(job);
                    return Err(err);
                }
            }
        }
        Ok(reports)
    }

    fn enqueue(&mut self, kind: SyncJobKind) {
        let job = SyncJob { kind };
        // Back-to-back reloads collapse into one.
        if self.pending_jobs.back() == Some(&job) {
            return;
        }
        self.pending_jobs.push_back(job);
    }
}
