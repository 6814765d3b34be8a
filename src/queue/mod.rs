//! # Queue Manager
//!
//! Four independent in-memory work queues (submit, status, kill, delete),
//! each deduplicated by job id and drained by the periodic
//! [`Scheduler`](scheduler::Scheduler).
//!
//! ## Guarantees
//!
//! - An id is pending in a queue at most once. Membership is held from
//!   enqueue until the handler for that id returns, so an id being processed
//!   cannot be queued again in the same queue meanwhile.
//! - A drain takes a snapshot of the pending ids and processes it strictly
//!   one job at a time. Ids enqueued during the drain wait for the next one.
//! - At most one drain per queue runs at a time. A drain requested while
//!   another is in progress is skipped.

pub mod scheduler;

pub use scheduler::{Scheduler, TickReport};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::constants::queues;
use crate::error::Result;

/// The lifecycle handlers a drain dispatches to.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    async fn submit(&self, job_id: &str, force: bool) -> Result<()>;

    async fn status(&self, job_id: &str) -> Result<()>;

    async fn kill(&self, job_id: &str) -> Result<()>;

    async fn delete(&self, job_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Submit,
    Status,
    Kill,
    Delete,
}

impl QueueKind {
    /// Drain order of one tick.
    pub const ALL: [QueueKind; 4] = [Self::Submit, Self::Status, Self::Kill, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => queues::SUBMIT,
            Self::Status => queues::STATUS,
            Self::Kill => queues::KILL,
            Self::Delete => queues::DELETE,
        }
    }

    /// Kind named by `JobState::recovery_queue`.
    pub fn from_queue_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: String,
    /// Only meaningful for the submit queue.
    pub force: bool,
}

/// Counts for one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub skipped: bool,
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueueEntry>,
    /// Ids pending or in flight.
    members: HashSet<String>,
}

/// One deduplicated queue with its drain guard.
#[derive(Debug)]
pub struct JobQueue {
    kind: QueueKind,
    state: Mutex<QueueState>,
    draining: AtomicBool,
}

impl JobQueue {
    pub fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            state: Mutex::new(QueueState::default()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Queue `job_id` unless it is already a member. A forced request for an
    /// id that is still pending upgrades that entry. Returns whether a new
    /// entry was added.
    pub fn enqueue(&self, job_id: &str, force: bool) -> bool {
        let mut state = self.state.lock();
        if state.members.contains(job_id) {
            if force {
                if let Some(entry) = state.pending.iter_mut().find(|e| e.job_id == job_id) {
                    entry.force = true;
                }
            }
            return false;
        }
        state.members.insert(job_id.to_string());
        state.pending.push_back(QueueEntry {
            job_id: job_id.to_string(),
            force,
        });
        true
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.state.lock().members.contains(job_id)
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|entry| entry.job_id.clone())
            .collect()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn release(&self, job_id: &str) {
        self.state.lock().members.remove(job_id);
    }

    /// Process a snapshot of the pending entries one at a time.
    pub async fn drain<F, Fut>(&self, mut handler: F) -> DrainReport
    where
        F: FnMut(QueueEntry) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(queue = %self.kind, "Drain already in progress, skipping");
            return DrainReport {
                skipped: true,
                ..DrainReport::default()
            };
        }

        let snapshot = std::mem::take(&mut self.state.lock().pending);
        let mut guard = DrainGuard {
            queue: self,
            unprocessed: snapshot,
        };
        let mut report = DrainReport::default();

        if !guard.unprocessed.is_empty() {
            debug!(queue = %self.kind, jobs = guard.unprocessed.len(), "Drain started");
        }

        while let Some(entry) = guard.unprocessed.front().cloned() {
            let job_id = entry.job_id.clone();
            let outcome = handler(entry).await;
            guard.unprocessed.pop_front();
            self.release(&job_id);

            report.processed += 1;
            if let Err(e) = outcome {
                report.failed += 1;
                warn!(queue = %self.kind, job_id = %job_id, error = %e, "Queue handler failed");
            }
        }

        if report.processed > 0 {
            info!(
                queue = %self.kind,
                processed = report.processed,
                failed = report.failed,
                "Drain finished"
            );
        }
        report
    }
}

/// Clears the drain flag and puts back the entries of a cancelled drain,
/// including the one in flight.
struct DrainGuard<'a> {
    queue: &'a JobQueue,
    unprocessed: VecDeque<QueueEntry>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.unprocessed.is_empty() {
            let mut state = self.queue.state.lock();
            while let Some(entry) = self.unprocessed.pop_back() {
                state.pending.push_front(entry);
            }
        }
        self.queue.draining.store(false, Ordering::SeqCst);
    }
}

/// The four queues of one orchestrator process.
#[derive(Debug)]
pub struct QueueManager {
    submit: JobQueue,
    status: JobQueue,
    kill: JobQueue,
    delete: JobQueue,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            submit: JobQueue::new(QueueKind::Submit),
            status: JobQueue::new(QueueKind::Status),
            kill: JobQueue::new(QueueKind::Kill),
            delete: JobQueue::new(QueueKind::Delete),
        }
    }

    pub fn queue(&self, kind: QueueKind) -> &JobQueue {
        match kind {
            QueueKind::Submit => &self.submit,
            QueueKind::Status => &self.status,
            QueueKind::Kill => &self.kill,
            QueueKind::Delete => &self.delete,
        }
    }

    pub fn enqueue(&self, kind: QueueKind, job_id: &str, force: bool) -> bool {
        let added = self.queue(kind).enqueue(job_id, force);
        if added {
            debug!(queue = %kind, job_id = %job_id, force, "Job enqueued");
        }
        added
    }

    pub fn enqueue_submit(&self, job_id: &str, force: bool) -> bool {
        self.enqueue(QueueKind::Submit, job_id, force)
    }

    pub fn enqueue_status(&self, job_id: &str) -> bool {
        self.enqueue(QueueKind::Status, job_id, false)
    }

    pub fn enqueue_kill(&self, job_id: &str) -> bool {
        self.enqueue(QueueKind::Kill, job_id, false)
    }

    pub fn enqueue_delete(&self, job_id: &str) -> bool {
        self.enqueue(QueueKind::Delete, job_id, false)
    }

    pub fn drain_submit_queue<'a>(
        &'a self,
        handler: &'a dyn LifecycleHandler,
    ) -> impl std::future::Future<Output = DrainReport> + 'a {
        self.submit
            .drain(move |entry| async move { handler.submit(&entry.job_id, entry.force).await })
    }

    pub fn drain_status_queue<'a>(
        &'a self,
        handler: &'a dyn LifecycleHandler,
    ) -> impl std::future::Future<Output = DrainReport> + 'a {
        self.status
            .drain(move |entry| async move { handler.status(&entry.job_id).await })
    }

    pub fn drain_kill_queue<'a>(
        &'a self,
        handler: &'a dyn LifecycleHandler,
    ) -> impl std::future::Future<Output = DrainReport> + 'a {
        self.kill
            .drain(move |entry| async move { handler.kill(&entry.job_id).await })
    }

    pub fn drain_delete_queue<'a>(
        &'a self,
        handler: &'a dyn LifecycleHandler,
    ) -> impl std::future::Future<Output = DrainReport> + 'a {
        self.delete
            .drain(move |entry| async move { handler.delete(&entry.job_id).await })
    }

    pub async fn drain(&self, kind: QueueKind, handler: &dyn LifecycleHandler) -> DrainReport {
        match kind {
            QueueKind::Submit => self.drain_submit_queue(handler).await,
            QueueKind::Status => self.drain_status_queue(handler).await,
            QueueKind::Kill => self.drain_kill_queue(handler).await,
            QueueKind::Delete => self.drain_delete_queue(handler).await,
        }
    }
}
