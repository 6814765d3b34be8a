//! Request side of the lifecycle: mark the document and enqueue its id.
//! The queue drains do the actual work.

use std::sync::Arc;
use tracing::{debug, instrument};

use super::LifecycleOrchestrator;
use crate::error::Result;
use crate::models::JobDocument;
use crate::queue::QueueManager;
use crate::state_machine::{JobEvent, JobState};
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct JobRequests {
    store: Arc<dyn DocumentStore>,
    queues: Arc<QueueManager>,
}

impl std::fmt::Debug for JobRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRequests")
            .field("queues", &self.queues)
            .finish_non_exhaustive()
    }
}

impl JobRequests {
    pub fn new(store: Arc<dyn DocumentStore>, queues: Arc<QueueManager>) -> Self {
        Self { store, queues }
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    /// Move a submittable (or forced) job to `QUEUE` and enqueue it for
    /// submission. Other jobs are enqueued as they are, which amounts to a
    /// status refresh.
    #[instrument(skip(self))]
    pub async fn request_submit(&self, job_id: &str, force: bool) -> Result<JobDocument> {
        let mut job = self.store.get(job_id).await?;
        if (force || job.status().is_submittable()) && job.status() != JobState::Queue {
            LifecycleOrchestrator::apply(&mut job, JobEvent::Enqueue)?;
            self.store.save(&mut job).await?;
        }
        self.queues.enqueue_submit(&job.id, force);
        Ok(job)
    }

    /// Enqueue a status refresh for jobs in `RUN`, `UPLOADING` or `DONE`.
    /// Returns whether the job qualified.
    #[instrument(skip(self))]
    pub async fn request_status(&self, job_id: &str) -> Result<bool> {
        let job = self.store.get(job_id).await?;
        match job.status() {
            JobState::Run | JobState::Uploading | JobState::Done => {
                self.queues.enqueue_status(&job.id);
                Ok(true)
            }
            other => {
                debug!(status = %other, "Status refresh not requested");
                Ok(false)
            }
        }
    }

    /// Mark the job `KILL` and enqueue it.
    #[instrument(skip(self))]
    pub async fn request_kill(&self, job_id: &str) -> Result<JobDocument> {
        let mut job = self.store.get(job_id).await?;
        if job.status() != JobState::Kill {
            LifecycleOrchestrator::apply(&mut job, JobEvent::RequestKill)?;
            self.store.save(&mut job).await?;
        }
        self.queues.enqueue_kill(&job.id);
        Ok(job)
    }

    /// Mark the job `DELETE` so it disappears from listings, and enqueue the
    /// cleanup. Returns `None` when the document is already gone.
    #[instrument(skip(self))]
    pub async fn request_delete(&self, job_id: &str) -> Result<Option<JobDocument>> {
        let mut job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if job.status() != JobState::Delete {
            LifecycleOrchestrator::apply(&mut job, JobEvent::RequestDelete)?;
            self.store.save(&mut job).await?;
        }
        self.queues.enqueue_delete(&job.id);
        Ok(Some(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueKind;
    use crate::store::InMemoryDocumentStore;
    use crate::test_helpers::sample_job;

    async fn requests_with(states: &[(&str, JobState)]) -> (JobRequests, Arc<InMemoryDocumentStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        for (id, state) in states {
            let mut job = sample_job(id, "local");
            job.job_status.status = *state;
            store.save(&mut job).await.unwrap();
        }
        (JobRequests::new(store.clone(), Arc::new(QueueManager::new())), store)
    }

    #[tokio::test]
    async fn test_request_submit_marks_queue() {
        let (requests, store) = requests_with(&[("new", JobState::Create), ("done", JobState::Done)]).await;

        requests.request_submit("new", false).await.unwrap();
        requests.request_submit("new", false).await.unwrap();
        assert_eq!(store.get("new").await.unwrap().status(), JobState::Queue);

        requests.request_submit("done", false).await.unwrap();
        assert_eq!(store.get("done").await.unwrap().status(), JobState::Done);

        assert_eq!(
            requests.queues().queue(QueueKind::Submit).pending_ids(),
            vec!["new", "done"]
        );
    }

    #[tokio::test]
    async fn test_request_status_only_for_active_jobs() {
        let (requests, _) = requests_with(&[
            ("run", JobState::Run),
            ("uploading", JobState::Uploading),
            ("done", JobState::Done),
            ("fail", JobState::Fail),
            ("create", JobState::Create),
        ])
        .await;

        for id in ["run", "uploading", "done"] {
            assert!(requests.request_status(id).await.unwrap());
        }
        for id in ["fail", "create"] {
            assert!(!requests.request_status(id).await.unwrap());
        }
        assert_eq!(requests.queues().queue(QueueKind::Status).pending_len(), 3);
    }

    #[tokio::test]
    async fn test_request_kill_and_delete() {
        let (requests, store) = requests_with(&[("run", JobState::Run), ("done", JobState::Done)]).await;

        requests.request_kill("run").await.unwrap();
        assert_eq!(store.get("run").await.unwrap().status(), JobState::Kill);
        assert!(requests.request_kill("done").await.is_err());

        requests.request_delete("done").await.unwrap();
        assert_eq!(store.get("done").await.unwrap().status(), JobState::Delete);
        assert!(requests.request_delete("missing").await.unwrap().is_none());

        assert_eq!(requests.queues().queue(QueueKind::Kill).pending_ids(), vec!["run"]);
        assert_eq!(requests.queues().queue(QueueKind::Delete).pending_ids(), vec!["done"]);
    }
}
