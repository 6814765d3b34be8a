//! Kill handler.

use tracing::{debug, instrument};

use super::LifecycleOrchestrator;
use crate::engine::ExecutionEngine;
use crate::error::{ClusterpostError, Result};
use crate::models::JobDocument;
use crate::remote::RemoteOperation;
use crate::state_machine::{JobEvent, JobState};

impl LifecycleOrchestrator {
    /// Cancel a job in `RUN` or `KILL`. The job always ends in `EXIT`,
    /// also when the backend has already forgotten it.
    #[instrument(skip(self))]
    pub async fn kill_job(&self, job_id: &str) -> Result<JobDocument> {
        let mut job = self.store.get(job_id).await?;
        if !job.status().is_killable() {
            debug!(status = %job.status(), "Job is not running, nothing to kill");
            return Ok(job);
        }

        let server = self.server_for(&job)?;
        if server.dispatch_remotely {
            return self.dispatch_remote(job, RemoteOperation::Kill).await;
        }

        if job.status() == JobState::Run {
            Self::apply(&mut job, JobEvent::RequestKill)?;
            self.store.save(&mut job).await?;
        }

        match server.engine.kill(&job).await {
            Ok(report) => job.job_status.stat_text = Some(report.stat_text),
            // never reached the backend
            Err(ClusterpostError::Validation(message)) => debug!(reason = %message, "Skipping backend kill"),
            Err(e) => return Err(e),
        }

        Self::apply(&mut job, JobEvent::Killed)?;
        self.store.save(&mut job).await?;
        Self::record("kill", &job);
        Ok(job)
    }
}
