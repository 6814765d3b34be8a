//! Submit handler.

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::LifecycleOrchestrator;
use crate::constants::INPUTS_PENDING_ERROR;
use crate::engine::{ExecutionEngine, SubmitOutcome};
use crate::error::{ClusterpostError, Result};
use crate::models::JobDocument;
use crate::remote::RemoteOperation;
use crate::state_machine::{JobEvent, JobState};

impl LifecycleOrchestrator {
    /// Stage the inputs and hand the job to its backend.
    ///
    /// Jobs outside `CREATE`, `QUEUE` and `DOWNLOADING` only get a status
    /// refresh, unless `force` is set: then the upload bookkeeping is
    /// cleared and the job is submitted again.
    #[instrument(skip(self), fields(execution_server))]
    pub async fn submit_job(&self, job_id: &str, force: bool) -> Result<JobDocument> {
        let mut job = self.store.get(job_id).await?;
        tracing::Span::current().record("execution_server", job.execution_server.as_str());

        if !job.status().is_submittable() {
            if !force {
                return self.refresh_status(job_id).await;
            }
            info!(from = %job.status(), "Forced resubmission");
            job.job_status.upload_status.clear();
            Self::apply(&mut job, JobEvent::Resubmit)?;
        }

        let server = self.server_for(&job)?;
        if server.dispatch_remotely {
            return self
                .dispatch_remote(job, RemoteOperation::Submit { force })
                .await;
        }

        let stager = self.stager_for(server);
        let cwd = stager.create_working_dir(&job.id).await?;

        job.job_status.download_status = stager.fetch_inputs(&job, &cwd).await;
        if job.job_status.download_status.iter().any(|status| !status.ok) {
            Self::apply(&mut job, JobEvent::InputsPending)?;
            job.job_status.error = Some(INPUTS_PENDING_ERROR.to_string());
            self.store.save(&mut job).await?;
            Self::record("submit", &job);
            return Ok(job);
        }

        job.timestamp_start = Some(Utc::now());
        match server.engine.submit(&job, &cwd).await? {
            SubmitOutcome::Submitted {
                backend_job_id,
                stat_text,
            } => {
                Self::apply(&mut job, JobEvent::Submitted)?;
                job.job_status.backend_job_id = Some(backend_job_id);
                job.job_status.stat_text = stat_text;
                job.job_status.error = None;
            }
            SubmitOutcome::Completed { stat_text } => {
                Self::apply(&mut job, JobEvent::Finished)?;
                job.job_status.stat_text = stat_text;
                job.job_status.error = None;
            }
            SubmitOutcome::Failed { error } => {
                warn!(error = %error, "Backend rejected the job");
                Self::apply(&mut job, JobEvent::Fail(error.clone()))?;
                job.job_status.error = Some(error);
            }
        }
        self.store.save(&mut job).await?;
        Self::record("submit", &job);

        if job.status() == JobState::Uploading {
            return self.finish_uploads(job).await;
        }
        Ok(job)
    }

    /// Run the operation on the peer. A connectivity failure is recorded as
    /// the outcome of this attempt: a failed submission, or an error note on
    /// the other operations.
    pub(super) async fn dispatch_remote(
        &self,
        mut job: JobDocument,
        operation: RemoteOperation,
    ) -> Result<JobDocument> {
        let server = self.server_for(&job)?;
        match self
            .bridge
            .dispatch(&server.name, &server.config, &job.id, operation)
            .await
        {
            Ok(Some(updated)) => {
                Self::record(operation.as_str(), &updated);
                Ok(updated)
            }
            Ok(None) => Err(ClusterpostError::not_found(&job.id)),
            Err(ClusterpostError::Remote { message, .. }) => {
                if let RemoteOperation::Submit { .. } = operation {
                    Self::apply(&mut job, JobEvent::Fail(message.clone()))?;
                }
                job.job_status.error = Some(message);
                self.store.save(&mut job).await?;
                Self::record(operation.as_str(), &job);
                Ok(job)
            }
            Err(e) => Err(e),
        }
    }
}
