//! Status handler and output publication.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::LifecycleOrchestrator;
use crate::engine::{BackendState, ExecutionEngine, StatusReport};
use crate::error::{ClusterpostError, Result};
use crate::models::JobDocument;
use crate::remote::RemoteOperation;
use crate::state_machine::{JobEvent, JobState};

impl LifecycleOrchestrator {
    /// Ask the backend about a running job, or retry the uploads of a job
    /// in `UPLOADING`. Other states are returned unchanged.
    #[instrument(skip(self))]
    pub async fn refresh_status(&self, job_id: &str) -> Result<JobDocument> {
        let job = self.store.get(job_id).await?;

        match job.status() {
            JobState::Run | JobState::Uploading => {}
            other => {
                debug!(status = %other, "Nothing to refresh");
                return Ok(job);
            }
        }

        let server = self.server_for(&job)?;
        if server.dispatch_remotely {
            return self.dispatch_remote(job, RemoteOperation::Status).await;
        }
        if job.status() == JobState::Uploading {
            return self.finish_uploads(job).await;
        }

        let report = match server.engine.status(&job).await {
            Ok(report) => report,
            // nothing to ask the backend about
            Err(ClusterpostError::Validation(message)) => StatusReport::failed(message),
            Err(e) => return Err(e),
        };
        self.apply_status_report(job, report).await
    }

    async fn apply_status_report(
        &self,
        mut job: JobDocument,
        report: StatusReport,
    ) -> Result<JobDocument> {
        if let Some(recovered) = report.backend_job_id {
            job.job_status.backend_job_id = Some(recovered);
        }
        if report.stat_text.is_some() {
            job.job_status.stat_text = report.stat_text;
        }
        job.job_status.error = report.error;

        match report.state {
            Some(state) if state.is_finished() => {
                info!(backend_state = ?state, "Backend finished, publishing outputs");
                Self::apply(&mut job, JobEvent::Finished)?;
                self.store.save(&mut job).await?;
                Self::record("status", &job);
                return self.finish_uploads(job).await;
            }
            Some(BackendState::Fail) => {
                let error = job
                    .job_status
                    .error
                    .clone()
                    .unwrap_or_else(|| "backend reported failure".to_string());
                Self::apply(&mut job, JobEvent::Fail(error))?;
            }
            Some(_) => {
                Self::apply(&mut job, JobEvent::Progress)?;
            }
            None => {
                warn!(error = ?job.job_status.error, "Ambiguous backend status, keeping state");
            }
        }

        self.store.save(&mut job).await?;
        Self::record("status", &job);
        Ok(job)
    }

    /// Publish the outputs not yet published, then settle the job in `DONE`
    /// when all of them are attached and `FAIL` otherwise.
    pub(super) async fn finish_uploads(&self, job: JobDocument) -> Result<JobDocument> {
        let server = self.server_for(&job)?;
        let stager = self.stager_for(server);
        let cwd = stager.working_dir(&job.id);
        let uploads = stager.publish_outputs(&job, &cwd).await;

        // attachments bumped the revision
        let mut latest = self.store.get(&job.id).await?;
        if latest.status() != JobState::Uploading {
            warn!(job_id = %job.id, status = %latest.status(), "Job left UPLOADING while publishing");
            return Ok(latest);
        }

        let complete = uploads.iter().all(|status| status.ok);
        latest.job_status.upload_status = uploads;
        if complete {
            Self::apply(&mut latest, JobEvent::UploadsComplete)?;
        } else {
            Self::apply(&mut latest, JobEvent::UploadsFailed)?;
            latest.job_status.error = Some("one or more outputs could not be published".to_string());
        }
        latest.timestamp_end = Some(Utc::now());

        self.store.save(&mut latest).await?;
        Self::record("upload", &latest);
        Ok(latest)
    }
}
