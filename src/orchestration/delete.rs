//! Delete handler.

use tracing::{debug, info, instrument, warn};

use super::LifecycleOrchestrator;
use crate::engine::{BackendState, Engine, ExecutionEngine};
use crate::error::Result;
use crate::models::JobDocument;
use crate::remote::RemoteOperation;
use crate::state_machine::JobState;

impl LifecycleOrchestrator {
    /// Kill the backend job if it is still alive, remove the working
    /// directory and its archive, then delete the document. A document that
    /// is already gone counts as deleted.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                debug!("Document already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match self.server_for(&job) {
            Ok(server) if server.dispatch_remotely => {
                self.bridge
                    .dispatch(&server.name, &server.config, &job.id, RemoteOperation::Delete)
                    .await?;
            }
            Ok(server) => {
                if Self::still_running(&server.engine, &job).await {
                    if let Err(e) = server.engine.kill(&job).await {
                        debug!(error = %e, "Backend kill before delete failed");
                    }
                }
                let removed = self.stager_for(server).remove_working_dir(&job.id).await?;
                debug!(removed, "Working directory removed");
            }
            Err(e) => warn!(error = %e, "Deleting job of an unknown execution server"),
        }

        match self.store.delete(&job.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("Document deleted concurrently"),
            Err(e) => return Err(e),
        }

        info!(execution_server = %job.execution_server, "Job deleted");
        Self::record("delete", &job);
        Ok(())
    }

    /// Only a job the backend still reports as running gets killed. A
    /// finished job's id may have been reused, a unix pid in particular.
    async fn still_running(engine: &Engine, job: &JobDocument) -> bool {
        if job.job_status.backend_job_id.is_none()
            || matches!(job.status(), JobState::Done | JobState::Exit | JobState::Fail)
        {
            return false;
        }
        match engine.status(job).await {
            Ok(report) => report.state == Some(BackendState::Run),
            Err(e) => {
                debug!(error = %e, "Backend status before delete failed");
                false
            }
        }
    }
}
