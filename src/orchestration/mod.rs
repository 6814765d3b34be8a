//! # Lifecycle Orchestrator
//!
//! The submit, status, kill and delete handlers. Each one loads the job
//! document, decides the next state with [`transition`], calls the
//! [`DataStager`] and either the job's local [`Engine`] or the
//! [`RemoteBridge`], and writes the document back carrying the revision it
//! read. A revision conflict is returned to the caller as is.
//!
//! [`JobRequests`] holds the request side: marking a document and putting
//! its id on the right queue.
//!
//! [`Engine`]: crate::engine::Engine

mod delete;
mod kill;
pub mod requests;
mod status;
mod submit;

pub use requests::JobRequests;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::ClusterpostConfig;
use crate::engine::{CommandRunner, ExecutionServer, ExecutionServers};
use crate::error::Result;
use crate::logging::log_job_operation;
use crate::models::JobDocument;
use crate::queue::LifecycleHandler;
use crate::remote::RemoteBridge;
use crate::staging::DataStager;
use crate::state_machine::{transition, JobEvent, JobState};
use crate::store::DocumentStore;

pub struct LifecycleOrchestrator {
    store: Arc<dyn DocumentStore>,
    servers: ExecutionServers,
    bridge: RemoteBridge,
}

impl std::fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("servers", &self.servers)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl LifecycleOrchestrator {
    pub fn new(
        config: &ClusterpostConfig,
        store: Arc<dyn DocumentStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            servers: ExecutionServers::from_config(config, runner.clone()),
            bridge: RemoteBridge::new(runner, store.clone(), config.remote_command.clone()),
            store,
        }
    }

    pub fn servers(&self) -> &ExecutionServers {
        &self.servers
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn server_for(&self, job: &JobDocument) -> Result<&ExecutionServer> {
        self.servers.get(&job.execution_server)
    }

    fn stager_for(&self, server: &ExecutionServer) -> DataStager {
        DataStager::new(self.store.clone(), server.storage_dir.clone())
    }

    /// Apply `event` to the job's status in place.
    fn apply(job: &mut JobDocument, event: JobEvent) -> Result<JobState> {
        let from = job.status();
        let to = transition(from, &event)?;
        if from != to {
            debug!(
                job_id = %job.id,
                from = %from,
                to = %to,
                event = event.event_type(),
                "Job state transition"
            );
        }
        job.job_status.status = to;
        Ok(to)
    }

    fn record(operation: &str, job: &JobDocument) {
        log_job_operation(
            operation,
            &job.id,
            Some(job.execution_server.as_str()),
            job.status().as_str(),
            job.job_status.error.as_deref(),
        );
    }
}

#[async_trait]
impl LifecycleHandler for LifecycleOrchestrator {
    async fn submit(&self, job_id: &str, force: bool) -> Result<()> {
        self.submit_job(job_id, force).await.map(|_| ())
    }

    async fn status(&self, job_id: &str) -> Result<()> {
        self.refresh_status(job_id).await.map(|_| ())
    }

    async fn kill(&self, job_id: &str) -> Result<()> {
        self.kill_job(job_id).await.map(|_| ())
    }

    async fn delete(&self, job_id: &str) -> Result<()> {
        self.delete_job(job_id).await
    }
}
