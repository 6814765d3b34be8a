//! Local process engine.
//!
//! Runs the job's executable directly on this host. Detached jobs are
//! tracked by pid; with `detached: false` the call waits for the process and
//! the job goes straight to output publishing.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use super::command::{CommandOutput, CommandRequest, CommandRunner};
use super::{
    require_job_id, spawn_error, BackendState, ExecutionEngine, KillReport, StatusReport,
    SubmitOutcome,
};
use crate::config::EngineKind;
use crate::constants::{STDERR_FILE, STDOUT_FILE};
use crate::error::Result;
use crate::models::JobDocument;

pub const PID_MISMATCH: &str = "The jobid does not match the running program";

#[derive(Debug, Clone)]
pub struct UnixEngine {
    runner: Arc<dyn CommandRunner>,
    detached: bool,
}

impl UnixEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, detached: bool) -> Self {
        Self { runner, detached }
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    fn job_request(job: &JobDocument, cwd: &Path) -> CommandRequest {
        let mut command_line = job.command_line().into_iter();
        let program = command_line.next().unwrap_or_default();
        CommandRequest::new(program)
            .args(command_line)
            .current_dir(cwd)
            .redirect(cwd.join(STDOUT_FILE), cwd.join(STDERR_FILE))
    }
}

/// Classify `ps <pid>` output against the executable the job was started
/// with.
pub fn classify_status(output: &CommandOutput, executable: &str) -> StatusReport {
    let lines: Vec<&str> = output.stdout.split('\n').collect();
    if lines.len() < 2 {
        return StatusReport::failed(output.stderr.clone());
    }

    let process_line = lines[1];
    if !output.success() && process_line.trim().is_empty() {
        return StatusReport {
            state: Some(BackendState::Done),
            ..StatusReport::default()
        };
    }
    if !process_line.contains(executable) {
        return StatusReport::failed(PID_MISMATCH);
    }
    StatusReport::new(BackendState::Run, process_line)
}

#[async_trait]
impl ExecutionEngine for UnixEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Unix
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "unix", detached = self.detached))]
    async fn submit(&self, job: &JobDocument, cwd: &Path) -> Result<SubmitOutcome> {
        let request = Self::job_request(job, cwd);
        tokio::fs::write(cwd.join(STDOUT_FILE), format!("{}\n", request.command_line())).await?;

        if self.detached {
            return match self.runner.spawn_detached(&request).await {
                Ok(pid) => {
                    info!(pid, "Started detached process");
                    Ok(SubmitOutcome::Submitted {
                        backend_job_id: u64::from(pid),
                        stat_text: None,
                    })
                }
                Err(e) => Ok(SubmitOutcome::failed(spawn_error(&request, &e))),
            };
        }

        match self.runner.run(&request).await {
            Ok(output) if output.success() => Ok(SubmitOutcome::Completed { stat_text: None }),
            Ok(output) => Ok(SubmitOutcome::failed(match output.code {
                Some(code) => format!("{} exited with code {code}", request.program),
                None => format!("{} was terminated by a signal", request.program),
            })),
            Err(e) => Ok(SubmitOutcome::failed(spawn_error(&request, &e))),
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "unix"))]
    async fn status(&self, job: &JobDocument) -> Result<StatusReport> {
        let pid = require_job_id(EngineKind::Unix, job)?;
        let request = CommandRequest::new("ps").arg(pid.to_string());

        match self.runner.run(&request).await {
            Ok(output) => Ok(classify_status(&output, &job.executable)),
            Err(e) => Ok(StatusReport::unchanged(spawn_error(&request, &e))),
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "unix"))]
    async fn kill(&self, job: &JobDocument) -> Result<KillReport> {
        let pid = require_job_id(EngineKind::Unix, job)?;
        let request = CommandRequest::new("kill").arg(pid.to_string());

        let stat_text = match self.runner.run(&request).await {
            Ok(output) if output.success() => output.stdout,
            Ok(output) => format!("{}{}", output.stdout, output.stderr),
            Err(e) => spawn_error(&request, &e),
        };
        Ok(KillReport { stat_text })
    }
}
