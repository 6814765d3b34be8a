//! IBM Spectrum LSF engine.
//!
//! Parameters are passed to `bsub` as argv. The job is named after the
//! submitting user's email so `bjobs -J`/`bkill -J` can find it.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::command::{CommandOutput, CommandRequest, CommandRunner};
use super::{
    engine_parameter_tokens, spawn_error, BackendState, ExecutionEngine, KillReport,
    StatusReport, SubmitOutcome,
};
use crate::config::EngineKind;
use crate::constants::{STDERR_FILE, STDOUT_FILE};
use crate::error::{ClusterpostError, Result};
use crate::models::JobDocument;

#[derive(Debug, Clone)]
pub struct LsfEngine {
    runner: Arc<dyn CommandRunner>,
}

impl LsfEngine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn submit_request(job: &JobDocument, cwd: &Path) -> CommandRequest {
        let cwd_str = cwd.display().to_string();
        CommandRequest::new("bsub")
            .args(engine_parameter_tokens(job))
            .args(["-cwd".to_string(), cwd_str])
            .args([
                "-e".to_string(),
                cwd.join(STDERR_FILE).display().to_string(),
                "-o".to_string(),
                cwd.join(STDOUT_FILE).display().to_string(),
            ])
            .args(["-u", job.user_email.as_str(), "-J", job.user_email.as_str()])
            .args(job.command_line())
    }
}

/// Job id from a `bsub` acknowledgement: the integer between the first `<`
/// and the following `>`.
///
/// `Job <898104> is submitted to default queue <day>.` yields `898104`.
pub fn parse_submission(stdout: &str) -> Option<u64> {
    let start = stdout.find('<')? + 1;
    let end = start + stdout[start..].find('>')?;
    stdout[start..end].trim().parse().ok()
}

/// Job id from the first field of the second line of earlier `bjobs` output.
pub fn recover_job_id(stat_text: &str) -> Option<u64> {
    stat_text
        .lines()
        .nth(1)?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Classify `bjobs` output.
///
/// `DONE` anywhere in stdout, or `is not found` in stderr (the job was purged
/// from the scheduler's history), means DONE. `EXIT` means EXIT. Any other
/// error output is ambiguous and leaves the status unchanged.
pub fn classify_status(output: &CommandOutput) -> StatusReport {
    if output.stdout.contains("DONE") || output.stderr.contains("is not found") {
        return StatusReport::new(BackendState::Done, output.stdout.clone());
    }
    if output.stdout.contains("EXIT") {
        return StatusReport::new(BackendState::Exit, output.stdout.clone());
    }
    if !output.success() || !output.stderr.trim().is_empty() {
        return StatusReport::unchanged(output.combined());
    }
    StatusReport::new(BackendState::Run, output.stdout.clone())
}

#[async_trait]
impl ExecutionEngine for LsfEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Lsf
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "lsf"))]
    async fn submit(&self, job: &JobDocument, cwd: &Path) -> Result<SubmitOutcome> {
        let request = Self::submit_request(job, cwd);
        let output = match self.runner.run(&request).await {
            Ok(output) => output,
            Err(e) => return Ok(SubmitOutcome::failed(spawn_error(&request, &e))),
        };

        if !output.success() {
            return Ok(SubmitOutcome::failed(output.combined()));
        }

        match parse_submission(&output.stdout) {
            Some(backend_job_id) => {
                info!(backend_job_id, "Job submitted to LSF");
                Ok(SubmitOutcome::Submitted {
                    backend_job_id,
                    stat_text: Some(output.stdout),
                })
            }
            None => Ok(SubmitOutcome::failed(format!(
                "unable to parse bsub acknowledgement: {}",
                output.combined()
            ))),
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "lsf"))]
    async fn status(&self, job: &JobDocument) -> Result<StatusReport> {
        let status = &job.job_status;
        let recovered = match status.backend_job_id {
            Some(_) => None,
            None => status.stat_text.as_deref().and_then(recover_job_id),
        };
        let backend_job_id = status.backend_job_id.or(recovered).ok_or_else(|| {
            ClusterpostError::Validation(format!("lsf job {} has no backend job id", job.id))
        })?;

        let request = CommandRequest::new("bjobs")
            .args(["-J", job.user_email.as_str()])
            .arg(backend_job_id.to_string());
        let output = match self.runner.run(&request).await {
            Ok(output) => output,
            Err(e) => return Ok(StatusReport::unchanged(spawn_error(&request, &e))),
        };

        let mut report = classify_status(&output);
        if recovered.is_some() {
            debug!(backend_job_id, "Recovered LSF job id from earlier status text");
            report.backend_job_id = recovered;
        }
        Ok(report)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "lsf"))]
    async fn kill(&self, job: &JobDocument) -> Result<KillReport> {
        let backend_job_id = super::require_job_id(EngineKind::Lsf, job)?;
        let request = CommandRequest::new("bkill")
            .args(["-J", job.user_email.as_str()])
            .arg(backend_job_id.to_string());

        let stat_text = match self.runner.run(&request).await {
            Ok(output) => format!("{}{}", output.stderr, output.stdout),
            Err(e) => spawn_error(&request, &e),
        };
        Ok(KillReport { stat_text })
    }
}
