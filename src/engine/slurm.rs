//! SLURM engine.
//!
//! Directives must live in the submitted script, so submission renders
//! `slurm_script.sh` in the working directory and hands it to `sbatch`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
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

pub const SCRIPT_FILE: &str = "slurm_script.sh";

const SUBMITTED_PREFIX: &str = "Submitted batch job ";

#[derive(Debug, Clone)]
pub struct SlurmEngine {
    runner: Arc<dyn CommandRunner>,
    hash_bang: String,
}

impl SlurmEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, hash_bang: impl Into<String>) -> Self {
        Self {
            runner,
            hash_bang: hash_bang.into(),
        }
    }

    /// Submission script: header, one `#SBATCH` line per backend parameter,
    /// working directory and log redirection, job name, then the command.
    pub fn render_script(&self, job: &JobDocument, cwd: &Path) -> String {
        let mut lines = vec![self.hash_bang.clone()];
        lines.extend(job.engine_parameters.iter().map(|p| {
            std::iter::once("#SBATCH")
                .chain(p.tokens())
                .collect::<Vec<_>>()
                .join(" ")
        }));
        lines.push(format!("#SBATCH -D {}", cwd.display()));
        lines.push(format!("#SBATCH -e {}", cwd.join(STDERR_FILE).display()));
        lines.push(format!("#SBATCH -o {}", cwd.join(STDOUT_FILE).display()));
        lines.push(format!("#SBATCH -J {}", job.user_email));
        lines.push(job.command_line().join(" "));

        let mut script = lines.join("\n");
        script.push('\n');
        script
    }

    pub fn script_path(cwd: &Path) -> PathBuf {
        cwd.join(SCRIPT_FILE)
    }
}

/// Job id from `sbatch` output: the integer after `Submitted batch job `.
pub fn parse_submission(stdout: &str) -> Option<u64> {
    let start = stdout.find(SUBMITTED_PREFIX)? + SUBMITTED_PREFIX.len();
    stdout[start..].split_whitespace().next()?.parse().ok()
}

/// Map a SLURM state code to a backend state.
pub fn map_state_code(code: &str) -> BackendState {
    match code {
        "R" | "PD" => BackendState::Run,
        "CD" | "CG" => BackendState::Done,
        "SE" | "CA" => BackendState::Exit,
        "F" | "NF" => BackendState::Fail,
        _ => BackendState::Done,
    }
}

/// Classify `squeue -h -j <id>` output.
///
/// The fifth whitespace separated field is the state code. Empty output
/// (job no longer known) and short lines mean DONE.
pub fn classify_status(output: &CommandOutput) -> StatusReport {
    let fields: Vec<&str> = output.stdout.split_whitespace().collect();
    if fields.is_empty() {
        return StatusReport {
            state: Some(BackendState::Done),
            ..StatusReport::default()
        };
    }
    let state = if fields.len() > 5 {
        map_state_code(fields[4])
    } else {
        BackendState::Done
    };
    StatusReport::new(state, output.stdout.clone())
}

#[async_trait]
impl ExecutionEngine for SlurmEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Slurm
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "slurm"))]
    async fn submit(&self, job: &JobDocument, cwd: &Path) -> Result<SubmitOutcome> {
        let script_path = Self::script_path(cwd);
        tokio::fs::write(&script_path, self.render_script(job, cwd)).await?;

        let request = CommandRequest::new("sbatch").arg(script_path.display().to_string());
        let output = match self.runner.run(&request).await {
            Ok(output) => output,
            Err(e) => return Ok(SubmitOutcome::failed(spawn_error(&request, &e))),
        };
        if !output.success() {
            return Ok(SubmitOutcome::failed(output.combined()));
        }

        match parse_submission(&output.stdout) {
            Some(backend_job_id) => {
                info!(backend_job_id, "Job submitted to SLURM");
                Ok(SubmitOutcome::Submitted {
                    backend_job_id,
                    stat_text: Some(output.stdout),
                })
            }
            None => Ok(SubmitOutcome::failed(format!(
                "unable to parse sbatch acknowledgement: {}",
                output.combined()
            ))),
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "slurm"))]
    async fn status(&self, job: &JobDocument) -> Result<StatusReport> {
        let backend_job_id = require_job_id(EngineKind::Slurm, job)?;
        let request = CommandRequest::new("squeue")
            .args(["-h", "-j"])
            .arg(backend_job_id.to_string());

        match self.runner.run(&request).await {
            Ok(output) => Ok(classify_status(&output)),
            Err(e) => Ok(StatusReport::unchanged(spawn_error(&request, &e))),
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "slurm"))]
    async fn kill(&self, job: &JobDocument) -> Result<KillReport> {
        let backend_job_id = require_job_id(EngineKind::Slurm, job)?;
        let request = CommandRequest::new("scancel").arg(backend_job_id.to_string());

        let stat_text = match self.runner.run(&request).await {
            Ok(output) => format!("{}{}", output.stderr, output.stdout),
            Err(e) => spawn_error(&request, &e),
        };
        Ok(KillReport { stat_text })
    }
}
