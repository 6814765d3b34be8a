//! PBS/Torque engine.
//!
//! Submission renders `script.pbs` with a `#PBS` preamble. Status comes from
//! `qstat -x`, which prints the job record as XML:
//!
//! ```xml
//! <Data><Job><Job_Id>4213.torque</Job_Id><job_state>R</job_state>...</Job></Data>
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::command::{CommandOutput, CommandRequest, CommandRunner};
use super::{
    require_job_id, spawn_error, BackendState, ExecutionEngine, KillReport, StatusReport,
    SubmitOutcome,
};
use crate::config::EngineKind;
use crate::constants::{STDERR_FILE, STDOUT_FILE};
use crate::error::Result;
use crate::models::{JobDocument, Parameter};

pub const SCRIPT_FILE: &str = "script.pbs";

const UNKNOWN_JOB: &str = "Unknown Job Id";

#[derive(Debug, Clone)]
pub struct PbsEngine {
    runner: Arc<dyn CommandRunner>,
    hash_bang: String,
}

#[derive(Debug, Deserialize)]
struct QstatData {
    #[serde(rename = "Job", default)]
    jobs: Vec<QstatJob>,
}

#[derive(Debug, Deserialize)]
struct QstatJob {
    #[serde(default)]
    job_state: Vec<String>,
}

impl PbsEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, hash_bang: impl Into<String>) -> Self {
        Self {
            runner,
            hash_bang: hash_bang.into(),
        }
    }

    /// Backend parameters followed by the fixed directives: export the
    /// environment, working directory, logs, mail recipient and job name.
    fn directives(job: &JobDocument, cwd: &Path) -> Vec<Parameter> {
        let job_name = job
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| job.user_email.clone());

        let mut directives = job.engine_parameters.clone();
        directives.extend([
            Parameter::new("-V", ""),
            Parameter::new("-d", cwd.display().to_string()),
            Parameter::new("-e", STDERR_FILE),
            Parameter::new("-o", STDOUT_FILE),
            Parameter::new("-M", job.user_email.clone()),
            Parameter::new("-N", job_name),
        ]);
        directives
    }

    pub fn render_script(&self, job: &JobDocument, cwd: &Path) -> String {
        let mut script = format!("{}\n####  PBS preamble\n", self.hash_bang);
        for directive in Self::directives(job, cwd) {
            let tokens: Vec<&str> = directive.tokens().collect();
            script.push_str("#PBS ");
            script.push_str(&tokens.join(" "));
            script.push('\n');
        }
        script.push_str("####  End PBS preamble\n");
        script.push_str("\nif [ -n \"$PBS_O_WORKDIR\" ]; then cd $PBS_O_WORKDIR; fi\n\n");
        script.push_str(&job.command_line().join(" "));
        script.push('\n');
        script
    }

    pub fn script_path(cwd: &Path) -> PathBuf {
        cwd.join(SCRIPT_FILE)
    }
}

/// Job id from `qsub` output: the leading dot separated field of
/// `4213.torque-server`.
pub fn parse_submission(stdout: &str) -> Option<u64> {
    stdout.trim().split('.').next()?.trim().parse().ok()
}

/// Classify `qstat -x` output.
///
/// "Unknown Job Id" (the job left the server's history) is DONE. A record
/// holding exactly one job is DONE when its state is `C` or `E`, RUN
/// otherwise. Anything else is FAIL.
pub fn classify_status(output: &CommandOutput) -> StatusReport {
    if output.stdout.contains(UNKNOWN_JOB) || output.stderr.contains(UNKNOWN_JOB) {
        return StatusReport::new(BackendState::Done, output.combined());
    }

    match quick_xml::de::from_str::<QstatData>(&output.stdout) {
        Ok(data) if data.jobs.len() == 1 => {
            let finished = data.jobs[0]
                .job_state
                .iter()
                .any(|state| matches!(state.trim(), "C" | "E"));
            let state = if finished {
                BackendState::Done
            } else {
                BackendState::Run
            };
            StatusReport::new(state, output.stdout.clone())
        }
        Ok(data) => StatusReport {
            stat_text: Some(output.stdout.clone()),
            ..StatusReport::failed(format!(
                "expected exactly one job in qstat output, found {}",
                data.jobs.len()
            ))
        },
        Err(e) => StatusReport {
            stat_text: Some(output.combined()),
            ..StatusReport::failed(format!("unable to parse qstat output: {e}"))
        },
    }
}

#[async_trait]
impl ExecutionEngine for PbsEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Pbs
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "pbs"))]
    async fn submit(&self, job: &JobDocument, cwd: &Path) -> Result<SubmitOutcome> {
        let script_path = Self::script_path(cwd);
        tokio::fs::write(&script_path, self.render_script(job, cwd)).await?;

        let request = CommandRequest::new("qsub").arg(script_path.display().to_string());
        let output = match self.runner.run(&request).await {
            Ok(output) => output,
            Err(e) => return Ok(SubmitOutcome::failed(spawn_error(&request, &e))),
        };
        if !output.success() {
            return Ok(SubmitOutcome::failed(output.combined()));
        }

        match parse_submission(&output.stdout) {
            Some(backend_job_id) => {
                info!(backend_job_id, "Job submitted to PBS");
                Ok(SubmitOutcome::Submitted {
                    backend_job_id,
                    stat_text: Some(output.stdout),
                })
            }
            None => {
                warn!(stdout = %output.stdout, "Unparsable qsub acknowledgement");
                Ok(SubmitOutcome::failed(format!(
                    "unable to parse qsub acknowledgement: {}",
                    output.combined()
                )))
            }
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "pbs"))]
    async fn status(&self, job: &JobDocument) -> Result<StatusReport> {
        let backend_job_id = require_job_id(EngineKind::Pbs, job)?;
        let request = CommandRequest::new("qstat")
            .arg("-x")
            .arg(backend_job_id.to_string());

        match self.runner.run(&request).await {
            Ok(output) => Ok(classify_status(&output)),
            Err(e) => Ok(StatusReport::unchanged(spawn_error(&request, &e))),
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, engine = "pbs"))]
    async fn kill(&self, job: &JobDocument) -> Result<KillReport> {
        let backend_job_id = require_job_id(EngineKind::Pbs, job)?;
        let request = CommandRequest::new("qdel").arg(backend_job_id.to_string());

        let stat_text = match self.runner.run(&request).await {
            Ok(output) => format!("{}{}", output.stderr, output.stdout),
            Err(e) => spawn_error(&request, &e),
        };
        Ok(KillReport { stat_text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_HASH_BANG;
    use crate::test_helpers::ScriptedCommandRunner;

    const RUNNING: &str = "<Data><Job><Job_Id>4213.torque</Job_Id><Job_Name>tract</Job_Name>\
        <job_state>R</job_state><queue>batch</queue></Job></Data>";
    const COMPLETED: &str = "<Data><Job><Job_Id>4213.torque</Job_Id>\
        <job_state>C</job_state><exit_status>0</exit_status></Job></Data>";

    #[test]
    fn test_parse_submission() {
        assert_eq!(parse_submission("4213.torque-server.example.edu\n"), Some(4213));
        assert_eq!(parse_submission("qsub: submit error"), None);
    }

    #[test]
    fn test_classify_qstat_xml() {
        let running = classify_status(&CommandOutput::new(0, RUNNING, ""));
        assert_eq!(running.state, Some(BackendState::Run));

        let completed = classify_status(&CommandOutput::new(0, COMPLETED, ""));
        assert_eq!(completed.state, Some(BackendState::Done));

        let exiting = classify_status(&CommandOutput::new(
            0,
            "<Data><Job><job_state>E</job_state></Job></Data>",
            "",
        ));
        assert_eq!(exiting.state, Some(BackendState::Done));
    }

    #[test]
    fn test_unknown_job_is_done() {
        let report = classify_status(&CommandOutput::new(
            153,
            "",
            "qstat: Unknown Job Id Error 4213.torque",
        ));
        assert_eq!(report.state, Some(BackendState::Done));
    }

    #[test]
    fn test_unexpected_shapes_fail() {
        let two = "<Data><Job><job_state>R</job_state></Job><Job><job_state>Q</job_state></Job></Data>";
        assert_eq!(
            classify_status(&CommandOutput::new(0, two, "")).state,
            Some(BackendState::Fail)
        );

        let garbage = classify_status(&CommandOutput::new(1, "", "qstat: cannot connect"));
        assert_eq!(garbage.state, Some(BackendState::Fail));
        assert!(garbage.error.is_some());
    }

    #[test]
    fn test_render_script() {
        let engine = PbsEngine::new(Arc::new(ScriptedCommandRunner::new()), DEFAULT_HASH_BANG);
        let mut job = JobDocument::new("j3", "python", "torque");
        job.user_email = "jprieto@example.edu".to_string();
        job.name = Some("tractography".to_string());
        job.parameters.push(Parameter::new("-i", "dwi.nrrd"));
        job.engine_parameters.push(Parameter::new("-l", "walltime=01:00:00"));

        assert_eq!(
            engine.render_script(&job, Path::new("/scratch/j3")),
            "#!/bin/bash\n\
             ####  PBS preamble\n\
             #PBS -l walltime=01:00:00\n\
             #PBS -V\n\
             #PBS -d /scratch/j3\n\
             #PBS -e stderr.err\n\
             #PBS -o stdout.out\n\
             #PBS -M jprieto@example.edu\n\
             #PBS -N tractography\n\
             ####  End PBS preamble\n\
             \n\
             if [ -n \"$PBS_O_WORKDIR\" ]; then cd $PBS_O_WORKDIR; fi\n\
             \n\
             python -i dwi.nrrd\n"
        );
    }

    #[test]
    fn test_job_name_defaults_to_email() {
        let engine = PbsEngine::new(Arc::new(ScriptedCommandRunner::new()), DEFAULT_HASH_BANG);
        let mut job = JobDocument::new("j3", "true", "torque");
        job.user_email = "someone@example.edu".to_string();
        let script = engine.render_script(&job, Path::new("/tmp/j3"));
        assert!(script.contains("#PBS -N someone@example.edu\n"));
    }

    #[tokio::test]
    async fn test_submit_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());
        runner.on("qsub", CommandOutput::new(0, "4213.torque\n", ""));
        runner.on("qstat", CommandOutput::new(0, COMPLETED, ""));
        let engine = PbsEngine::new(runner.clone(), DEFAULT_HASH_BANG);

        let mut job = JobDocument::new("j3", "true", "torque");
        let outcome = engine.submit(&job, dir.path()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Submitted { backend_job_id: 4213, .. }));
        assert!(dir.path().join(SCRIPT_FILE).exists());

        job.job_status.backend_job_id = Some(4213);
        assert_eq!(
            engine.status(&job).await.unwrap().state,
            Some(BackendState::Done)
        );
        assert_eq!(runner.calls_to("qstat")[0].command_line(), "qstat -x 4213");
    }
}
