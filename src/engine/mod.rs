//! # Execution Engines
//!
//! One contract over four batch backends with incompatible CLIs:
//!
//! | Engine | submit | status | kill |
//! |---|---|---|---|
//! | LSF | `bsub ... <executable>` | `bjobs -J <email> <id>` | `bkill -J <email> <id>` |
//! | PBS | `qsub script.pbs` | `qstat -x <id>` (XML) | `qdel <id>` |
//! | SLURM | `sbatch slurm_script.sh` | `squeue -h -j <id>` | `scancel <id>` |
//! | Unix | spawn `<executable>` | `ps <pid>` | `kill <pid>` |
//!
//! Engines only spawn backend commands and touch files inside the job's
//! working directory; they never write to the document store. Backend
//! failures come back as values ([`SubmitOutcome::Failed`],
//! [`StatusReport::state`] = `Fail`) so the caller can record them in the
//! document. `Err` is reserved for invalid requests and working directory I/O.
//!
//! The backend is chosen once, when configuration is turned into an
//! [`Engine`], by matching on [`EngineKind`].

pub mod command;
pub mod lsf;
pub mod pbs;
pub mod registry;
pub mod slurm;
pub mod unix;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::{EngineKind, ExecutionServerConfig};
use crate::error::{ClusterpostError, Result};
use crate::models::JobDocument;

pub use command::{CommandOutput, CommandRequest, CommandRunner, SystemCommandRunner};
pub use lsf::LsfEngine;
pub use pbs::PbsEngine;
pub use registry::{ExecutionServer, ExecutionServers};
pub use slurm::SlurmEngine;
pub use unix::UnixEngine;

/// Normalized backend verdict on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackendState {
    Run,
    Done,
    Exit,
    Fail,
}

impl BackendState {
    /// DONE and EXIT both mean the backend is finished with the job and its
    /// outputs should be published.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Exit)
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "RUN"),
            Self::Done => write!(f, "DONE"),
            Self::Exit => write!(f, "EXIT"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// Result of a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the backend; the job is running.
    Submitted {
        backend_job_id: u64,
        stat_text: Option<String>,
    },
    /// Ran to completion synchronously (Unix engine, not detached).
    Completed { stat_text: Option<String> },
    /// Rejected, or the acknowledgement could not be parsed.
    Failed { error: String },
}

impl SubmitOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }
}

/// Result of a status query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// `None` leaves the job's status unchanged.
    pub state: Option<BackendState>,
    pub stat_text: Option<String>,
    pub error: Option<String>,
    /// Set when the id had to be recovered from earlier status text.
    pub backend_job_id: Option<u64>,
}

impl StatusReport {
    pub fn new(state: BackendState, stat_text: impl Into<String>) -> Self {
        Self {
            state: Some(state),
            stat_text: Some(stat_text.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: Some(BackendState::Fail),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Status left untouched, error recorded.
    pub fn unchanged(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Result of a kill. The state is always EXIT: killing a job the backend has
/// already forgotten is not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillReport {
    pub stat_text: String,
}

impl KillReport {
    pub fn state(&self) -> BackendState {
        BackendState::Exit
    }
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    async fn submit(&self, job: &JobDocument, cwd: &Path) -> Result<SubmitOutcome>;

    async fn status(&self, job: &JobDocument) -> Result<StatusReport>;

    async fn kill(&self, job: &JobDocument) -> Result<KillReport>;
}

/// Closed set of engines, resolved from configuration.
#[derive(Debug, Clone)]
pub enum Engine {
    Lsf(LsfEngine),
    Pbs(PbsEngine),
    Slurm(SlurmEngine),
    Unix(UnixEngine),
}

impl Engine {
    pub fn from_config(server: &ExecutionServerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        match server.engine {
            EngineKind::Lsf => Self::Lsf(LsfEngine::new(runner)),
            EngineKind::Pbs => Self::Pbs(PbsEngine::new(runner, server.hash_bang())),
            EngineKind::Slurm => Self::Slurm(SlurmEngine::new(runner, server.hash_bang())),
            EngineKind::Unix => Self::Unix(UnixEngine::new(runner, server.detached)),
        }
    }

    fn inner(&self) -> &dyn ExecutionEngine {
        match self {
            Self::Lsf(engine) => engine,
            Self::Pbs(engine) => engine,
            Self::Slurm(engine) => engine,
            Self::Unix(engine) => engine,
        }
    }
}

#[async_trait]
impl ExecutionEngine for Engine {
    fn kind(&self) -> EngineKind {
        self.inner().kind()
    }

    async fn submit(&self, job: &JobDocument, cwd: &Path) -> Result<SubmitOutcome> {
        self.inner().submit(job, cwd).await
    }

    async fn status(&self, job: &JobDocument) -> Result<StatusReport> {
        self.inner().status(job).await
    }

    async fn kill(&self, job: &JobDocument) -> Result<KillReport> {
        self.inner().kill(job).await
    }
}

/// The backend id a status or kill call needs.
pub(crate) fn require_job_id(engine: EngineKind, job: &JobDocument) -> Result<u64> {
    job.job_status.backend_job_id.ok_or_else(|| {
        ClusterpostError::Validation(format!(
            "{engine} job {} has no backend job id",
            job.id
        ))
    })
}

/// Backend parameter tokens (`jobparameters`) in order.
pub(crate) fn engine_parameter_tokens(job: &JobDocument) -> impl Iterator<Item = String> + '_ {
    job.engine_parameters
        .iter()
        .flat_map(|p| p.tokens())
        .map(str::to_string)
}

/// Message recorded when a backend command could not be started at all.
pub(crate) fn spawn_error(request: &CommandRequest, error: &std::io::Error) -> String {
    format!("failed to run `{}`: {error}", request.program)
}
