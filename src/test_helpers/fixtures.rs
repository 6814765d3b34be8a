// Job document and configuration fixtures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{ClusterpostConfig, EngineKind, ExecutionServerConfig};
use crate::models::{JobDocument, JobInput, JobOutput, OutputType, Parameter};
use crate::store::InMemoryDocumentStore;

use super::ScriptedCommandRunner;

/// A job in CREATE with one parameter and no staging declarations.
pub fn sample_job(id: &str, execution_server: &str) -> JobDocument {
    let mut job = JobDocument::new(id, "python", execution_server);
    job.name = Some(format!("{id}-name"));
    job.user_email = "jprieto@example.edu".to_string();
    job.parameters.push(Parameter::new("--input", "input.txt"));
    job
}

/// A job declaring `input.txt` as input and three outputs: a file, a
/// directory and the whole working directory as an archive.
pub fn job_with_staging(id: &str, execution_server: &str) -> JobDocument {
    let mut job = sample_job(id, execution_server);
    job.inputs.push(JobInput::named("input.txt"));
    job.outputs.push(JobOutput::new(OutputType::File, "result.txt"));
    job.outputs.push(JobOutput::new(OutputType::Directory, "plots"));
    job.outputs.push(JobOutput::new(OutputType::TarGz, "cwd"));
    job
}

/// Configuration with one server per engine kind, all local, rooted at
/// `storage_dir`.
pub fn local_config(storage_dir: &Path) -> ClusterpostConfig {
    let mut config = ClusterpostConfig::local(storage_dir);
    for (name, kind) in [
        ("lsf", EngineKind::Lsf),
        ("pbs", EngineKind::Pbs),
        ("slurm", EngineKind::Slurm),
        ("unix", EngineKind::Unix),
    ] {
        config
            .execution_servers
            .insert(name.to_string(), ExecutionServerConfig::new(kind));
    }
    config
}

/// An in-memory store and a scripted runner around a storage directory the
/// test owns (usually a `tempfile::TempDir`).
pub struct TestEnvironment {
    pub storage_dir: PathBuf,
    pub store: Arc<InMemoryDocumentStore>,
    pub runner: Arc<ScriptedCommandRunner>,
    pub config: ClusterpostConfig,
}

impl TestEnvironment {
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            storage_dir: storage_dir.to_path_buf(),
            store: Arc::new(InMemoryDocumentStore::new()),
            runner: Arc::new(ScriptedCommandRunner::new()),
            config: local_config(storage_dir),
        }
    }

    /// Working directory of job `id`.
    pub fn job_dir(&self, id: &str) -> PathBuf {
        self.storage_dir.join(id)
    }
}
