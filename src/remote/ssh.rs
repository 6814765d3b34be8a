//! Dispatch of lifecycle operations to a peer over ssh.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::ssh_coordinates;
use crate::config::ExecutionServerConfig;
use crate::engine::{CommandRequest, CommandRunner};
use crate::error::{ClusterpostError, Result};
use crate::models::JobDocument;
use crate::store::DocumentStore;

/// Lifecycle operation requested from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOperation {
    Submit { force: bool },
    Status,
    Kill,
    Delete,
}

impl RemoteOperation {
    /// Command line flags understood by `clusterpost-execution`.
    pub fn flags(&self) -> Vec<&'static str> {
        match self {
            Self::Submit { force: true } => vec!["--submit", "-f"],
            Self::Submit { force: false } => vec!["--submit"],
            Self::Status => vec!["--status"],
            Self::Kill => vec!["--kill"],
            Self::Delete => vec!["--delete"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "submit",
            Self::Status => "status",
            Self::Kill => "kill",
            Self::Delete => "delete",
        }
    }
}

#[derive(Clone)]
pub struct RemoteBridge {
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn DocumentStore>,
    remote_command: String,
}

impl std::fmt::Debug for RemoteBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBridge")
            .field("runner", &self.runner)
            .field("remote_command", &self.remote_command)
            .finish_non_exhaustive()
    }
}

impl RemoteBridge {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn DocumentStore>,
        remote_command: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            store,
            remote_command: remote_command.into(),
        }
    }

    /// `ssh -q -i <identity> user@host <source_dir>/<command> --job <id> <flags>`
    pub fn request(
        &self,
        server_name: &str,
        server: &ExecutionServerConfig,
        job_id: &str,
        operation: RemoteOperation,
    ) -> Result<CommandRequest> {
        let (destination, identity) = ssh_coordinates(server_name, server)?;
        let program = match server.source_dir.as_deref() {
            Some(dir) => Path::new(dir).join(&self.remote_command).display().to_string(),
            None => self.remote_command.clone(),
        };

        Ok(CommandRequest::new("ssh")
            .arg("-q")
            .arg("-i")
            .arg(identity.display().to_string())
            .arg(destination)
            .arg(program)
            .args(["--job", job_id])
            .args(operation.flags()))
    }

    /// Run the operation on the peer and re-read the document it updated.
    ///
    /// Success means exit code 0 and nothing on stderr. Returns `None` when
    /// the document no longer exists afterwards.
    #[instrument(skip(self, server), fields(operation = operation.as_str()))]
    pub async fn dispatch(
        &self,
        server_name: &str,
        server: &ExecutionServerConfig,
        job_id: &str,
        operation: RemoteOperation,
    ) -> Result<Option<JobDocument>> {
        let request = self.request(server_name, server, job_id, operation)?;
        debug!(command = %request, "Dispatching to peer");

        let output = self
            .runner
            .run(&request)
            .await
            .map_err(|e| ClusterpostError::remote(server_name, format!("ssh failed to start: {e}")))?;

        if !output.success() || !output.stderr.trim().is_empty() {
            let message = if output.stderr.trim().is_empty() {
                format!("ssh exited with code {:?}", output.code)
            } else {
                output.stderr.trim().to_string()
            };
            warn!(error = %message, "Peer reported failure");
            return Err(ClusterpostError::remote(server_name, message));
        }

        match self.store.get(job_id).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineKind;
    use crate::engine::CommandOutput;
    use crate::store::InMemoryDocumentStore;
    use crate::test_helpers::{sample_job, ScriptedCommandRunner};

    fn remote_server() -> ExecutionServerConfig {
        let mut server = ExecutionServerConfig::new(EngineKind::Slurm);
        server.remote = true;
        server.hostname = Some("killdevil.unc.edu".to_string());
        server.user = Some("jprieto".to_string());
        server.identity_file = Some("/home/jprieto/.ssh/id_rsa".into());
        server.source_dir = Some("/proj/clusterpost/bin".to_string());
        server
    }

    #[test]
    fn test_request_layout() {
        let bridge = RemoteBridge::new(
            Arc::new(ScriptedCommandRunner::new()),
            Arc::new(InMemoryDocumentStore::new()),
            "clusterpost-execution",
        );
        let request = bridge
            .request("killdevil", &remote_server(), "job-1", RemoteOperation::Submit { force: true })
            .unwrap();

        assert_eq!(request.program, "ssh");
        assert_eq!(
            request.args,
            vec![
                "-q",
                "-i",
                "/home/jprieto/.ssh/id_rsa",
                "jprieto@killdevil.unc.edu",
                "/proj/clusterpost/bin/clusterpost-execution",
                "--job",
                "job-1",
                "--submit",
                "-f",
            ]
        );
    }

    #[test]
    fn test_request_requires_coordinates() {
        let bridge = RemoteBridge::new(
            Arc::new(ScriptedCommandRunner::new()),
            Arc::new(InMemoryDocumentStore::new()),
            "clusterpost-execution",
        );
        let mut server = remote_server();
        server.identity_file = None;
        let err = bridge
            .request("killdevil", &server, "job-1", RemoteOperation::Status)
            .unwrap_err();
        assert!(matches!(err, ClusterpostError::Remote { .. }));
    }

    #[tokio::test]
    async fn test_dispatch_rereads_document() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let runner = Arc::new(ScriptedCommandRunner::new());
        let mut job = sample_job("job-2", "killdevil");
        store.save(&mut job).await.unwrap();

        let bridge = RemoteBridge::new(runner.clone(), store, "clusterpost-execution");
        let doc = bridge
            .dispatch("killdevil", &remote_server(), "job-2", RemoteOperation::Status)
            .await
            .unwrap();

        assert_eq!(doc.map(|d| d.id), Some("job-2".to_string()));
        assert_eq!(runner.calls_to("ssh").len(), 1);
    }

    #[tokio::test]
    async fn test_stderr_output_is_failure() {
        let runner = Arc::new(ScriptedCommandRunner::new());
        runner.on("ssh", CommandOutput::new(0, "", "Permission denied (publickey)."));
        let bridge = RemoteBridge::new(
            runner,
            Arc::new(InMemoryDocumentStore::new()),
            "clusterpost-execution",
        );

        let err = bridge
            .dispatch("killdevil", &remote_server(), "job-3", RemoteOperation::Kill)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_deleted_document_is_none() {
        let bridge = RemoteBridge::new(
            Arc::new(ScriptedCommandRunner::new()),
            Arc::new(InMemoryDocumentStore::new()),
            "clusterpost-execution",
        );
        let doc = bridge
            .dispatch("killdevil", &remote_server(), "job-4", RemoteOperation::Delete)
            .await
            .unwrap();
        assert!(doc.is_none());
    }
}
