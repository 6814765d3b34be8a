//! # Data Stager
//!
//! Moves artifacts between the document store and a job's working directory
//! `<storage_dir>/<job id>`:
//!
//! - before submission, declared inputs are fetched from the job document's
//!   attachments
//! - after the backend finishes, declared outputs are attached back to the
//!   document: single files, every file of a directory, or a `tar.gz` of a
//!   subtree (the whole working directory for the name `cwd`)
//!
//! Transfers run one at a time. Each artifact gets its own
//! [`TransferStatus`]; a failure is recorded, never raised, and artifacts
//! already transferred are skipped on the next attempt.

pub mod archive;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::constants::{ARCHIVE_SUFFIX, CWD_MARKER};
use crate::error::{ClusterpostError, Result};
use crate::models::{JobDocument, JobInput, JobOutput, OutputType, TransferStatus};
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct DataStager {
    store: Arc<dyn DocumentStore>,
    storage_dir: PathBuf,
}

impl std::fmt::Debug for DataStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStager")
            .field("storage_dir", &self.storage_dir)
            .finish_non_exhaustive()
    }
}

impl DataStager {
    pub fn new(store: Arc<dyn DocumentStore>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            storage_dir: storage_dir.into(),
        }
    }

    pub fn working_dir(&self, job_id: &str) -> PathBuf {
        self.storage_dir.join(job_id)
    }

    fn archive_path(&self, job_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{job_id}{ARCHIVE_SUFFIX}"))
    }

    /// Create the job's working directory; an existing one is reused.
    pub async fn create_working_dir(&self, job_id: &str) -> Result<PathBuf> {
        let cwd = self.working_dir(job_id);
        tokio::fs::create_dir_all(&cwd).await?;
        Ok(cwd)
    }

    /// Remove the working directory and its sibling archive. Returns whether
    /// anything existed.
    #[instrument(skip(self))]
    pub async fn remove_working_dir(&self, job_id: &str) -> Result<bool> {
        let mut removed = false;

        match tokio::fs::remove_dir_all(self.working_dir(job_id)).await {
            Ok(()) => removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_file(self.archive_path(job_id)).await {
            Ok(()) => removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!(removed, "Working directory cleanup finished");
        Ok(removed)
    }

    /// Fetch every input not already present. The result is index-aligned
    /// with `job.inputs`.
    #[instrument(skip(self, job, cwd), fields(job_id = %job.id, inputs = job.inputs.len()))]
    pub async fn fetch_inputs(&self, job: &JobDocument, cwd: &Path) -> Vec<TransferStatus> {
        let previous = &job.job_status.download_status;
        let mut results = Vec::with_capacity(job.inputs.len());

        for (index, input) in job.inputs.iter().enumerate() {
            let destination = cwd.join(&input.name);
            if let Some(done) = previous.get(index).filter(|status| status.ok) {
                if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
                    results.push(done.clone());
                    continue;
                }
            }
            results.push(self.fetch_input(job, input, &destination).await);
        }

        let fetched = results.iter().filter(|status| status.ok).count();
        info!(fetched, total = results.len(), "Input staging finished");
        results
    }

    async fn fetch_input(
        &self,
        job: &JobDocument,
        input: &JobInput,
        destination: &Path,
    ) -> TransferStatus {
        if !job.has_attachment(&input.name) && input.remote.is_none() && input.local.is_none() {
            return TransferStatus::failure(
                &input.name,
                format!("Document is missing attachment {}", input.name),
            );
        }

        let transfer = async {
            let data = self.store.get_attachment(&job.id, &input.name).await?;
            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(destination, data).await?;
            Ok::<_, ClusterpostError>(())
        };

        match transfer.await {
            Ok(()) => TransferStatus::success(&input.name)
                .with_path(destination.display().to_string()),
            Err(e) => {
                warn!(input = %input.name, error = %e, "Failed to fetch input");
                TransferStatus::failure(&input.name, e.to_string())
            }
        }
    }

    /// Publish every output not already published. The result is
    /// index-aligned with `job.outputs`; calling it again after a partial
    /// failure only retries the failed outputs.
    #[instrument(skip(self, job, cwd), fields(job_id = %job.id, outputs = job.outputs.len()))]
    pub async fn publish_outputs(&self, job: &JobDocument, cwd: &Path) -> Vec<TransferStatus> {
        let previous = &job.job_status.upload_status;
        let mut results = Vec::with_capacity(job.outputs.len());

        for (index, output) in job.outputs.iter().enumerate() {
            if let Some(done) = previous.get(index).filter(|status| status.ok) {
                results.push(done.clone());
                continue;
            }

            let status = match output.output_type {
                OutputType::File => self.publish_file(job, output, cwd).await,
                OutputType::Directory => self.publish_directory(job, output, cwd).await,
                OutputType::TarGz => self.publish_archive(job, output, cwd).await,
            };
            if !status.ok {
                warn!(output = %output.name, error = ?status.error, "Failed to publish output");
            }
            results.push(status);
        }

        let published = results.iter().filter(|status| status.ok).count();
        info!(published, total = results.len(), "Output staging finished");
        results
    }

    async fn upload(&self, job_id: &str, name: &str, path: &Path) -> TransferStatus {
        let transfer = async {
            let data = tokio::fs::read(path).await?;
            self.store.put_attachment(job_id, name, data).await?;
            Ok::<_, ClusterpostError>(())
        };

        match transfer.await {
            Ok(()) => TransferStatus::success(name).with_path(path.display().to_string()),
            Err(e) => TransferStatus::failure(name, e.to_string()),
        }
    }

    async fn publish_file(&self, job: &JobDocument, output: &JobOutput, cwd: &Path) -> TransferStatus {
        let path = cwd.join(output.path.as_deref().unwrap_or(&output.name));
        self.upload(&job.id, &output.name, &path).await
    }

    /// Every regular file under the directory, attached under its path
    /// relative to the working directory. Succeeds only if all files do.
    async fn publish_directory(
        &self,
        job: &JobDocument,
        output: &JobOutput,
        cwd: &Path,
    ) -> TransferStatus {
        let root = cwd.join(&output.name);
        let files = match list_files(&root) {
            Ok(files) => files,
            Err(e) => return TransferStatus::failure(&output.name, e.to_string()),
        };

        let mut members = Vec::with_capacity(files.len());
        for file in files {
            let name = attachment_name(cwd, &file);
            members.push(self.upload(&job.id, &name, &file).await);
        }

        TransferStatus {
            name: Some(output.name.clone()),
            ok: members.iter().all(|member| member.ok),
            error: None,
            path: Some(root.display().to_string()),
            files: members,
        }
    }

    async fn publish_archive(&self, job: &JobDocument, output: &JobOutput, cwd: &Path) -> TransferStatus {
        let source = if output.name == CWD_MARKER {
            cwd.to_path_buf()
        } else {
            cwd.join(output.name.trim_end_matches('/'))
        };
        let Some(dir_name) = source.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return TransferStatus::failure(&output.name, "invalid archive source");
        };
        let archive_name = format!("{dir_name}{ARCHIVE_SUFFIX}");
        let destination = source.with_file_name(&archive_name);

        let compress = {
            let source = source.clone();
            let destination = destination.clone();
            tokio::task::spawn_blocking(move || archive::compress_directory(&source, &destination))
        };
        match compress.await {
            Ok(Ok(())) => self.upload(&job.id, &archive_name, &destination).await,
            Ok(Err(e)) => TransferStatus::failure(&output.name, e.to_string()),
            Err(e) => TransferStatus::failure(&output.name, format!("compression task failed: {e}")),
        }
    }
}

fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| ClusterpostError::staging(e.to_string()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn attachment_name(cwd: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(cwd).unwrap_or(file);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    #[test]
    fn test_attachment_name_is_relative() {
        assert_eq!(
            attachment_name(Path::new("/data/job"), Path::new("/data/job/plots/a.png")),
            "plots/a.png"
        );
    }

    #[tokio::test]
    async fn test_working_dir_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let stager = DataStager::new(Arc::new(InMemoryDocumentStore::new()), dir.path());

        let cwd = stager.create_working_dir("job-9").await.unwrap();
        assert!(cwd.is_dir());
        // creating twice is fine
        stager.create_working_dir("job-9").await.unwrap();
        std::fs::write(dir.path().join("job-9.tar.gz"), b"x").unwrap();

        assert!(stager.remove_working_dir("job-9").await.unwrap());
        assert!(!cwd.exists());
        assert!(!dir.path().join("job-9.tar.gz").exists());
        assert!(!stager.remove_working_dir("job-9").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_attachment_is_reported_per_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryDocumentStore::new());
        let stager = DataStager::new(store.clone(), dir.path());

        let mut job = JobDocument::new("job-10", "cat", "local");
        job.inputs.push(JobInput::named("absent.txt"));
        let cwd = stager.create_working_dir(&job.id).await.unwrap();

        let statuses = stager.fetch_inputs(&job, &cwd).await;
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].ok);
        assert_eq!(
            statuses[0].error.as_deref(),
            Some("Document is missing attachment absent.txt")
        );
        assert_eq!(store.download_count(), 0);
    }
}
