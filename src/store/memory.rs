//! In-process document store with CouchDB-like revision semantics.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::DocumentStore;
use crate::error::{ClusterpostError, Result};
use crate::models::JobDocument;
use crate::state_machine::JobState;

#[derive(Debug, Default)]
struct StoredDocument {
    doc: Option<JobDocument>,
    sequence: u64,
    attachments: HashMap<String, Vec<u8>>,
}

/// Thread-safe in-memory store.
///
/// Besides the [`DocumentStore`] contract it counts attachment transfers and
/// can be told to fail transfers for given attachment names, which the
/// staging tests rely on.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
    failing_attachments: RwLock<HashSet<String>>,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an attachment without touching the revision, as if it had been
    /// uploaded together with the document by the façade.
    pub fn seed_attachment(&self, id: &str, name: &str, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let mut documents = self.documents.write();
        let entry = documents.entry(id.to_string()).or_default();
        if let Some(doc) = entry.doc.as_mut() {
            doc.attachments.insert(name.to_string(), stub(data.len()));
        }
        entry.attachments.insert(name.to_string(), data);
    }

    /// Make every transfer of attachment `name` fail until cleared.
    pub fn fail_attachment(&self, name: &str) {
        self.failing_attachments.write().insert(name.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_attachments.write().clear();
    }

    pub fn attachment(&self, id: &str, name: &str) -> Option<Vec<u8>> {
        self.documents
            .read()
            .get(id)
            .and_then(|entry| entry.attachments.get(name).cloned())
    }

    pub fn attachment_names(&self, id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .documents
            .read()
            .get(id)
            .map(|entry| entry.attachments.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of `get_attachment` calls served so far.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Number of `put_attachment` calls served so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .values()
            .filter(|entry| entry.doc.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_revision(sequence: u64) -> String {
        format!("{sequence}-{}", uuid::Uuid::new_v4().simple())
    }

    fn check_failure(&self, name: &str) -> Result<()> {
        if self.failing_attachments.read().contains(name) {
            return Err(ClusterpostError::store(
                "attachment",
                format!("transfer of {name} refused"),
            ));
        }
        Ok(())
    }
}

fn stub(length: usize) -> serde_json::Value {
    json!({
        "content_type": "application/octet-stream",
        "length": length,
        "stub": true
    })
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, id: &str) -> Result<JobDocument> {
        self.documents
            .read()
            .get(id)
            .and_then(|entry| entry.doc.clone())
            .ok_or_else(|| ClusterpostError::not_found(id))
    }

    async fn put(&self, doc: &JobDocument) -> Result<String> {
        let mut documents = self.documents.write();
        let entry = documents.entry(doc.id.clone()).or_default();

        let current = entry.doc.as_ref().and_then(|d| d.revision.clone());
        if current != doc.revision {
            return Err(ClusterpostError::revision_conflict(&doc.id));
        }

        entry.sequence += 1;
        let revision = Self::next_revision(entry.sequence);
        let mut stored = doc.clone();
        stored.revision = Some(revision.clone());
        entry.doc = Some(stored);
        Ok(revision)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut documents = self.documents.write();
        match documents.remove(id) {
            Some(entry) if entry.doc.is_some() => Ok(()),
            _ => Err(ClusterpostError::not_found(id)),
        }
    }

    async fn query_by_status(&self, status: JobState) -> Result<Vec<JobDocument>> {
        let mut docs: Vec<JobDocument> = self
            .documents
            .read()
            .values()
            .filter_map(|entry| entry.doc.clone())
            .filter(|doc| doc.status() == status)
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    async fn get_attachment(&self, id: &str, name: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.check_failure(name)?;
        self.attachment(id, name)
            .ok_or_else(|| ClusterpostError::not_found(format!("{id}/{name}")))
    }

    async fn put_attachment(&self, id: &str, name: &str, data: Vec<u8>) -> Result<String> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.check_failure(name)?;

        let mut documents = self.documents.write();
        let entry = documents
            .get_mut(id)
            .filter(|entry| entry.doc.is_some())
            .ok_or_else(|| ClusterpostError::not_found(id))?;

        entry.sequence += 1;
        let revision = Self::next_revision(entry.sequence);
        if let Some(doc) = entry.doc.as_mut() {
            doc.attachments.insert(name.to_string(), stub(data.len()));
            doc.revision = Some(revision.clone());
        }
        entry.attachments.insert(name.to_string(), data);
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_requires_current_revision() {
        let store = InMemoryDocumentStore::new();
        let mut doc = JobDocument::new("job-1", "echo", "local");

        store.save(&mut doc).await.unwrap();
        let first = doc.revision.clone().unwrap();
        assert!(first.starts_with("1-"));

        let stale = JobDocument {
            revision: None,
            ..doc.clone()
        };
        let err = store.put(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        store.save(&mut doc).await.unwrap();
        assert!(doc.revision.as_deref().unwrap().starts_with("2-"));
    }

    #[tokio::test]
    async fn test_attachment_bumps_revision() {
        let store = InMemoryDocumentStore::new();
        let mut doc = JobDocument::new("job-2", "echo", "local");
        store.save(&mut doc).await.unwrap();

        let rev = store
            .put_attachment("job-2", "out.txt", b"hello".to_vec())
            .await
            .unwrap();
        let latest = store.get("job-2").await.unwrap();
        assert_eq!(latest.revision.as_deref(), Some(rev.as_str()));
        assert!(latest.has_attachment("out.txt"));

        // the pre-attachment copy is now stale
        assert!(store.put(&doc).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = InMemoryDocumentStore::new();
        assert!(store.delete("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_query_by_status() {
        let store = InMemoryDocumentStore::new();
        for (id, state) in [("a", JobState::Run), ("b", JobState::Done), ("c", JobState::Run)] {
            let mut doc = JobDocument::new(id, "echo", "local");
            doc.job_status.status = state;
            store.save(&mut doc).await.unwrap();
        }
        let running = store.query_by_status(JobState::Run).await.unwrap();
        let ids: Vec<_> = running.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
