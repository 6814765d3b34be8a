//! # Document Store Boundary
//!
//! The revisioned document store that owns job documents. The orchestrator
//! only needs a handful of operations, captured by [`DocumentStore`]:
//!
//! - every `put` carries the revision last read and yields a new one
//! - a stale revision is a
//!   [`RevisionConflict`](crate::error::ClusterpostError::RevisionConflict), never
//!   merged or retried here
//! - attachments hold the staged input and output artifacts
//!
//! Two implementations ship with the crate: [`CouchDocumentStore`] speaking
//! the CouchDB HTTP API, and [`InMemoryDocumentStore`] for tests and
//! single-process deployments.

pub mod couch;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{StoreConfig, StoreKind};
use crate::error::Result;
use crate::models::JobDocument;
use crate::state_machine::JobState;

pub use couch::CouchDocumentStore;
pub use memory::InMemoryDocumentStore;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the latest revision of a document.
    async fn get(&self, id: &str) -> Result<JobDocument>;

    /// Write a document carrying the revision it was read at. Returns the new
    /// revision.
    async fn put(&self, doc: &JobDocument) -> Result<String>;

    /// Remove a document.
    async fn delete(&self, id: &str) -> Result<()>;

    /// All documents whose `jobstatus.status` equals `status`.
    async fn query_by_status(&self, status: JobState) -> Result<Vec<JobDocument>>;

    async fn get_attachment(&self, id: &str, name: &str) -> Result<Vec<u8>>;

    /// Attach `data` to the latest revision of `id`. Returns the new revision.
    async fn put_attachment(&self, id: &str, name: &str, data: Vec<u8>) -> Result<String>;

    /// `put` and record the new revision on the document.
    async fn save(&self, doc: &mut JobDocument) -> Result<()> {
        let revision = self.put(doc).await?;
        doc.revision = Some(revision);
        Ok(())
    }
}

/// Build the store selected by configuration.
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    Ok(match config.kind {
        StoreKind::Couch => Arc::new(CouchDocumentStore::new(config)?),
        StoreKind::Memory => Arc::new(InMemoryDocumentStore::new()),
    })
}
