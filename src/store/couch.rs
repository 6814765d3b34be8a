//! CouchDB implementation of the document store.
//!
//! Jobs live in one database; status queries go through the
//! `_design/searchJob/_view/jobstatus` view keyed by `jobstatus.status`.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::DocumentStore;
use crate::config::StoreConfig;
use crate::error::{ClusterpostError, Result};
use crate::models::JobDocument;
use crate::state_machine::JobState;

const STATUS_VIEW: [&str; 4] = ["_design", "searchJob", "_view", "jobstatus"];

#[derive(Debug, Clone)]
pub struct CouchDocumentStore {
    http: reqwest::Client,
    base_url: Url,
    database: String,
    credentials: Option<(String, Option<String>)>,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct ViewResponse {
    rows: Vec<ViewRow>,
}

#[derive(Debug, Deserialize)]
struct ViewRow {
    #[serde(default)]
    doc: Option<JobDocument>,
}

#[derive(Debug, Deserialize, Default)]
struct CouchError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

impl CouchDocumentStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| ClusterpostError::store("connect", format!("{}: {e}", config.url)))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            base_url,
            database: config.database.clone(),
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
        })
    }

    /// `<base>/<database>/<segments...>`, each segment percent-encoded.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClusterpostError::store("url", format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .push(&self.database)
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }

    async fn error_for(&self, operation: &str, id: &str, response: reqwest::Response) -> ClusterpostError {
        let status = response.status();
        let body: CouchError = response.json().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => ClusterpostError::not_found(id),
            StatusCode::CONFLICT => ClusterpostError::revision_conflict(id),
            _ => ClusterpostError::store(
                operation,
                format!("HTTP {status}: {} {}", body.error, body.reason),
            ),
        }
    }

    async fn current_revision(&self, id: &str) -> Result<String> {
        self.get(id)
            .await?
            .revision
            .ok_or_else(|| ClusterpostError::store("get", format!("{id} has no revision")))
    }
}

#[async_trait]
impl DocumentStore for CouchDocumentStore {
    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<JobDocument> {
        let response = self
            .request(reqwest::Method::GET, self.url([id])?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.error_for("get", id, response).await);
        }
        Ok(response.json().await?)
    }

    #[instrument(skip(self, doc), fields(job_id = %doc.id))]
    async fn put(&self, doc: &JobDocument) -> Result<String> {
        let response = self
            .request(reqwest::Method::PUT, self.url([doc.id.as_str()])?)
            .json(doc)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.error_for("put", &doc.id, response).await);
        }
        let written: WriteResponse = response.json().await?;
        debug!(revision = %written.rev, "Document written");
        Ok(written.rev)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<()> {
        let revision = self.current_revision(id).await?;
        let mut url = self.url([id])?;
        url.query_pairs_mut().append_pair("rev", &revision);

        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        if !response.status().is_success() {
            return Err(self.error_for("delete", id, response).await);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_by_status(&self, status: JobState) -> Result<Vec<JobDocument>> {
        let mut url = self.url(STATUS_VIEW)?;
        url.query_pairs_mut()
            .append_pair("key", &serde_json::to_string(status.as_str())?)
            .append_pair("include_docs", "true");

        let response = self.request(reqwest::Method::GET, url).send().await?;
        if !response.status().is_success() {
            return Err(self.error_for("query", status.as_str(), response).await);
        }
        let view: ViewResponse = response.json().await?;
        Ok(view.rows.into_iter().filter_map(|row| row.doc).collect())
    }

    #[instrument(skip(self))]
    async fn get_attachment(&self, id: &str, name: &str) -> Result<Vec<u8>> {
        let url = self.url(std::iter::once(id).chain(name.split('/')))?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        if !response.status().is_success() {
            return Err(self
                .error_for("get_attachment", &format!("{id}/{name}"), response)
                .await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put_attachment(&self, id: &str, name: &str, data: Vec<u8>) -> Result<String> {
        let revision = self.current_revision(id).await?;
        let mut url = self.url(std::iter::once(id).chain(name.split('/')))?;
        url.query_pairs_mut().append_pair("rev", &revision);

        let response = self
            .request(reqwest::Method::PUT, url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.error_for("put_attachment", id, response).await);
        }
        let written: WriteResponse = response.json().await?;
        Ok(written.rev)
    }
}
