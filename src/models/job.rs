//! # Job Document Model
//!
//! The unit of work exchanged with the document store.
//!
//! ## Overview
//!
//! A `JobDocument` is created by the REST façade in state `CREATE`, mutated by
//! the lifecycle handlers, and finally removed by the delete handler. Every
//! write carries the revision last read (`_rev`) and the store hands back a
//! new one.
//!
//! ## Wire Format
//!
//! Field names follow the store's JSON documents:
//!
//! ```json
//! {
//!   "_id": "4f3c2a...",
//!   "_rev": "3-9a1b...",
//!   "type": "job",
//!   "name": "tractography",
//!   "executable": "python",
//!   "parameters": [{ "flag": "-i", "name": "dwi.nrrd" }],
//!   "jobparameters": [{ "flag": "-q", "name": "day" }],
//!   "inputs": [{ "name": "dwi.nrrd" }],
//!   "outputs": [{ "type": "file", "name": "fibers.vtk" }, { "type": "tar.gz", "name": "cwd" }],
//!   "userEmail": "jprieto@example.edu",
//!   "executionserver": "killdevil",
//!   "jobstatus": { "status": "RUN", "jobid": 898104, "downloadstatus": [{ "ok": true }] },
//!   "timestampstart": "2017-03-01T10:12:00Z"
//! }
//! ```
//!
//! Unknown fields are kept in `extra` so a read-modify-write cycle never drops
//! data owned by other components.
//!
//! ## Staging Bookkeeping
//!
//! `jobstatus.downloadstatus` and `jobstatus.uploadstatus` are index-aligned
//! with `inputs` and `outputs`. An entry only ever goes from not-ok to ok,
//! which is what makes staging resumable after a crash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::state_machine::JobState;

/// A job document as stored by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDocument {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub executable: String,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Backend directives, e.g. queue name or wall-clock limit.
    #[serde(rename = "jobparameters", default)]
    pub engine_parameters: Vec<Parameter>,

    #[serde(default)]
    pub inputs: Vec<JobInput>,

    #[serde(default)]
    pub outputs: Vec<JobOutput>,

    #[serde(rename = "userEmail", default)]
    pub user_email: String,

    #[serde(rename = "executionserver")]
    pub execution_server: String,

    #[serde(rename = "jobstatus", default)]
    pub job_status: JobStatus,

    #[serde(rename = "timestampstart", default, skip_serializing_if = "Option::is_none")]
    pub timestamp_start: Option<DateTime<Utc>>,

    #[serde(rename = "timestampend", default, skip_serializing_if = "Option::is_none")]
    pub timestamp_end: Option<DateTime<Utc>>,

    /// Attachment stubs keyed by attachment name.
    #[serde(rename = "_attachments", default, skip_serializing_if = "Map::is_empty")]
    pub attachments: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A `{flag, name}` pair rendered as `flag name` on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub flag: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub name: String,
}

impl Parameter {
    pub fn new(flag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            name: name.into(),
        }
    }

    /// Non-empty tokens of this parameter, flag first.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        [self.flag.as_str(), self.name.as_str()]
            .into_iter()
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub name: String,
    /// Location on another server; resolved by the store's attachment endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<Value>,
    /// Location on the store host's filesystem; resolved the same way.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<Value>,
}

impl JobInput {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote: None,
            local: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "directory")]
    Directory,
    #[serde(rename = "tar.gz")]
    TarGz,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    #[serde(rename = "type")]
    pub output_type: OutputType,
    pub name: String,
    /// Path relative to the working directory when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl JobOutput {
    pub fn new(output_type: OutputType, name: impl Into<String>) -> Self {
        Self {
            output_type,
            name: name.into(),
            path: None,
        }
    }
}

/// Backend and staging state of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobState,

    /// Identifier assigned by the backend (LSF/SLURM/PBS id or Unix pid).
    #[serde(
        rename = "jobid",
        default,
        deserialize_with = "optional_job_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub backend_job_id: Option<u64>,

    /// Raw text of the last backend acknowledgement or status query.
    #[serde(rename = "stat", default, skip_serializing_if = "Option::is_none")]
    pub stat_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "downloadstatus", default, skip_serializing_if = "Vec::is_empty")]
    pub download_status: Vec<TransferStatus>,

    #[serde(rename = "uploadstatus", default, skip_serializing_if = "Vec::is_empty")]
    pub upload_status: Vec<TransferStatus>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of moving one artifact between the store and a working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(alias = "status", default)]
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Per-file results of a `directory` output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<TransferStatus>,
}

impl TransferStatus {
    pub fn success(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ok: true,
            ..Self::default()
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl JobDocument {
    /// A fresh document in `CREATE` targeting `execution_server`.
    pub fn new(
        id: impl Into<String>,
        executable: impl Into<String>,
        execution_server: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            revision: None,
            name: None,
            executable: executable.into(),
            parameters: Vec::new(),
            engine_parameters: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            user_email: String::new(),
            execution_server: execution_server.into(),
            job_status: JobStatus::default(),
            timestamp_start: None,
            timestamp_end: None,
            attachments: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn status(&self) -> JobState {
        self.job_status.status
    }

    /// Executable followed by every parameter token.
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.executable.as_str())
            .chain(self.parameters.iter().flat_map(Parameter::tokens))
            .map(str::to_string)
            .collect()
    }

    pub fn has_attachment(&self, name: &str) -> bool {
        self.attachments.contains_key(name)
    }

    /// True when every declared output has a successful upload entry.
    pub fn all_outputs_uploaded(&self) -> bool {
        self.outputs.len() <= self.job_status.upload_status.len()
            && self.job_status.upload_status.iter().all(|s| s.ok)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Ok(other.to_string()),
    }
}

fn optional_job_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_u64()),
        Some(Value::String(s)) => Ok(s.trim().parse().ok()),
        Some(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "_id": "a1b2c3",
            "_rev": "2-abc",
            "type": "job",
            "executable": "python",
            "parameters": [{"flag": "-i", "name": "input.nrrd"}, {"flag": "--iterations", "name": 25}],
            "jobparameters": [{"flag": "-q", "name": "week"}],
            "inputs": [{"name": "input.nrrd"}],
            "outputs": [{"type": "tar.gz", "name": "cwd"}, {"type": "file", "name": "out.vtk", "path": "results/out.vtk"}],
            "userEmail": "jprieto@example.edu",
            "executionserver": "killdevil",
            "jobstatus": {"status": "RUN", "jobid": "898104", "downloadstatus": [{"status": true}]}
        })
    }

    #[test]
    fn test_deserializes_store_document() {
        let doc: JobDocument = serde_json::from_value(sample()).unwrap();
        assert_eq!(doc.id, "a1b2c3");
        assert_eq!(doc.revision.as_deref(), Some("2-abc"));
        assert_eq!(doc.status(), JobState::Run);
        assert_eq!(doc.job_status.backend_job_id, Some(898104));
        assert!(doc.job_status.download_status[0].ok);
        assert_eq!(doc.outputs[0].output_type, OutputType::TarGz);
        assert_eq!(doc.outputs[1].path.as_deref(), Some("results/out.vtk"));
        assert_eq!(doc.extra.get("type"), Some(&json!("job")));
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let doc: JobDocument = serde_json::from_value(sample()).unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["type"], json!("job"));
        assert_eq!(value["jobparameters"][0]["name"], json!("week"));
        assert_eq!(value["jobstatus"]["jobid"], json!(898104));
    }

    #[test]
    fn test_command_line_skips_empty_tokens() {
        let mut doc: JobDocument = serde_json::from_value(sample()).unwrap();
        doc.parameters.push(Parameter::new("", "positional"));
        assert_eq!(
            doc.command_line(),
            vec!["python", "-i", "input.nrrd", "--iterations", "25", "positional"]
        );
    }

    #[test]
    fn test_all_outputs_uploaded() {
        let mut doc = JobDocument::new("j", "echo", "local");
        doc.outputs.push(JobOutput::new(OutputType::File, "a"));
        assert!(!doc.all_outputs_uploaded());
        doc.job_status.upload_status.push(TransferStatus::success("a"));
        assert!(doc.all_outputs_uploaded());
    }
}
