use serde::{Deserialize, Serialize};

/// Events that move a job document between states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    /// Submission requested through the request helpers
    Enqueue,
    /// Forced resubmission, whatever the current state
    Resubmit,
    /// Some inputs could not be fetched yet
    InputsPending,
    /// Backend accepted the job
    Submitted,
    /// Backend rejected the submission or reported a failure
    Fail(String),
    /// Backend reported the job still running
    Progress,
    /// Backend reported DONE or EXIT; outputs must be published
    Finished,
    /// Every output was published
    UploadsComplete,
    /// At least one output could not be published
    UploadsFailed,
    /// Kill requested
    RequestKill,
    /// Backend cancel command issued
    Killed,
    /// Removal requested
    RequestDelete,
}

impl JobEvent {
    /// Event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Resubmit => "resubmit",
            Self::InputsPending => "inputs_pending",
            Self::Submitted => "submitted",
            Self::Fail(_) => "fail",
            Self::Progress => "progress",
            Self::Finished => "finished",
            Self::UploadsComplete => "uploads_complete",
            Self::UploadsFailed => "uploads_failed",
            Self::RequestKill => "request_kill",
            Self::Killed => "killed",
            Self::RequestDelete => "request_delete",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }
}
