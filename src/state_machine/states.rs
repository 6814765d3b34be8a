use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a job document.
///
/// Serialized upper-case (`"RUN"`, `"UPLOADING"`, ...) to match the wire format
/// of the document store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Initial state, set when the document is created
    #[default]
    Create,
    /// Accepted for submission, waiting in the submit queue
    Queue,
    /// Inputs are still being fetched into the working directory
    Downloading,
    /// Submitted to the backend
    Run,
    /// Backend or staging failure
    Fail,
    /// Kill requested, cancellation pending
    Kill,
    /// Backend finished, outputs are being published
    Uploading,
    /// Backend reported an abnormal exit or the job was killed
    Exit,
    /// All outputs published
    Done,
    /// Marked for removal
    Delete,
}

impl JobState {
    pub const ALL: [JobState; 10] = [
        Self::Create,
        Self::Queue,
        Self::Downloading,
        Self::Run,
        Self::Fail,
        Self::Kill,
        Self::Uploading,
        Self::Exit,
        Self::Done,
        Self::Delete,
    ];

    /// No further backend polling happens in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Fail | Self::Exit | Self::Delete)
    }

    /// States from which a submission proceeds without `force`.
    pub fn is_submittable(&self) -> bool {
        matches!(self, Self::Create | Self::Queue | Self::Downloading)
    }

    /// States the kill handler acts on.
    pub fn is_killable(&self) -> bool {
        matches!(self, Self::Run | Self::Kill)
    }

    /// States re-enqueued by the recovery scan, with the queue that owns them.
    pub fn recovery_queue(&self) -> Option<&'static str> {
        use crate::constants::queues;
        match self {
            Self::Queue => Some(queues::SUBMIT),
            Self::Run | Self::Uploading => Some(queues::STATUS),
            Self::Kill => Some(queues::KILL),
            Self::Delete => Some(queues::DELETE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Queue => "QUEUE",
            Self::Downloading => "DOWNLOADING",
            Self::Run => "RUN",
            Self::Fail => "FAIL",
            Self::Kill => "KILL",
            Self::Uploading => "UPLOADING",
            Self::Exit => "EXIT",
            Self::Done => "DONE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid job state: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = JobState::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![&JobState::Fail, &JobState::Exit, &JobState::Done, &JobState::Delete]
        );
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(
            serde_json::to_string(&JobState::Uploading).unwrap(),
            "\"UPLOADING\""
        );
        let state: JobState = serde_json::from_str("\"DOWNLOADING\"").unwrap();
        assert_eq!(state, JobState::Downloading);
        assert_eq!("KILL".parse::<JobState>().unwrap(), JobState::Kill);
        assert!("kill".parse::<JobState>().is_err());
    }

    #[test]
    fn test_recovery_queues() {
        assert_eq!(JobState::Queue.recovery_queue(), Some("submit"));
        assert_eq!(JobState::Uploading.recovery_queue(), Some("status"));
        assert_eq!(JobState::Done.recovery_queue(), None);
        assert_eq!(JobState::Create.recovery_queue(), None);
    }
}
