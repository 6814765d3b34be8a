//! # Job State Machine
//!
//! The ten lifecycle states of a job document and the legal transitions
//! between them. Handlers compute the next state with [`transition`] before
//! persisting, so an illegal move surfaces as
//! [`StateMachineError::InvalidTransition`] instead of a silently corrupted
//! document.

pub mod errors;
pub mod events;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::JobEvent;
pub use states::JobState;

/// Determine the target state for `event` applied in `current`.
pub fn transition(current: JobState, event: &JobEvent) -> StateMachineResult<JobState> {
    use JobState::*;

    let target = match (current, event) {
        (_, JobEvent::RequestDelete) => Delete,

        // Nothing but deletion leaves DELETE
        (Delete, _) => return Err(invalid(current, event)),

        (_, JobEvent::Enqueue) => Queue,
        (_, JobEvent::Resubmit) => Queue,

        (Create | Queue | Downloading, JobEvent::InputsPending) => Downloading,
        (Create | Queue | Downloading, JobEvent::Submitted) => Run,
        (Create | Queue | Downloading, JobEvent::Finished) => Uploading,
        (Create | Queue | Downloading, JobEvent::Fail(_)) => Fail,

        (Run, JobEvent::Progress) => Run,
        (Run | Kill, JobEvent::Finished) => Uploading,
        (Run | Kill, JobEvent::Fail(_)) => Fail,

        (Uploading, JobEvent::UploadsComplete) => Done,
        (Uploading, JobEvent::UploadsFailed) => Fail,

        (Create | Queue | Downloading | Run | Kill | Uploading, JobEvent::RequestKill) => Kill,
        (Run | Kill, JobEvent::Killed) => Exit,

        (from, _) => return Err(invalid(from, event)),
    };

    Ok(target)
}

fn invalid(from: JobState, event: &JobEvent) -> StateMachineError {
    StateMachineError::InvalidTransition {
        from: from.to_string(),
        event: event.event_type().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_path() {
        assert_eq!(transition(JobState::Create, &JobEvent::Submitted).unwrap(), JobState::Run);
        assert_eq!(
            transition(JobState::Queue, &JobEvent::InputsPending).unwrap(),
            JobState::Downloading
        );
        assert_eq!(
            transition(JobState::Downloading, &JobEvent::Fail("bsub".into())).unwrap(),
            JobState::Fail
        );
        assert!(transition(JobState::Done, &JobEvent::Submitted).is_err());
    }

    #[test]
    fn test_resubmit_from_any_live_state() {
        assert_eq!(transition(JobState::Done, &JobEvent::Resubmit).unwrap(), JobState::Queue);
        assert_eq!(transition(JobState::Fail, &JobEvent::Resubmit).unwrap(), JobState::Queue);
        assert_eq!(transition(JobState::Run, &JobEvent::Resubmit).unwrap(), JobState::Queue);
        assert!(transition(JobState::Delete, &JobEvent::Resubmit).is_err());
    }

    #[test]
    fn test_upload_path() {
        assert_eq!(transition(JobState::Run, &JobEvent::Finished).unwrap(), JobState::Uploading);
        assert_eq!(
            transition(JobState::Uploading, &JobEvent::UploadsComplete).unwrap(),
            JobState::Done
        );
        assert_eq!(
            transition(JobState::Uploading, &JobEvent::UploadsFailed).unwrap(),
            JobState::Fail
        );
    }

    #[test]
    fn test_kill_path() {
        assert_eq!(transition(JobState::Run, &JobEvent::RequestKill).unwrap(), JobState::Kill);
        assert_eq!(transition(JobState::Kill, &JobEvent::Killed).unwrap(), JobState::Exit);
        assert!(transition(JobState::Done, &JobEvent::RequestKill).is_err());
    }

    #[test]
    fn test_delete_is_absorbing() {
        for state in JobState::ALL {
            assert_eq!(
                transition(state, &JobEvent::RequestDelete).unwrap(),
                JobState::Delete
            );
        }
        assert!(transition(JobState::Delete, &JobEvent::Enqueue).is_err());
        assert!(transition(JobState::Delete, &JobEvent::Killed).is_err());
    }
}
