use crate::domain::QueuedPing;
use std::time::Duration;

/// What the worker should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadTask {
    Upload(QueuedPing),
    /// Nothing can be sent right now; poll again after the given delay.
    Wait(Duration),
    /// The session is over.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The server answered. The status decides what happens to the ping.
    Success,
    /// Transport-level failure worth retrying (network error, timeout).
    RecoverableFailure,
    /// The request could not be built or sent and never will be.
    UnrecoverableFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadResult {
    pub status: Option<u16>,
    pub outcome: UploadOutcome,
}

impl UploadResult {
    pub fn http_status(status: u16) -> Self {
        Self {
            status: Some(status),
            outcome: UploadOutcome::Success,
        }
    }

    pub fn recoverable_failure() -> Self {
        Self {
            status: None,
            outcome: UploadOutcome::RecoverableFailure,
        }
    }

    pub fn unrecoverable_failure() -> Self {
        Self {
            status: None,
            outcome: UploadOutcome::UnrecoverableFailure,
        }
    }

    pub fn is_success_status(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }

    pub fn is_client_error_status(&self) -> bool {
        matches!(self.status, Some(400..=499))
    }
}
