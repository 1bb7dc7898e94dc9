use std::fmt;

// ---

use thiserror::Error;

use l2bridge_domain::{AddressParseError, ModeError, Psm};

// ---------------------------------------------------------------------------
// FacadeError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FacadeError {
    // ---
    #[error("psm {0} not registered")]
    NotRegistered(Psm),

    #[error("psm {0} already registered")]
    AlreadyRegistered(Psm),

    #[error("channel not open on psm {0}")]
    ChannelNotOpen(Psm),

    #[error("channel on psm {0} did not open in time")]
    OpenTimedOut(Psm),

    #[error("no channel on psm {0} to close")]
    CloseTimedOut(Psm),

    #[error("invalid remote address: {0}")]
    InvalidAddress(#[from] AddressParseError),

    #[error(transparent)]
    InvalidMode(#[from] ModeError),

    #[error("psm {0} is out of range")]
    InvalidPsm(u32),

    /// A relay already has an attached consumer.
    #[error("{0} stream already has a consumer")]
    StreamBusy(&'static str),
}

// ---

impl FacadeError {
    // ---
    /// Rejected because the facade was not in a state to accept the call.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(self, Self::NotRegistered(_) | Self::ChannelNotOpen(_))
    }

    pub fn code(&self) -> StatusCode {
        // ---
        match self {
            Self::NotRegistered(_) | Self::ChannelNotOpen(_) => StatusCode::FailedPrecondition,
            Self::AlreadyRegistered(_) => StatusCode::AlreadyExists,
            Self::OpenTimedOut(_) | Self::CloseTimedOut(_) => StatusCode::DeadlineExceeded,
            Self::InvalidAddress(_) | Self::InvalidMode(_) | Self::InvalidPsm(_) => {
                StatusCode::InvalidArgument
            }
            Self::StreamBusy(_) => StatusCode::ResourceExhausted,
        }
    }

    /// Wire status for this error. Precondition messages match what remote
    /// clients already key on.
    pub fn status(&self) -> Status {
        // ---
        let message = match self {
            Self::NotRegistered(_) => "psm not registered".to_string(),
            Self::ChannelNotOpen(_) => "channel not open".to_string(),
            other => other.to_string(),
        };
        Status::new(self.code(), message)
    }
}

// ---------------------------------------------------------------------------
// Wire status
// ---------------------------------------------------------------------------

/// Failure category reported to remote callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    // ---
    FailedPrecondition,
    AlreadyExists,
    InvalidArgument,
    DeadlineExceeded,
    ResourceExhausted,
}

impl fmt::Display for StatusCode {
    // ---
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
        };
        f.write_str(name)
    }
}

// ---

/// Error returned by every remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct Status {
    // ---
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<FacadeError> for Status {
    fn from(err: FacadeError) -> Self {
        err.status()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
