use thiserror::Error;

use crate::host::HostId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Failed to create host {id}: {reason}")]
    Create { id: HostId, reason: String },
    #[error("Host {0} was not created in time")]
    CreateTimeout(HostId),
    #[error("Host {0} is disconnected")]
    Disconnected(HostId),
    #[error("Host {id} failed to load target: {reason}")]
    Load { id: HostId, reason: String },
    #[error("Host {id} rejected instruction: {reason}")]
    Send { id: HostId, reason: String },
    #[error("Host {0} did not acknowledge state reset")]
    ResetTimeout(HostId),
    #[error("Event stream of host {0} closed")]
    EventsClosed(HostId),
    #[error("Failed to destroy host {id}: {reason}")]
    Destroy { id: HostId, reason: String },
}

/// Why a session ended in `Failed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("execution host unavailable: {0}")]
    HostUnavailable(String),
    #[error("no action vocabulary for platform '{0}'")]
    UnsupportedPlatform(String),
    #[error("host did not become ready in time")]
    HostLoadTimeout,
    #[error("login could not be verified")]
    AuthVerificationTimeout,
    #[error("instrument '{0}' not found")]
    InstrumentNotFound(String),
    #[error("host fault: {0}")]
    HostFault(String),
    #[error("no trades succeeded")]
    NoTradesSucceeded,
    #[error("cancelled")]
    Cancelled,
    #[error("session timed out")]
    SessionTimeout,
    #[error("step logic panicked: {0}")]
    Panicked(String),
}

impl From<HostError> for FailureReason {
    fn from(error: HostError) -> Self {
        Self::HostFault(error.to_string())
    }
}
