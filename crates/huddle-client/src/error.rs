use huddle_protocol::MediaKind;
use std::fmt;
use thiserror::Error;

use crate::network::CredentialError;
use crate::session::Phase;
use crate::transport::TransportError;

/// Failures of local capture, publishing or toggling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("failed to capture {kind} track: {source}")]
    Capture {
        kind: MediaKind,
        #[source]
        source: TransportError,
    },

    #[error("failed to publish local tracks: {0}")]
    Publish(#[source] TransportError),

    #[error("failed to toggle {kind} track: {source}")]
    Toggle {
        kind: MediaKind,
        #[source]
        source: TransportError,
    },

    #[error("local tracks are already acquired")]
    AlreadyAcquired,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to acquire access token: {0}")]
    CredentialAcquisition(#[from] CredentialError),

    #[error("failed to join channel: {0}")]
    Join(#[source] TransportError),

    #[error("failed to start local media: {0}")]
    Publish(#[source] MediaError),

    #[error("{0}")]
    Media(#[source] MediaError),

    #[error("cannot {operation} while {phase}")]
    InvalidState {
        operation: &'static str,
        phase: Phase,
    },

    #[error("join cancelled by leave")]
    Cancelled,
}

impl SessionError {
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SessionError::InvalidState { .. })
    }
}

/// Teardown step that can fail without stopping the ones after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    ReleaseTrack(MediaKind),
    LeaveChannel,
    StopEventPump,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupStep::ReleaseTrack(kind) => write!(f, "release {} track", kind),
            CleanupStep::LeaveChannel => f.write_str("leave channel"),
            CleanupStep::StopEventPump => f.write_str("stop event pump"),
        }
    }
}

/// A teardown step that failed. Logged and reported, never raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cleanup step '{step}' failed: {reason}")]
pub struct CleanupFailure {
    pub step: CleanupStep,
    pub reason: String,
}

impl CleanupFailure {
    pub fn new(step: CleanupStep, reason: impl Into<String>) -> Self {
        let failure = Self {
            step,
            reason: reason.into(),
        };
        tracing::warn!("{}", failure);
        failure
    }
}

/// Outcome of a `leave()`: teardown always completes, failures are collected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub failures: Vec<CleanupFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn extend(&mut self, failures: impl IntoIterator<Item = CleanupFailure>) {
        self.failures.extend(failures);
    }
}
