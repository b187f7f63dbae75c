//! Error types for the playout daemon.
use playout_proto::request::{Failure, FailureKind, RequestId, RequestStatus};
use thiserror::Error;

/// Why a playback session could not run to its natural end.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// Song locator does not name a playable video.
    #[error("unrecognised song locator: {0}")]
    PayloadParse(String),

    /// Safety deadline passed before the engine signalled readiness.
    #[error("{engine} engine did not respond within {secs:.1}s")]
    EngineTimeout { engine: &'static str, secs: f64 },

    /// Engine explicitly reported a playback failure.
    #[error("{engine} engine error: {detail}")]
    Engine { engine: &'static str, detail: String },

    /// Engine could not be started at all (binary missing, IPC down).
    #[error("{engine} engine unavailable: {detail}")]
    Unavailable { engine: &'static str, detail: String },
}

impl PlaybackError {
    /// Terminal status detail recorded on the request.
    pub fn to_failure(&self) -> Failure {
        let kind = match self {
            PlaybackError::PayloadParse(_) => FailureKind::PayloadParse,
            PlaybackError::EngineTimeout { .. } => FailureKind::EngineTimeout,
            PlaybackError::Engine { .. } | PlaybackError::Unavailable { .. } => {
                FailureKind::EngineError
            }
        };
        Failure {
            kind,
            detail: self.to_string(),
        }
    }
}

/// Request store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("request {0} not found")]
    NotFound(RequestId),

    #[error("request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: RequestId,
        from: &'static str,
        to: &'static str,
    },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("store write failed: {0}")]
    Write(String),

    #[error("store file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store file is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn invalid_transition(id: RequestId, from: &RequestStatus, to: &RequestStatus) -> Self {
        StoreError::InvalidTransition {
            id,
            from: from.label(),
            to: to.label(),
        }
    }
}

/// Convenience Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
