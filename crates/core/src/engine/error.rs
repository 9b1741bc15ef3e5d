//! Error types for the engine module.

use thiserror::Error;

use super::types::JobId;
use crate::transcoder::{ErrorKind, TranscodeError};

/// Errors returned synchronously by engine operations.
///
/// Runtime failures of a job are not errors of the call that submitted it;
/// they arrive as its terminal [`JobResult`](super::JobResult).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The profile was rejected. No I/O was performed.
    #[error("Invalid profile: {reason}")]
    InvalidProfile { reason: String },

    /// The request itself is malformed or names paths outside the allowed roots.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// No job with this id is known.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// The engine is shutting down and accepts no new jobs.
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// Probing a media file failed.
    #[error("Probe failed: {0}")]
    Probe(TranscodeError),
}

impl EngineError {
    pub fn invalid_profile(reason: impl Into<String>) -> Self {
        Self::InvalidProfile {
            reason: reason.into(),
        }
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// The error kind, for errors that carry one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::InvalidProfile { .. } => Some(ErrorKind::InvalidProfile),
            Self::Probe(e) => Some(e.kind()),
            _ => None,
        }
    }
}

impl From<TranscodeError> for EngineError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::InvalidProfile { reason } => Self::InvalidProfile { reason },
            other => Self::Probe(other),
        }
    }
}
