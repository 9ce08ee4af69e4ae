use thiserror::Error;
use zpravy_core::ZpravyError;

use crate::types::JobStatus;

/// Errors returned by the job record store.
#[derive(Debug, Error)]
pub enum JobError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    NotFound { id: String },

    /// The requested edge is not in the lifecycle graph, or the job is no
    /// longer in `from`. The stored row is left untouched.
    #[error("Invalid transition for job {id}: {from} -> {to} (current: {current})")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
        current: JobStatus,
    },

    /// The payload does not match the target status.
    #[error("Invalid payload for transition to {to}")]
    InvalidPayload { to: JobStatus },

    /// Progress can only move while the job is `Running`.
    #[error("Progress update rejected for job {id} in status {status}")]
    ProgressRejected { id: String, status: JobStatus },

    #[error("Progress must be a number, got {0}")]
    InvalidProgress(f64),
}

impl JobError {
    /// The status observed in the store when a transition was refused.
    pub fn current_status(&self) -> Option<JobStatus> {
        match self {
            JobError::InvalidTransition { current, .. } => Some(*current),
            JobError::ProgressRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<JobError> for ZpravyError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::NotFound { id } => ZpravyError::JobNotFound { id },
            e @ JobError::InvalidTransition { .. } => ZpravyError::InvalidTransition(e.to_string()),
            e @ JobError::ProgressRejected { .. } => ZpravyError::InvalidTransition(e.to_string()),
            e @ (JobError::InvalidPayload { .. } | JobError::InvalidProgress(_)) => {
                ZpravyError::InvalidRequest(e.to_string())
            }
            JobError::Serialization(e) => ZpravyError::Serialization(e),
            JobError::Database(e) => ZpravyError::Database(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
