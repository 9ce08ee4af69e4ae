use thiserror::Error;
use zpravy_core::ZpravyError;
use zpravy_jobs::JobError;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Job(#[from] JobError),

    /// Cancellation lost every race against concurrent transitions.
    #[error("Could not cancel job {id}: status kept changing")]
    CancelContended { id: String },
}

impl From<ExecutorError> for ZpravyError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Job(e) => e.into(),
            e @ ExecutorError::CancelContended { .. } => ZpravyError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
