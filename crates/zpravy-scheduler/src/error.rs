use thiserror::Error;
use zpravy_core::ZpravyError;
use zpravy_jobs::JobError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The source is not in the configured registry.
    #[error("Unknown source: {name}")]
    UnknownSource { name: String },

    /// The trigger cannot recur: `manual`, a zero interval, or a cron
    /// expression that does not parse.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// No recurring trigger with the given ID exists.
    #[error("Trigger not found: {id}")]
    TriggerNotFound { id: String },

    #[error(transparent)]
    Jobs(#[from] JobError),
}

impl From<SchedulerError> for ZpravyError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::UnknownSource { name } => ZpravyError::UnknownSource { name },
            SchedulerError::InvalidTrigger(msg) => ZpravyError::Config(msg),
            SchedulerError::TriggerNotFound { id } => ZpravyError::TriggerNotFound { id },
            SchedulerError::Jobs(e) => e.into(),
            SchedulerError::Serialization(e) => ZpravyError::Serialization(e),
            SchedulerError::Database(e) => ZpravyError::Database(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
