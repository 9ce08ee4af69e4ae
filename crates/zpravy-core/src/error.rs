use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZpravyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown source: {name}")]
    UnknownSource { name: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Trigger not found: {id}")]
    TriggerNotFound { id: String },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ZpravyError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ZpravyError::Config(_) => "CONFIG_ERROR",
            ZpravyError::UnknownSource { .. } => "UNKNOWN_SOURCE",
            ZpravyError::JobNotFound { .. } => "JOB_NOT_FOUND",
            ZpravyError::TriggerNotFound { .. } => "TRIGGER_NOT_FOUND",
            ZpravyError::InvalidTransition(_) => "INVALID_TRANSITION",
            ZpravyError::InvalidRequest(_) => "INVALID_REQUEST",
            ZpravyError::Database(_) => "DATABASE_ERROR",
            ZpravyError::Serialization(_) => "SERIALIZATION_ERROR",
            ZpravyError::Io(_) => "IO_ERROR",
            ZpravyError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ZpravyError>;
