use thiserror::Error;
use zpravy_core::ZpravyError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<IngestError> for ZpravyError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Database(e) => ZpravyError::Database(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
