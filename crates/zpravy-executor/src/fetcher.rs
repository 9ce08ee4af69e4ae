//! The seam between the executor and source-specific extraction.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use zpravy_ingest::RawRecord;

/// Everything a fetcher needs for one attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub source: String,
    /// Instant after which the executor stops waiting for the answer.
    pub deadline: Instant,
    pub max_articles: usize,
    /// Cancelled when the job is cancelled or times out. Fetchers should poll
    /// it between network round-trips.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Connection failure, timeout or 5xx. Retried with backoff.
    Network,
    /// The source refused the request. Not retried.
    Blocked,
    /// The response could not be decoded. Not retried.
    Parse,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Network => write!(f, "network"),
            FetchErrorKind::Blocked => write!(f, "blocked"),
            FetchErrorKind::Parse => write!(f, "parse"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Network,
            message: message.into(),
        }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Blocked,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Parse,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FetchErrorKind::Network
    }
}

/// Source-specific article extraction.
///
/// Implementations must be cheap to share: the executor calls `fetch`
/// concurrently from up to `max_concurrent_jobs` workers.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, req: FetchRequest) -> Result<Vec<RawRecord>, FetchError>;
}
