use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zpravy_jobs::JobResult;

/// One article as returned by a fetcher. Not persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Filled in by the fetcher when the feed does not carry it.
    #[serde(default)]
    pub source: String,
    #[serde(alias = "url")]
    pub canonical_url: String,
    pub title: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: String,
}

/// A stored, deduplicated article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub fingerprint: String,
    pub source: String,
    /// Normalised URL the fingerprint was computed from.
    pub url: String,
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Job that first ingested this article.
    pub job_id: String,
    pub ingested_at: DateTime<Utc>,
}

/// Outcome of one [`DedupGate::ingest`](crate::DedupGate::ingest) call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub new_count: u32,
    pub duplicate_count: u32,
    pub invalid_count: u32,
}

impl From<IngestReport> for JobResult {
    fn from(r: IngestReport) -> Self {
        JobResult {
            new_count: r.new_count,
            duplicate_count: r.duplicate_count,
            invalid_count: r.invalid_count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleFilter {
    pub source: Option<String>,
}
