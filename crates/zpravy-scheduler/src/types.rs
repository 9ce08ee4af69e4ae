use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zpravy_core::TriggerId;
use zpravy_jobs::Trigger;

/// A persisted recurring trigger: "scrape `source` on `trigger`".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringTrigger {
    pub id: TriggerId,
    pub source: String,
    pub trigger: Trigger,
    /// Next planned firing. `None` only for a cron expression that can never
    /// match again.
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    /// Number of jobs this trigger has created.
    pub fire_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
