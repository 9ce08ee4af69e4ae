//! Timestamp encoding shared by every SQLite table.
//!
//! Fixed-width RFC 3339 with microseconds and a `Z` suffix, so that string
//! comparison in SQL (`finished_at < ?`, `next_run <= ?`) matches time order.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn from_db(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

pub fn now_db() -> String {
    to_db(Utc::now())
}
