use rusqlite::Connection;

use crate::error::Result;

/// Initialise the article schema in `conn` (idempotent).
///
/// `fingerprint` carries the only uniqueness constraint; the gate relies on it
/// for insert-or-conflict deduplication. `job_id` is informational and has no
/// foreign key, since finished jobs are purged while their articles stay.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS articles (
            id           TEXT NOT NULL PRIMARY KEY,
            fingerprint  TEXT NOT NULL UNIQUE,
            source       TEXT NOT NULL,
            url          TEXT NOT NULL,
            title        TEXT NOT NULL,
            body         TEXT NOT NULL DEFAULT '',
            published_at TEXT,
            job_id       TEXT NOT NULL,
            ingested_at  TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_articles_ingested ON articles (ingested_at DESC, id DESC);
        CREATE INDEX IF NOT EXISTS idx_articles_source   ON articles (source, ingested_at DESC);
        ",
    )?;
    Ok(())
}
