use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job record schema in `conn`.
///
/// Creates the `jobs` table (idempotent). The `CHECK` on `status` keeps the
/// column closed to the six lifecycle states even for hand-written SQL.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id           TEXT    NOT NULL PRIMARY KEY,
            source       TEXT    NOT NULL,
            trigger_spec TEXT    NOT NULL,   -- JSON-encoded Trigger enum
            status       TEXT    NOT NULL DEFAULT 'pending'
                         CHECK (status IN ('pending','running','succeeded',
                                           'failed','timed_out','cancelled')),
            progress     REAL    NOT NULL DEFAULT 0
                         CHECK (progress >= 0 AND progress <= 1),
            attempts     INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT    NOT NULL,
            started_at   TEXT,               -- written once, on Pending -> Running
            finished_at  TEXT,               -- written once, on the terminal edge
            result       TEXT,               -- JSON JobResult, succeeded only
            error        TEXT,               -- JSON JobFailure, failed/timed_out only
            updated_at   TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs (created_at DESC, id DESC);
        CREATE INDEX IF NOT EXISTS idx_jobs_source  ON jobs (source, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_jobs_status  ON jobs (status);
        ",
    )?;
    Ok(())
}
