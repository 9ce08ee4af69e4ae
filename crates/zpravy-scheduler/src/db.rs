use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `recurring_triggers` table (idempotent) and an index on
/// `next_run` for the polling query. `UNIQUE (source, trigger_spec)` makes
/// registration idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS recurring_triggers (
            id           TEXT    NOT NULL PRIMARY KEY,
            source       TEXT    NOT NULL,
            trigger_spec TEXT    NOT NULL,   -- JSON-encoded Trigger enum
            next_run     TEXT,
            last_run     TEXT,
            fire_count   INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL,
            UNIQUE (source, trigger_spec)
        ) STRICT;

        -- Efficient polling: SELECT … WHERE next_run <= ?
        CREATE INDEX IF NOT EXISTS idx_triggers_next_run ON recurring_triggers (next_run);
        ",
    )?;
    Ok(())
}
