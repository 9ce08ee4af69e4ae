use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument, warn};
use zpravy_core::{time, JobId, Page};

use crate::db::init_db;
use crate::error::{JobError, Result};
use crate::types::{
    FailureKind, Job, JobCounts, JobFailure, JobFilter, JobResult, JobStatus, Payload, Recovery,
    Trigger,
};

const JOB_COLUMNS: &str = "id, source, trigger_spec, status, progress, attempts, created_at,
                           started_at, finished_at, result, error";

/// Durable home of every job record.
///
/// All mutation goes through compare-and-swap `UPDATE … WHERE status = ?from`
/// statements, so two writers (even on separate connections) can never both
/// move a job out of the same state.
pub struct JobStore {
    db: Mutex<Connection>,
}

impl JobStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Fresh in-memory store with the schema applied. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self::new(conn))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied
        // statement behind, so the connection is still usable.
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a new `Pending` job with progress 0.
    #[instrument(skip_all, fields(source = %source))]
    pub fn create(&self, source: &str, trigger: &Trigger) -> Result<Job> {
        let id = JobId::new();
        let now = Utc::now();
        let now_s = time::to_db(now);
        let trigger_json = serde_json::to_string(trigger)?;

        self.conn().execute(
            "INSERT INTO jobs (id, source, trigger_spec, status, progress, attempts,
                               created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', 0, 0, ?4, ?4)",
            params![id.as_str(), source, trigger_json, now_s],
        )?;

        debug!(job_id = %id, "job created");
        Ok(Job {
            id,
            source: source.to_string(),
            trigger: trigger.clone(),
            status: JobStatus::Pending,
            progress: 0.0,
            attempts: 0,
            // Round-trip through the storage encoding so the copy matches `get`.
            created_at: time::from_db(&now_s).unwrap_or(now),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        })
    }

    /// Atomically move `id` from `from` to `to`, writing `payload`.
    ///
    /// Fails with [`JobError::InvalidTransition`] if the edge is not in the
    /// lifecycle graph or the stored status is no longer `from`; the record is
    /// then left unchanged. `started_at` is written on entering `Running`,
    /// `finished_at` on entering any terminal state, and a success pins
    /// progress to 1.
    #[instrument(skip_all, fields(job_id = %id, %from, %to))]
    pub fn transition(
        &self,
        id: &JobId,
        from: JobStatus,
        to: JobStatus,
        payload: Payload,
    ) -> Result<Job> {
        if !payload.fits(to) {
            return Err(JobError::InvalidPayload { to });
        }

        let db = self.conn();
        if !from.can_transition_to(to) {
            let current = current_status(&db, id)?;
            return Err(JobError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
                current,
            });
        }

        let (result_json, error_json) = match &payload {
            Payload::Empty => (None, None),
            Payload::Result(r) => (Some(serde_json::to_string(r)?), None),
            Payload::Error(e) => (None, Some(serde_json::to_string(e)?)),
        };
        let now = time::now_db();

        let changed = db.execute(
            "UPDATE jobs
             SET status      = ?1,
                 started_at  = CASE WHEN ?1 = 'running' THEN COALESCE(started_at, ?2)
                                    ELSE started_at END,
                 finished_at = CASE WHEN ?3 THEN COALESCE(finished_at, ?2)
                                    ELSE finished_at END,
                 progress    = CASE WHEN ?1 = 'succeeded' THEN 1.0 ELSE progress END,
                 result      = COALESCE(?4, result),
                 error       = COALESCE(?5, error),
                 updated_at  = ?2
             WHERE id = ?6 AND status = ?7",
            params![
                to.as_str(),
                now,
                to.is_terminal(),
                result_json,
                error_json,
                id.as_str(),
                from.as_str(),
            ],
        )?;

        if changed == 0 {
            let current = current_status(&db, id)?;
            debug!(%current, "transition lost compare-and-swap");
            return Err(JobError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
                current,
            });
        }

        debug!("job transitioned");
        fetch_job(&db, id)
    }

    /// Raise the progress of a `Running` job.
    ///
    /// `progress` is clamped to `[0, 1]`. Values below the stored progress
    /// are ignored (progress never moves backwards). Returns the progress
    /// now stored.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn update_progress(&self, id: &JobId, progress: f64) -> Result<f64> {
        if progress.is_nan() {
            return Err(JobError::InvalidProgress(progress));
        }
        let progress = progress.clamp(0.0, 1.0);

        let db = self.conn();
        let stored: Option<f64> = db
            .query_row(
                "UPDATE jobs
                 SET progress = MAX(progress, ?1), updated_at = ?2
                 WHERE id = ?3 AND status = 'running'
                 RETURNING progress",
                params![progress, time::now_db(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(p) => Ok(p),
            None => {
                let status = current_status(&db, id)?;
                Err(JobError::ProgressRejected {
                    id: id.to_string(),
                    status,
                })
            }
        }
    }

    /// Count one more fetch attempt against a `Running` job.
    pub fn record_attempt(&self, id: &JobId) -> Result<u32> {
        let db = self.conn();
        let attempts: Option<i64> = db
            .query_row(
                "UPDATE jobs SET attempts = attempts + 1, updated_at = ?1
                 WHERE id = ?2 AND status = 'running'
                 RETURNING attempts",
                params![time::now_db(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match attempts {
            Some(n) => Ok(n as u32),
            None => {
                let status = current_status(&db, id)?;
                Err(JobError::ProgressRejected {
                    id: id.to_string(),
                    status,
                })
            }
        }
    }

    /// Load a single job.
    pub fn get(&self, id: &JobId) -> Result<Job> {
        fetch_job(&self.conn(), id)
    }

    /// Jobs matching `filter`, newest first.
    ///
    /// Each call is a single `SELECT`, so the page is a consistent snapshot.
    pub fn list(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>> {
        let db = self.conn();
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE (?1 IS NULL OR source = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3 OFFSET ?4"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filter.source.as_deref(),
                filter.status.map(JobStatus::as_str),
                page.limit as i64,
                page.offset as i64,
            ],
            row_to_job,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Number of jobs in each status.
    pub fn count_by_status(&self) -> Result<JobCounts> {
        let db = self.conn();
        let mut stmt = db.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = JobCounts::default();
        for row in rows {
            let (status, n) = row?;
            match status.parse::<JobStatus>() {
                Ok(s) => *counts.slot(s) = n as u64,
                Err(e) => warn!(error = %e, "skipping unknown status in counts"),
            }
        }
        Ok(counts)
    }

    /// Delete terminal jobs that finished before `cutoff`. Returns the number
    /// of rows removed.
    #[instrument(skip(self))]
    pub fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM jobs
             WHERE finished_at IS NOT NULL
               AND status IN ('succeeded','failed','timed_out','cancelled')
               AND finished_at < ?1",
            params![time::to_db(cutoff)],
        )?;
        if removed > 0 {
            info!(removed, "purged finished jobs");
        }
        Ok(removed)
    }

    /// Reconcile records left behind by a previous process.
    ///
    /// `Running` jobs cannot be resumed (their fetch died with the process) and
    /// become `Failed` with kind `interrupted`. `Pending` jobs are returned,
    /// oldest first, so the caller can enqueue them again.
    #[instrument(skip(self))]
    pub fn recover_interrupted(&self) -> Result<Recovery> {
        let mut db = self.conn();
        let tx = db.transaction()?;

        let failure = JobFailure::new(
            FailureKind::Interrupted,
            "process stopped while the job was running",
        );
        let now = time::now_db();
        let interrupted = tx.execute(
            "UPDATE jobs
             SET status = 'failed', error = ?1, finished_at = ?2, updated_at = ?2
             WHERE status = 'running'",
            params![serde_json::to_string(&failure)?, now],
        )?;

        let pending = {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending'
                 ORDER BY created_at ASC, id ASC"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_job)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;

        if interrupted > 0 || !pending.is_empty() {
            info!(
                interrupted,
                pending = pending.len(),
                "recovered jobs from previous run"
            );
        }
        Ok(Recovery {
            interrupted,
            pending,
        })
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn current_status(db: &Connection, id: &JobId) -> Result<JobStatus> {
    let status: Option<String> = db
        .query_row(
            "SELECT status FROM jobs WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let status = status.ok_or_else(|| JobError::NotFound { id: id.to_string() })?;
    status
        .parse()
        .map_err(|e: String| JobError::Database(conversion_error(3, e)))
}

fn fetch_job(db: &Connection, id: &JobId) -> Result<Job> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
    db.query_row(&sql, params![id.as_str()], row_to_job)
        .optional()?
        .ok_or_else(|| JobError::NotFound { id: id.to_string() })
}

fn conversion_error(
    col: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, e.into())
}

fn parse_ts(col: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    time::from_db(s).map_err(|e| conversion_error(col, e))
}

fn parse_opt_ts(col: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(col, &s)).transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(col: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| conversion_error(col, e))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let trigger_json: String = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(6)?;
    let result: Option<String> = row.get(9)?;
    let error: Option<String> = row.get(10)?;

    Ok(Job {
        id: JobId::from(row.get::<_, String>(0)?),
        source: row.get(1)?,
        trigger: parse_json(2, &trigger_json)?,
        status: status.parse().map_err(|e: String| conversion_error(3, e))?,
        progress: row.get(4)?,
        attempts: row.get::<_, i64>(5)? as u32,
        created_at: parse_ts(6, &created_at)?,
        started_at: parse_opt_ts(7, row.get(7)?)?,
        finished_at: parse_opt_ts(8, row.get(8)?)?,
        result: result
            .map(|s| parse_json::<JobResult>(9, &s))
            .transpose()?,
        error: error
            .map(|s| parse_json::<JobFailure>(10, &s))
            .transpose()?,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
