use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, Row, TransactionBehavior};
use tracing::{debug, instrument};
use uuid::Uuid;
use zpravy_core::{time, JobId, Page};

use crate::db::init_db;
use crate::error::Result;
use crate::fingerprint::{fingerprint, normalize_url};
use crate::types::{Article, ArticleFilter, IngestReport, RawRecord};

/// The only writer of the `articles` table.
pub struct DedupGate {
    db: Mutex<Connection>,
}

impl DedupGate {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self::new(conn))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate, fingerprint and insert `records` on behalf of `job_id`.
    ///
    /// A record is invalid when its title is blank or its URL is not an
    /// `http(s)` URL with a host. Duplicates (within the batch or against
    /// stored articles) are counted, never reported as errors. The batch is
    /// written in one `IMMEDIATE` transaction so concurrent writers on other
    /// connections queue on `busy_timeout` instead of failing.
    #[instrument(skip_all, fields(job_id = %job_id, records = records.len()))]
    pub fn ingest(&self, job_id: &JobId, records: &[RawRecord]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let now = time::to_db(Utc::now());

        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO articles
                    (id, fingerprint, source, url, title, body, published_at, job_id, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(fingerprint) DO NOTHING",
            )?;

            for record in records {
                let title = record.title.trim();
                if title.is_empty() {
                    debug!(url = %record.canonical_url, "dropping record with blank title");
                    report.invalid_count += 1;
                    continue;
                }
                let url = match normalize_url(&record.canonical_url) {
                    Ok(url) => url,
                    Err(e) => {
                        debug!(url = %record.canonical_url, error = %e, "dropping record with bad url");
                        report.invalid_count += 1;
                        continue;
                    }
                };

                let inserted = insert.execute(params![
                    Uuid::now_v7().to_string(),
                    fingerprint(&url),
                    record.source,
                    url.as_str(),
                    title,
                    record.body,
                    record.published_at.map(time::to_db),
                    job_id.as_str(),
                    now,
                ])?;
                if inserted == 1 {
                    report.new_count += 1;
                } else {
                    report.duplicate_count += 1;
                }
            }
        }
        tx.commit()?;

        debug!(
            new = report.new_count,
            duplicate = report.duplicate_count,
            invalid = report.invalid_count,
            "ingest finished"
        );
        Ok(report)
    }

    /// Stored articles, most recently ingested first.
    pub fn list_articles(&self, filter: &ArticleFilter, page: Page) -> Result<Vec<Article>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT id, fingerprint, source, url, title, body, published_at, job_id, ingested_at
             FROM articles
             WHERE (?1 IS NULL OR source = ?1)
             ORDER BY ingested_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![filter.source.as_deref(), page.limit as i64, page.offset as i64],
            row_to_article,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Number of stored articles matching `filter`, ignoring paging.
    pub fn count(&self, filter: &ArticleFilter) -> Result<u64> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM articles WHERE (?1 IS NULL OR source = ?1)",
            params![filter.source.as_deref()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

fn row_to_article(row: &Row<'_>) -> rusqlite::Result<Article> {
    let parse = |col: usize, s: String| {
        time::from_db(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    };
    let published_at: Option<String> = row.get(6)?;
    Ok(Article {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        source: row.get(2)?,
        url: row.get(3)?,
        title: row.get(4)?,
        body: row.get(5)?,
        published_at: published_at.map(|s| parse(6, s)).transpose()?,
        job_id: row.get(7)?,
        ingested_at: parse(8, row.get(8)?)?,
    })
}
