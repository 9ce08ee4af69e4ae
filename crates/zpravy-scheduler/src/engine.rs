use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use zpravy_core::config::SchedulerConfig;
use zpravy_core::service::shutdown_signalled;
use zpravy_core::{time, JobId, ServiceHandle, SourceRegistry, TriggerId};
use zpravy_executor::{Intake, Lane};
use zpravy_jobs::{JobStore, Trigger};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::{compute_next_run, normalize},
    types::RecurringTrigger,
};

const PURGE_EVERY: Duration = Duration::from_secs(3600);

const TRIGGER_COLUMNS: &str =
    "id, source, trigger_spec, next_run, last_run, fire_count, created_at, updated_at";

/// Creates jobs: on demand through `submit_manual`, and from persisted
/// recurring triggers in a timer loop started with [`Scheduler::start`].
///
/// Owns its own `Connection` for the trigger table; jobs are created through
/// the shared [`JobStore`] and handed to the executor's [`Intake`].
pub struct Scheduler {
    conn: Mutex<Connection>,
    store: Arc<JobStore>,
    intake: Arc<Intake>,
    sources: SourceRegistry,
    tick: Duration,
    retention: Duration,
    initial_delay: Option<Duration>,
}

impl Scheduler {
    /// Create a scheduler, initialising the trigger schema if needed.
    pub fn new(
        conn: Connection,
        store: Arc<JobStore>,
        intake: Arc<Intake>,
        sources: SourceRegistry,
        config: &SchedulerConfig,
    ) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            store,
            intake,
            sources,
            tick: config.tick().max(Duration::from_millis(1)),
            retention: config.retention(),
            initial_delay: config.initial_delay(),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    fn check_source(&self, source: &str) -> Result<()> {
        if self.sources.contains(source) {
            Ok(())
        } else {
            Err(SchedulerError::UnknownSource {
                name: source.to_string(),
            })
        }
    }

    /// Register a recurring trigger for `source`.
    ///
    /// Idempotent per `(source, trigger)`: registering the same pair again
    /// returns the existing row unchanged.
    #[instrument(skip_all, fields(source = %source))]
    pub fn register_recurring(&self, source: &str, trigger: &Trigger) -> Result<RecurringTrigger> {
        self.check_source(source)?;
        let trigger = normalize(trigger)?;

        let now = Utc::now();
        let now_str = time::to_db(now);
        let next = compute_next_run(&trigger, now).map(time::to_db);
        let spec = serde_json::to_string(&trigger)?;

        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT INTO recurring_triggers
             (id, source, trigger_spec, next_run, last_run, fire_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, 0, ?5, ?5)
             ON CONFLICT (source, trigger_spec) DO NOTHING",
            params![TriggerId::new().as_str(), source, spec, next, now_str],
        )?;

        // Read back: covers both the fresh insert and an existing registration.
        let row = conn.query_row(
            &format!(
                "SELECT {TRIGGER_COLUMNS} FROM recurring_triggers
                 WHERE source = ?1 AND trigger_spec = ?2"
            ),
            params![source, spec],
            row_to_trigger,
        )?;

        if inserted == 1 {
            info!(trigger_id = %row.id, "recurring trigger registered");
        } else {
            debug!(trigger_id = %row.id, "recurring trigger already registered");
        }
        Ok(row)
    }

    /// Remove a recurring trigger by ID. Jobs it already created are kept.
    pub fn remove_recurring(&self, id: &TriggerId) -> Result<()> {
        let n = self.conn().execute(
            "DELETE FROM recurring_triggers WHERE id = ?1",
            params![id.as_str()],
        )?;
        if n == 0 {
            return Err(SchedulerError::TriggerNotFound { id: id.to_string() });
        }
        info!(trigger_id = %id, "recurring trigger removed");
        Ok(())
    }

    /// All recurring triggers ordered by source, then creation time.
    pub fn list_recurring(&self) -> Result<Vec<RecurringTrigger>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM recurring_triggers ORDER BY source, created_at"
        ))?;
        let rows = stmt.query_map([], row_to_trigger)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Create a `Pending` manual job for `source` and queue it ahead of
    /// recurring work. Returns as soon as the job is queued.
    #[instrument(skip_all, fields(source = %source))]
    pub fn submit_manual(&self, source: &str) -> Result<JobId> {
        self.check_source(source)?;
        let job = self.store.create(source, &Trigger::Manual)?;
        self.intake.enqueue(job.id.clone(), Lane::Manual);
        info!(job_id = %job.id, "manual job submitted");
        Ok(job.id)
    }

    /// One manual job per configured source, in source-name order.
    pub fn submit_manual_all(&self) -> Result<Vec<JobId>> {
        self.sources
            .names()
            .map(|name| self.submit_manual(name))
            .collect()
    }

    /// Move every overdue trigger to its next future boundary without firing.
    pub fn roll_forward(&self, now: DateTime<Utc>) -> Result<usize> {
        let now_str = time::to_db(now);
        let overdue = self.due_triggers(&now_str)?;

        let conn = self.conn();
        for (id, _, trigger) in &overdue {
            let next = compute_next_run(trigger, now).map(time::to_db);
            conn.execute(
                "UPDATE recurring_triggers SET next_run = ?1, updated_at = ?2 WHERE id = ?3",
                params![next, now_str, id],
            )?;
        }
        if !overdue.is_empty() {
            warn!(count = overdue.len(), "overdue triggers rolled forward on startup");
        }
        Ok(overdue.len())
    }

    /// Fire every trigger whose `next_run` has arrived. Returns the number of
    /// jobs created.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let now_str = time::to_db(now);
        let due = self.due_triggers(&now_str)?;

        let mut fired = 0;
        for (id, source, trigger) in due {
            let job = match self.store.create(&source, &trigger) {
                Ok(job) => job,
                Err(e) => {
                    // Leave next_run alone so the next tick tries again.
                    error!(trigger_id = %id, %source, error = %e, "could not create job");
                    continue;
                }
            };

            self.intake.enqueue(job.id.clone(), Lane::Recurring);

            fired += 1;

            let next = compute_next_run(&trigger, now).map(time::to_db);
            if let Err(e) = self.conn().execute(
                "UPDATE recurring_triggers
                 SET last_run = ?1, next_run = ?2, fire_count = fire_count + 1, updated_at = ?1
                 WHERE id = ?3",
                params![now_str, next, id],
            ) {
                error!(trigger_id = %id, job_id = %job.id, error = %e, "could not plan next firing");
                continue;
            }
            info!(trigger_id = %id, job_id = %job.id, %source, "recurring trigger fired");
        }
        Ok(fired)
    }

    /// Drop finished jobs older than the configured retention.
    pub fn purge(&self, now: DateTime<Utc>) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        Ok(self.store.purge_finished_before(now - retention)?)
    }

    /// Spawn the timer loop. It rolls overdue triggers forward once, then
    /// polls every tick and purges old jobs once an hour. When an initial
    /// delay is configured, every source is scraped once after it elapses.
    pub fn start(self: &Arc<Self>) -> ServiceHandle {
        let this = Arc::clone(self);
        ServiceHandle::spawn("scheduler", move |mut shutdown| async move {
            info!(tick = ?this.tick, "scheduler started");
            if let Err(e) = this.roll_forward(Utc::now()) {
                error!("roll-forward on startup failed: {e}");
            }

            let mut interval = tokio::time::interval(this.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_purge: Option<Instant> = None;

            let startup_scrape = tokio::time::sleep(this.initial_delay.unwrap_or_default());
            tokio::pin!(startup_scrape);
            let mut startup_pending = this.initial_delay.is_some();

            loop {
                tokio::select! {
                    _ = &mut startup_scrape, if startup_pending => {
                        startup_pending = false;
                        match this.submit_manual_all() {
                            Ok(ids) => info!(count = ids.len(), "start-up scrape submitted"),
                            Err(e) => error!("start-up scrape failed: {e}"),
                        }
                    }
                    _ = interval.tick() => {
                        let now = Utc::now();
                        if let Err(e) = this.tick(now) {
                            error!("scheduler tick error: {e}");
                        }
                        if last_purge.map_or(true, |t| t.elapsed() >= PURGE_EVERY) {
                            if let Err(e) = this.purge(now) {
                                error!("job purge failed: {e}");
                            }
                            last_purge = Some(Instant::now());
                        }
                    }
                    _ = shutdown_signalled(&mut shutdown) => {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }

    // --- private helpers ---------------------------------------------------

    /// Triggers with `next_run <= now`. Rows whose spec no longer decodes are
    /// logged and skipped.
    fn due_triggers(&self, now_str: &str) -> Result<Vec<(String, String, Trigger)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, source, trigger_spec FROM recurring_triggers
             WHERE next_run IS NOT NULL AND next_run <= ?1
             ORDER BY next_run, id",
        )?;
        let rows = stmt
            .query_map([now_str], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, source, spec)| match serde_json::from_str::<Trigger>(&spec) {
                Ok(trigger) => Some((id, source, trigger)),
                Err(e) => {
                    error!(trigger_id = %id, "bad trigger JSON: {e}");
                    None
                }
            })
            .collect())
    }
}

fn row_to_trigger(row: &Row<'_>) -> rusqlite::Result<RecurringTrigger> {
    let conv = |col: usize, e: Box<dyn std::error::Error + Send + Sync>| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, e)
    };
    let ts = |col: usize, s: String| time::from_db(&s).map_err(|e| conv(col, Box::new(e)));

    let spec: String = row.get(2)?;
    let next_run: Option<String> = row.get(3)?;
    let last_run: Option<String> = row.get(4)?;
    Ok(RecurringTrigger {
        id: TriggerId::from(row.get::<_, String>(0)?.as_str()),
        source: row.get(1)?,
        trigger: serde_json::from_str(&spec).map_err(|e| conv(2, Box::new(e)))?,
        next_run: next_run.map(|s| ts(3, s)).transpose()?,
        last_run: last_run.map(|s| ts(4, s)).transpose()?,
        fire_count: row.get::<_, i64>(5)? as u64,
        created_at: ts(6, row.get(6)?)?,
        updated_at: ts(7, row.get(7)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zpravy_jobs::{JobFilter, JobStatus};
    use zpravy_core::Page;

    fn scheduler() -> (Scheduler, Arc<JobStore>, Arc<Intake>) {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let intake = Arc::new(Intake::new());
        let sched = Scheduler::new(
            Connection::open_in_memory().unwrap(),
            Arc::clone(&store),
            Arc::clone(&intake),
            SourceRegistry::from_names(["aktualne", "novinky", "idnes"]),
            &SchedulerConfig::default(),
        )
        .unwrap();
        (sched, store, intake)
    }

    fn all_jobs(store: &JobStore) -> Vec<zpravy_jobs::Job> {
        store.list(&JobFilter::default(), Page::default()).unwrap()
    }

    #[test]
    fn zero_interval_is_rejected_without_creating_jobs() {
        let (sched, store, intake) = scheduler();
        let err = sched
            .register_recurring("aktualne", &Trigger::Interval { every_secs: 0 })
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTrigger(_)));
        assert!(sched.list_recurring().unwrap().is_empty());
        assert!(all_jobs(&store).is_empty());
        assert!(intake.is_empty());
    }

    #[test]
    fn unknown_source_and_manual_trigger_are_rejected() {
        let (sched, _, _) = scheduler();
        assert!(matches!(
            sched
                .register_recurring("bbc", &Trigger::Interval { every_secs: 60 })
                .unwrap_err(),
            SchedulerError::UnknownSource { .. }
        ));
        assert!(matches!(
            sched.register_recurring("idnes", &Trigger::Manual).unwrap_err(),
            SchedulerError::InvalidTrigger(_)
        ));
        assert!(matches!(
            sched
                .register_recurring("idnes", &Trigger::Cron { expression: "0 25 * * *".into() })
                .unwrap_err(),
            SchedulerError::InvalidTrigger(_)
        ));
        assert!(matches!(
            sched.submit_manual("bbc").unwrap_err(),
            SchedulerError::UnknownSource { .. }
        ));
    }

    #[test]
    fn registration_is_idempotent() {
        let (sched, _, _) = scheduler();
        let every_two_hours = Trigger::Interval { every_secs: 7200 };
        let a = sched.register_recurring("novinky", &every_two_hours).unwrap();
        let b = sched.register_recurring("novinky", &every_two_hours).unwrap();
        assert_eq!(a.id, b.id);

        let cron_a = sched
            .register_recurring("novinky", &Trigger::Cron { expression: "0 6 * * *".into() })
            .unwrap();
        let cron_b = sched
            .register_recurring("novinky", &Trigger::Cron { expression: " 0  6 * * * ".into() })
            .unwrap();
        assert_eq!(cron_a.id, cron_b.id);
        assert_eq!(sched.list_recurring().unwrap().len(), 2);
    }

    #[test]
    fn remove_recurring() {
        let (sched, _, _) = scheduler();
        let t = sched
            .register_recurring("idnes", &Trigger::Interval { every_secs: 60 })
            .unwrap();
        sched.remove_recurring(&t.id).unwrap();
        assert!(sched.list_recurring().unwrap().is_empty());
        assert!(matches!(
            sched.remove_recurring(&t.id).unwrap_err(),
            SchedulerError::TriggerNotFound { .. }
        ));
    }

    #[test]
    fn manual_jobs_go_to_the_manual_lane() {
        let (sched, store, intake) = scheduler();
        let id = sched.submit_manual("aktualne").unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.trigger, Trigger::Manual);
        assert_eq!(intake.try_next(), Some((id, Lane::Manual)));
    }

    #[test]
    fn submit_all_covers_every_source() {
        let (sched, store, intake) = scheduler();
        let ids = sched.submit_manual_all().unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(intake.len(), 3);
        let mut sources: Vec<_> = all_jobs(&store).into_iter().map(|j| j.source).collect();
        sources.sort();
        assert_eq!(sources, vec!["aktualne", "idnes", "novinky"]);
    }

    #[test]
    fn due_trigger_fires_once_and_plans_from_now() {
        let (sched, store, intake) = scheduler();
        let trigger = Trigger::Interval { every_secs: 60 };
        let t = sched.register_recurring("idnes", &trigger).unwrap();
        let first_due = t.next_run.unwrap();

        assert_eq!(sched.tick(first_due - chrono::Duration::seconds(1)).unwrap(), 0);

        // Ten minutes late: one job, not ten.
        let late = first_due + chrono::Duration::minutes(10);
        assert_eq!(sched.tick(late).unwrap(), 1);
        assert_eq!(sched.tick(late).unwrap(), 0);

        let jobs = all_jobs(&store);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].trigger, trigger);
        assert_eq!(intake.try_next().map(|(_, lane)| lane), Some(Lane::Recurring));

        let t = &sched.list_recurring().unwrap()[0];
        assert_eq!(t.fire_count, 1);
        assert_eq!(t.next_run.unwrap().timestamp(), (late + chrono::Duration::seconds(60)).timestamp());
        assert_eq!(t.last_run.unwrap().timestamp(), late.timestamp());
    }

    #[test]
    fn roll_forward_skips_missed_firings() {
        let (sched, store, _) = scheduler();
        let t = sched
            .register_recurring("aktualne", &Trigger::Interval { every_secs: 60 })
            .unwrap();
        let restart = t.next_run.unwrap() + chrono::Duration::hours(3);

        assert_eq!(sched.roll_forward(restart).unwrap(), 1);
        assert_eq!(sched.tick(restart).unwrap(), 0);
        assert!(all_jobs(&store).is_empty());

        let t = &sched.list_recurring().unwrap()[0];
        assert!(t.next_run.unwrap() > restart);
        assert_eq!(t.fire_count, 0);
    }

    #[test]
    fn purge_respects_retention() {
        let (sched, store, _) = scheduler();
        let id = sched.submit_manual("novinky").unwrap();
        store
            .transition(
                &id,
                JobStatus::Pending,
                JobStatus::Cancelled,
                zpravy_jobs::Payload::Empty,
            )
            .unwrap();

        assert_eq!(sched.purge(Utc::now()).unwrap(), 0);
        assert_eq!(
            sched.purge(Utc::now() + chrono::Duration::hours(25)).unwrap(),
            1
        );
    }

    #[test]
    fn failed_replan_does_not_stop_other_triggers() {
        let (sched, store, intake) = scheduler();
        let every_minute = Trigger::Interval { every_secs: 60 };
        let idnes = sched.register_recurring("idnes", &every_minute).unwrap();
        let novinky = sched.register_recurring("novinky", &every_minute).unwrap();
        let due = idnes.next_run.unwrap().max(novinky.next_run.unwrap());

        sched
            .conn()
            .execute_batch(
                "CREATE TEMP TRIGGER freeze_idnes BEFORE UPDATE ON recurring_triggers
                 WHEN OLD.source = 'idnes'
                 BEGIN SELECT RAISE(ABORT, 'read-only'); END;",
            )
            .unwrap();

        assert_eq!(sched.tick(due).unwrap(), 2);
        assert_eq!(all_jobs(&store).len(), 2);
        assert_eq!(intake.len(), 2);

        let triggers = sched.list_recurring().unwrap();
        let fired = |source: &str| triggers.iter().find(|t| t.source == source).unwrap().fire_count;
        assert_eq!(fired("idnes"), 0);
        assert_eq!(fired("novinky"), 1);
    }

    fn scheduler_with(config: SchedulerConfig, sources: &[&str]) -> (Arc<Scheduler>, Arc<Intake>) {
        let intake = Arc::new(Intake::new());
        let sched = Arc::new(
            Scheduler::new(
                Connection::open_in_memory().unwrap(),
                Arc::new(JobStore::open_in_memory().unwrap()),
                Arc::clone(&intake),
                SourceRegistry::from_names(sources.iter().copied()),
                &config,
            )
            .unwrap(),
        );
        (sched, intake)
    }

    #[tokio::test]
    async fn startup_scrape_submits_every_source_once() {
        let config = SchedulerConfig {
            tick_ms: 10,
            initial_delay_secs: 1,
            ..SchedulerConfig::default()
        };
        let (sched, intake) = scheduler_with(config, &["aktualne", "blesk"]);

        let handle = sched.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(intake.is_empty());
        tokio::time::sleep(Duration::from_millis(1200)).await;
        handle.stop().await;

        assert_eq!(intake.len(), 2);
        assert_eq!(intake.try_next().map(|(_, lane)| lane), Some(Lane::Manual));
    }

    #[tokio::test]
    async fn startup_scrape_can_be_disabled() {
        let config = SchedulerConfig {
            tick_ms: 10,
            initial_delay_secs: 0,
            ..SchedulerConfig::default()
        };
        let (sched, intake) = scheduler_with(config, &["aktualne", "blesk"]);

        let handle = sched.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop().await;

        assert!(intake.is_empty());
    }

    #[tokio::test]
    async fn timer_loop_fires_due_triggers() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let intake = Arc::new(Intake::new());
        let config = SchedulerConfig {
            tick_ms: 10,
            ..SchedulerConfig::default()
        };
        let sched = Arc::new(
            Scheduler::new(
                Connection::open_in_memory().unwrap(),
                Arc::clone(&store),
                Arc::clone(&intake),
                SourceRegistry::from_names(["ct24"]),
                &config,
            )
            .unwrap(),
        );
        sched
            .register_recurring("ct24", &Trigger::Interval { every_secs: 1 })
            .unwrap();

        let handle = sched.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.stop().await;

        assert!(!intake.is_empty());
        assert!(sched.list_recurring().unwrap()[0].fire_count >= 1);
    }
}
