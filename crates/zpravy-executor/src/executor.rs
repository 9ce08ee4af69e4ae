use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use zpravy_core::config::ExecutorConfig;
use zpravy_core::service::shutdown_signalled;
use zpravy_core::{JobId, ServiceHandle};
use zpravy_ingest::DedupGate;
use zpravy_jobs::{
    FailureKind, JobError, JobFailure, JobResult, JobStatus, JobStore, Payload, Trigger,
};

use crate::error::{ExecutorError, Result};
use crate::fetcher::{FetchError, FetchErrorKind, FetchRequest, Fetcher, RawRecord};
use crate::intake::{Intake, Lane};
use crate::retry::RetryPolicy;

/// Runtime knobs of the executor, resolved from [`ExecutorConfig`].
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_concurrent_jobs: usize,
    /// Wall-clock budget for the whole `Running` phase, retries included.
    pub job_timeout: Duration,
    pub max_articles: usize,
    pub retry: RetryPolicy,
}

impl From<&ExecutorConfig> for ExecutorSettings {
    fn from(cfg: &ExecutorConfig) -> Self {
        Self {
            max_concurrent_jobs: cfg.max_concurrent_jobs.max(1),
            job_timeout: cfg.job_timeout(),
            max_articles: cfg.max_articles_per_source,
            retry: RetryPolicy::from(cfg),
        }
    }
}

/// What [`Executor::cancel`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job had no live worker and was moved to `Cancelled` directly.
    Cancelled,
    /// A worker owns the job; it will record `Cancelled` once it observes
    /// the signal.
    Signalled,
}

enum RunOutcome {
    Fetched(Vec<RawRecord>),
    FetchFailed(FetchError),
    TimedOut,
    Cancelled,
}

/// Bounded worker pool draining the [`Intake`].
///
/// A dispatch loop acquires a semaphore permit, then pops the next job, so
/// at most `max_concurrent_jobs` jobs are ever `Running`. Each worker owns a
/// [`CancellationToken`] registered under its job id for the duration of the
/// run. Worker tokens are children of one executor-wide token, so stopping
/// reaches workers that have been spawned but not yet registered.
pub struct Executor {
    store: Arc<JobStore>,
    gate: Arc<DedupGate>,
    fetcher: Arc<dyn Fetcher>,
    intake: Arc<Intake>,
    settings: ExecutorSettings,
    permits: Arc<Semaphore>,
    live: DashMap<JobId, CancellationToken>,
    shutdown: CancellationToken,
}

impl Executor {
    pub fn new(
        store: Arc<JobStore>,
        gate: Arc<DedupGate>,
        fetcher: Arc<dyn Fetcher>,
        intake: Arc<Intake>,
        settings: ExecutorSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        Self {
            store,
            gate,
            fetcher,
            intake,
            settings,
            permits,
            live: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn intake(&self) -> Arc<Intake> {
        Arc::clone(&self.intake)
    }

    /// Number of jobs with a live worker.
    pub fn active_workers(&self) -> usize {
        self.live.len()
    }

    /// Reconcile the store after a restart and queue surviving `Pending`
    /// jobs. Call before [`start`](Self::start). Returns the number of jobs
    /// re-queued.
    pub fn recover(&self) -> Result<usize> {
        let recovery = self.store.recover_interrupted()?;
        let requeued = recovery.pending.len();
        for job in recovery.pending {
            let lane = match job.trigger {
                Trigger::Manual => Lane::Manual,
                Trigger::Interval { .. } | Trigger::Cron { .. } => Lane::Recurring,
            };
            self.intake.enqueue(job.id, lane);
        }
        Ok(requeued)
    }

    /// Spawn the dispatch loop.
    ///
    /// On stop, every dispatched worker is signalled and awaited, so their
    /// jobs end `Cancelled` rather than being left `Running`. Jobs still in
    /// the intake stay `Pending` and are picked up by [`recover`](Self::recover)
    /// on the next start. An executor is not restartable once stopped.
    pub fn start(self: &Arc<Self>) -> ServiceHandle {
        let this = Arc::clone(self);
        ServiceHandle::spawn("executor", move |mut shutdown| async move {
            info!(
                max_concurrent_jobs = this.settings.max_concurrent_jobs,
                "executor dispatch loop started"
            );
            let mut workers = JoinSet::new();

            loop {
                while let Some(res) = workers.try_join_next() {
                    if let Err(e) = res {
                        error!("job worker panicked: {e}");
                    }
                }

                let permit = tokio::select! {
                    _ = shutdown_signalled(&mut shutdown) => break,
                    permit = Arc::clone(&this.permits).acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };

                let (job_id, lane) = tokio::select! {
                    _ = shutdown_signalled(&mut shutdown) => break,
                    next = this.intake.next() => next,
                };

                let worker = Arc::clone(&this);
                workers.spawn(async move {
                    worker.run_job(job_id, lane).await;
                    drop(permit);
                });
            }

            this.shutdown.cancel();
            while let Some(res) = workers.join_next().await {
                if let Err(e) = res {
                    error!("job worker panicked: {e}");
                }
            }
            info!("executor dispatch loop stopped");
        })
    }

    /// Cancel a job.
    ///
    /// A job owned by a live worker is signalled; the worker records
    /// `Cancelled`. A `Pending` job not yet picked up, or a `Running` job
    /// whose worker is gone, is transitioned directly. Terminal jobs yield
    /// `JobError::InvalidTransition`; unknown ids `JobError::NotFound`.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn cancel(&self, id: &JobId) -> Result<CancelOutcome> {
        for _ in 0..3 {
            if let Some(token) = self.live.get(id) {
                token.cancel();
                info!("cancellation signalled to worker");
                return Ok(CancelOutcome::Signalled);
            }

            let job = self.store.get(id)?;
            if job.status.is_terminal() {
                return Err(JobError::InvalidTransition {
                    id: id.to_string(),
                    from: job.status,
                    to: JobStatus::Cancelled,
                    current: job.status,
                }
                .into());
            }

            match self
                .store
                .transition(id, job.status, JobStatus::Cancelled, Payload::Empty)
            {
                Ok(_) => {
                    info!(from = %job.status, "job cancelled without a worker");
                    return Ok(CancelOutcome::Cancelled);
                }
                // A worker picked the job up in between; look again.
                Err(JobError::InvalidTransition { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ExecutorError::CancelContended { id: id.to_string() })
    }

    async fn run_job(&self, job_id: JobId, lane: Lane) {
        let token = self.shutdown.child_token();
        self.live.insert(job_id.clone(), token.clone());
        self.drive(&job_id, lane, &token).await;
        self.live.remove(&job_id);
    }

    #[instrument(skip_all, fields(job_id = %job_id, ?lane))]
    async fn drive(&self, job_id: &JobId, lane: Lane, token: &CancellationToken) {
        if token.is_cancelled() {
            self.finish(job_id, JobStatus::Pending, JobStatus::Cancelled, Payload::Empty);
            return;
        }

        let job = match self.store.transition(
            job_id,
            JobStatus::Pending,
            JobStatus::Running,
            Payload::Empty,
        ) {
            Ok(job) => job,
            Err(JobError::InvalidTransition { current, .. }) => {
                debug!(%current, "job left Pending before pickup, skipping");
                return;
            }
            Err(JobError::NotFound { .. }) => {
                debug!("job purged before pickup, skipping");
                return;
            }
            Err(e) => {
                error!(error = %e, "could not start job, re-queueing");
                tokio::select! {
                    _ = token.cancelled() => {
                        self.finish(job_id, JobStatus::Pending, JobStatus::Cancelled, Payload::Empty);
                    }
                    _ = tokio::time::sleep(self.settings.retry.base_delay) => {
                        self.intake.enqueue(job_id.clone(), lane);
                    }
                }
                return;
            }
        };
        info!(source = %job.source, "job started");

        let deadline = deadline_after(self.settings.job_timeout);
        let fetch_token = token.child_token();

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => RunOutcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => RunOutcome::TimedOut,
            res = self.fetch_with_retry(job_id, &job.source, deadline, &fetch_token) => match res {
                Ok(records) => RunOutcome::Fetched(records),
                Err(e) => RunOutcome::FetchFailed(e),
            },
        };
        // Tell a still-running fetch to stop; its result is discarded either way.
        fetch_token.cancel();

        let outcome = match outcome {
            RunOutcome::Fetched(_) if token.is_cancelled() => RunOutcome::Cancelled,
            other => other,
        };

        match outcome {
            RunOutcome::Fetched(records) => self.complete(job_id, &records),
            RunOutcome::FetchFailed(e) => {
                warn!(error = %e, "fetch failed");
                let kind = match e.kind {
                    FetchErrorKind::Network => FailureKind::Network,
                    FetchErrorKind::Blocked => FailureKind::Blocked,
                    FetchErrorKind::Parse => FailureKind::Parse,
                };
                self.finish(
                    job_id,
                    JobStatus::Running,
                    JobStatus::Failed,
                    Payload::Error(JobFailure::new(kind, e.message)),
                );
            }
            RunOutcome::TimedOut => {
                warn!(timeout = ?self.settings.job_timeout, "job timed out");
                let message = format!(
                    "no result within {}s",
                    self.settings.job_timeout.as_secs_f64()
                );
                self.finish(
                    job_id,
                    JobStatus::Running,
                    JobStatus::TimedOut,
                    Payload::Error(JobFailure::new(FailureKind::Timeout, message)),
                );
            }
            RunOutcome::Cancelled => {
                info!("job cancelled while running");
                self.finish(job_id, JobStatus::Running, JobStatus::Cancelled, Payload::Empty);
            }
        }
    }

    /// Call the fetcher, retrying transient failures with backoff.
    ///
    /// Each attempt runs in its own task: when the caller stops polling this
    /// future (timeout or cancellation) the attempt is detached and its late
    /// result dropped.
    async fn fetch_with_retry(
        &self,
        job_id: &JobId,
        source: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<RawRecord>, FetchError> {
        let retry = self.settings.retry;
        let mut attempt = 0u32;
        loop {
            if let Err(e) = self.store.record_attempt(job_id) {
                warn!(error = %e, "could not record fetch attempt");
            }

            let req = FetchRequest {
                source: source.to_string(),
                deadline,
                max_articles: self.settings.max_articles,
                cancel: cancel.clone(),
            };
            let fetcher = Arc::clone(&self.fetcher);
            let res = match tokio::spawn(async move { fetcher.fetch(req).await }).await {
                Ok(res) => res,
                Err(e) => Err(FetchError::parse(format!("fetcher task failed: {e}"))),
            };

            match res {
                Ok(mut records) => {
                    if attempt > 0 {
                        info!(attempt, "fetch succeeded after retry");
                    }
                    records.truncate(self.settings.max_articles);
                    return Ok(records);
                }
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.delay_for(attempt);
                    warn!(attempt, ?delay, error = %e, "transient fetch failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn complete(&self, job_id: &JobId, records: &[RawRecord]) {
        if let Err(e) = self.store.update_progress(job_id, 0.5) {
            debug!(error = %e, "progress update skipped");
        }

        match self.gate.ingest(job_id, records) {
            Ok(report) => {
                info!(
                    new = report.new_count,
                    duplicate = report.duplicate_count,
                    invalid = report.invalid_count,
                    "job succeeded"
                );
                self.finish(
                    job_id,
                    JobStatus::Running,
                    JobStatus::Succeeded,
                    Payload::Result(JobResult::from(report)),
                );
            }
            Err(e) => {
                error!(error = %e, "article storage failed");
                self.finish(
                    job_id,
                    JobStatus::Running,
                    JobStatus::Failed,
                    Payload::Error(JobFailure::new(FailureKind::Storage, e.to_string())),
                );
            }
        }
    }

    /// Record a worker's final transition.
    ///
    /// A lost compare-and-swap means someone else (an orphan cancel) already
    /// finished the job. Any other store failure is retried once as a
    /// `storage` failure so the job does not stay `Running`.
    fn finish(&self, job_id: &JobId, from: JobStatus, to: JobStatus, payload: Payload) {
        match self.store.transition(job_id, from, to, payload) {
            Ok(_) => {}
            Err(JobError::InvalidTransition { current, .. }) => {
                debug!(%current, %to, "job already finished elsewhere");
            }
            Err(e) => {
                error!(error = %e, %to, "could not record job outcome");
                if from == JobStatus::Running {
                    let failure = JobFailure::new(FailureKind::Storage, e.to_string());
                    if let Err(e) = self.store.transition(
                        job_id,
                        JobStatus::Running,
                        JobStatus::Failed,
                        Payload::Error(failure),
                    ) {
                        error!(error = %e, "job left Running; it will be failed on next start");
                    }
                }
            }
        }
    }
}

/// About thirty years.
const MAX_DEADLINE_SECS: u64 = 30 * 365 * 24 * 3600;

/// `now + timeout`, saturating at a far-future instant instead of panicking.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(MAX_DEADLINE_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn huge_timeout_saturates_deadline() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now() + Duration::from_secs(3600));
    }
}
