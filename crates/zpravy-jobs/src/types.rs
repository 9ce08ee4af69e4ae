use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zpravy_core::JobId;

/// How a job came into existence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Submitted through the control API.
    Manual,

    /// Fired by a fixed-interval recurring trigger.
    Interval { every_secs: u64 },

    /// Fired by a five-field cron expression (UTC).
    Cron { expression: String },
}

/// Lifecycle state of a job.
///
/// ```text
/// Pending ──start──▶ Running ──complete──▶ Succeeded
///    │                  ├──fail──────────▶ Failed
///    │                  ├──timeout───────▶ TimedOut
///    └──cancel──┐       └──cancel────────▶ Cancelled
///               └────────────────────────▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::TimedOut,
        JobStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }

    /// Whether `self → to` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Succeeded) | (Running, Failed) | (Running, TimedOut) | (Running, Cancelled) => {
                true
            }
            (Pending, _) | (Running, _) => false,
            (Succeeded, _) | (Failed, _) | (TimedOut, _) | (Cancelled, _) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "timed_out" => Ok(JobStatus::TimedOut),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Counts recorded on a successful job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub new_count: u32,
    pub duplicate_count: u32,
    /// Records dropped because a required field was missing or unparseable.
    #[serde(default)]
    pub invalid_count: u32,
}

/// Category of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient fetch failure that outlived its retries.
    Network,
    /// The source refused us (403, captcha wall, rate limit).
    Blocked,
    /// The source answered with content we could not decode.
    Parse,
    /// The per-job deadline elapsed.
    Timeout,
    /// Job store or article store unavailable.
    Storage,
    /// The process died while the job was running.
    Interrupted,
}

/// Structured failure reason, set on `Failed` and `TimedOut`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Data written together with a status change.
///
/// `Succeeded` carries a [`JobResult`], `Failed` / `TimedOut` carry a
/// [`JobFailure`], every other target carries nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Result(JobResult),
    Error(JobFailure),
}

impl Payload {
    /// Whether this payload is the one `to` requires.
    pub fn fits(&self, to: JobStatus) -> bool {
        match (self, to) {
            (Payload::Result(_), JobStatus::Succeeded) => true,
            (Payload::Error(_), JobStatus::Failed | JobStatus::TimedOut) => true,
            (Payload::Empty, JobStatus::Pending | JobStatus::Running | JobStatus::Cancelled) => {
                true
            }
            _ => false,
        }
    }
}

/// A persisted job record (point-in-time copy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source: String,
    pub trigger: Trigger,
    pub status: JobStatus,
    /// 0.0 ..= 1.0; only moves while `Running`.
    pub progress: f64,
    /// Fetcher invocations made so far (retries included).
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<JobResult>,
    pub error: Option<JobFailure>,
}

/// Filter for [`JobStore::list`](crate::JobStore::list).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub source: Option<String>,
    pub status: Option<JobStatus>,
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

impl JobCounts {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Running => self.running,
            JobStatus::Succeeded => self.succeeded,
            JobStatus::Failed => self.failed,
            JobStatus::TimedOut => self.timed_out,
            JobStatus::Cancelled => self.cancelled,
        }
    }

    pub(crate) fn slot(&mut self, status: JobStatus) -> &mut u64 {
        match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Running => &mut self.running,
            JobStatus::Succeeded => &mut self.succeeded,
            JobStatus::Failed => &mut self.failed,
            JobStatus::TimedOut => &mut self.timed_out,
            JobStatus::Cancelled => &mut self.cancelled,
        }
    }
}

/// What [`JobStore::recover_interrupted`](crate::JobStore::recover_interrupted) found.
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    /// Jobs that were `Running` under a previous process, now `Failed`.
    pub interrupted: usize,
    /// Jobs still `Pending`, oldest first, to be handed to the executor again.
    pub pending: Vec<Job>,
}
