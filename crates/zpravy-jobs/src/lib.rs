//! `zpravy-jobs`: durable job records and their lifecycle state machine.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use db::init_db;
pub use error::{JobError, Result};
pub use store::JobStore;
pub use types::{
    FailureKind, Job, JobCounts, JobFailure, JobFilter, JobResult, JobStatus, Payload, Recovery,
    Trigger,
};
