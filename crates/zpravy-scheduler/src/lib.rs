//! `zpravy-scheduler`: turns recurring triggers and manual requests into
//! `Pending` jobs on the executor's intake.
//!
//! # Overview
//!
//! Recurring triggers are persisted to a SQLite `recurring_triggers` table.
//! The [`Scheduler`] timer loop polls it on a fixed tick and creates one job
//! for every trigger whose `next_run` has arrived, then plans the next firing
//! from the current time. Missed firings are never replayed.
//!
//! # Trigger variants
//!
//! | Variant    | Behaviour                                         |
//! |------------|---------------------------------------------------|
//! | `Interval` | Repeat every N seconds                            |
//! | `Cron`     | Five-field cron expression, UTC                   |
//! | `Manual`   | Not schedulable; used by `submit_manual` only     |

pub mod cron_expr;
pub mod db;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

pub use cron_expr::{CronError, CronSchedule};
pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use types::RecurringTrigger;
