use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use zpravy_jobs::Trigger;

use crate::cron_expr::CronSchedule;
use crate::error::{Result, SchedulerError};

/// Check that `trigger` can recur and return it in canonical form (cron
/// whitespace collapsed), so equal schedules store identically.
pub fn normalize(trigger: &Trigger) -> Result<Trigger> {
    match trigger {
        Trigger::Manual => Err(SchedulerError::InvalidTrigger(
            "manual is not a recurring trigger".into(),
        )),
        Trigger::Interval { every_secs: 0 } => Err(SchedulerError::InvalidTrigger(
            "interval must be at least one second".into(),
        )),
        Trigger::Interval { every_secs } => {
            if compute_next_run(trigger, Utc::now()).is_none() {
                return Err(SchedulerError::InvalidTrigger(format!(
                    "interval of {every_secs}s is too long"
                )));
            }
            Ok(trigger.clone())
        }
        Trigger::Cron { expression } => {
            let parsed = CronSchedule::parse(expression)
                .map_err(|e| SchedulerError::InvalidTrigger(format!("cron `{expression}`: {e}")))?;
            Ok(Trigger::Cron {
                expression: parsed.expression().to_string(),
            })
        }
    }
}

/// Compute the next UTC firing for `trigger` strictly after `from`.
///
/// Always measured from `from` (normally *now*), never from the previous
/// planned firing, so downtime is skipped rather than replayed. Returns
/// `None` for `Manual`, and for a stored cron expression that no longer
/// parses or has run out of matches.
pub fn compute_next_run(trigger: &Trigger, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Manual => None,

        Trigger::Interval { every_secs } => {
            let secs = i64::try_from(*every_secs).ok()?;
            from.checked_add_signed(Duration::try_seconds(secs)?)
        }

        Trigger::Cron { expression } => match CronSchedule::parse(expression) {
            Ok(schedule) => schedule.next_after(from),
            Err(e) => {
                warn!(%expression, "stored cron expression no longer parses: {e}");
                None
            }
        },
    }
}
