use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use zpravy_core::JobId;

/// Which queue a job waits in. Manual jobs are always picked before
/// recurring ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Manual,
    Recurring,
}

#[derive(Default)]
struct Lanes {
    manual: VecDeque<JobId>,
    recurring: VecDeque<JobId>,
}

/// Unbounded two-lane FIFO between job producers and the executor.
///
/// `enqueue` never blocks, so the scheduler timer cannot stall behind a
/// saturated executor.
#[derive(Default)]
pub struct Intake {
    lanes: Mutex<Lanes>,
    notify: Notify,
}

impl Intake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, job_id: JobId, lane: Lane) {
        {
            let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
            match lane {
                Lane::Manual => lanes.manual.push_back(job_id),
                Lane::Recurring => lanes.recurring.push_back(job_id),
            }
        }
        self.notify.notify_one();
    }

    /// Take the next job without waiting.
    pub fn try_next(&self) -> Option<(JobId, Lane)> {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = lanes.manual.pop_front() {
            return Some((id, Lane::Manual));
        }
        lanes.recurring.pop_front().map(|id| (id, Lane::Recurring))
    }

    /// Wait for the next job. Intended for a single consumer.
    pub async fn next(&self) -> (JobId, Lane) {
        loop {
            if let Some(next) = self.try_next() {
                return next;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        lanes.manual.len() + lanes.recurring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
