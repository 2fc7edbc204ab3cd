//! Status views published by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{GranuleId, StateKind, TaskClass, TaskRecord, WorkerId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub unclaimed: usize,
    pub claimed: usize,
    pub completed: usize,
    /// Unclaimed records that hit the retry ceiling.
    pub failed: usize,
    pub total: usize,
}

impl StoreCounts {
    pub fn from_records(records: &[TaskRecord], max_retries: u32) -> Self {
        let mut counts = StoreCounts {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            match record.state_kind() {
                StateKind::Unclaimed if record.retry_count >= max_retries => counts.failed += 1,
                StateKind::Unclaimed => counts.unclaimed += 1,
                StateKind::Claimed => counts.claimed += 1,
                StateKind::Completed => counts.completed += 1,
            }
        }
        counts
    }
}

/// One tracked runner, as shown to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRunnerView {
    pub worker_id: WorkerId,
    pub task_id: GranuleId,
    pub class: TaskClass,
    pub content: String,
    pub tier: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub counts: StoreCounts,
    pub active: Vec<ActiveRunnerView>,
    pub failed: Vec<GranuleId>,
}

/// Why the scheduler stopped on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum ExitReport {
    /// A record of the terminal class appeared.
    #[serde(rename_all = "camelCase")]
    Implemented { task_id: GranuleId, content: String },

    /// Nothing left to do (only with exit-on-idle).
    Idle { completed: usize, failed: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn failed_records_are_not_counted_as_unclaimed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut exhausted = TaskRecord::new(GranuleId::new(1), TaskClass::Test, "a", now);
        exhausted.retry_count = 3;
        let fresh = TaskRecord::new(GranuleId::new(2), TaskClass::Test, "b", now);
        let mut claimed = TaskRecord::new(GranuleId::new(3), TaskClass::Test, "c", now);
        claimed.claim(WorkerId::new(1), now).unwrap();

        let counts = StoreCounts::from_records(&[exhausted, fresh, claimed], 3);
        assert_eq!(
            counts,
            StoreCounts {
                unclaimed: 1,
                claimed: 1,
                completed: 0,
                failed: 1,
                total: 3,
            }
        );
    }

    #[test]
    fn exit_report_is_tagged() {
        let report = ExitReport::Idle {
            completed: 2,
            failed: 1,
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["reason"], "idle");
        assert_eq!(v["completed"], 2);
    }
}
