//! Selection - この tick で dispatch してよい未 claim レコードの選択
//!
//! ストアのスナップショットに対する純粋関数。スロット数の制限と実際の
//! claim はスケジューラ側で行う。

use std::collections::HashSet;

use super::retry::RetryPolicy;
use crate::domain::{GranuleId, TaskRecord};

/// Eligible records in list (id) order.
///
/// A record is a candidate when it is unclaimed, not of the terminal class,
/// not already assigned to an active runner, and below the retry ceiling.
/// Deferred-class records (audit) are only returned when nothing else is
/// going on: no other candidate, no claimed record and no active runner.
pub fn select_candidates<'a>(
    records: &'a [TaskRecord],
    assigned: &HashSet<GranuleId>,
    active_runners: usize,
    policy: &RetryPolicy,
) -> Vec<&'a TaskRecord> {
    let (deferred, regular): (Vec<&TaskRecord>, Vec<&TaskRecord>) = records
        .iter()
        .filter(|r| r.is_unclaimed())
        .filter(|r| !r.class.is_terminal())
        .filter(|r| !assigned.contains(&r.id))
        .filter(|r| !policy.is_exhausted(r.retry_count))
        .partition(|r| r.class.is_deferred());

    if !regular.is_empty() {
        return regular;
    }

    let anything_in_flight = active_runners > 0 || records.iter().any(TaskRecord::is_claimed);
    if anything_in_flight {
        Vec::new()
    } else {
        deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskClass, WorkerId};
    use chrono::{TimeZone, Utc};

    fn rec(seq: u64, class: TaskClass) -> TaskRecord {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TaskRecord::new(GranuleId::new(seq), class, format!("task {seq}"), now)
    }

    fn ids(selected: &[&TaskRecord]) -> Vec<u64> {
        selected.iter().map(|r| r.id.seq()).collect()
    }

    #[test]
    fn skips_exhausted_assigned_and_terminal() {
        let mut exhausted = rec(1, TaskClass::Test);
        exhausted.retry_count = 3;
        let records = vec![
            exhausted,
            rec(2, TaskClass::Implement),
            rec(3, TaskClass::Implemented),
            rec(4, TaskClass::Review),
        ];
        let assigned = HashSet::from([GranuleId::new(4)]);

        let selected = select_candidates(&records, &assigned, 1, &RetryPolicy::default());
        assert_eq!(ids(&selected), vec![2]);
    }

    #[test]
    fn audit_waits_for_other_work() {
        let records = vec![rec(1, TaskClass::Audit), rec(2, TaskClass::Explore)];
        let selected = select_candidates(&records, &HashSet::new(), 0, &RetryPolicy::default());
        assert_eq!(ids(&selected), vec![2]);
    }

    #[test]
    fn audit_waits_for_active_runners() {
        let records = vec![rec(1, TaskClass::Audit)];
        let selected = select_candidates(&records, &HashSet::new(), 1, &RetryPolicy::default());
        assert!(selected.is_empty());
    }

    #[test]
    fn audit_waits_for_claimed_records() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut claimed = rec(2, TaskClass::Plan);
        claimed.claim(WorkerId::new(1), now).unwrap();
        let records = vec![rec(1, TaskClass::Audit), claimed];

        let selected = select_candidates(&records, &HashSet::new(), 0, &RetryPolicy::default());
        assert!(selected.is_empty());
    }

    #[test]
    fn audit_runs_when_idle() {
        let records = vec![rec(1, TaskClass::Audit), rec(2, TaskClass::Audit)];
        let selected = select_candidates(&records, &HashSet::new(), 0, &RetryPolicy::default());
        assert_eq!(ids(&selected), vec![1, 2]);
    }
}
