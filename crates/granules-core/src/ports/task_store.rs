//! TaskStore port - タスクレコードの唯一の所有者
//!
//! すべての操作はストアごとのロック 1 つの下で動くので、各呼び出しは
//! アトミックで、同じ id への操作は線形化される。`claim` が
//! check-and-set となり、同時に所有者が 2 人になることはない。

use std::time::Duration;

use crate::domain::{GranuleId, StoreError, TaskClass, TaskRecord, WorkerId};
use crate::observability::StoreCounts;

/// State machine over task records.
///
/// Callers only ever receive clones; mutating a returned record has no
/// effect on the store.
pub trait TaskStore: Send + Sync {
    /// Create an unclaimed record with the next id.
    fn create(&self, class: TaskClass, content: &str) -> TaskRecord;

    /// Snapshot of all records in id order.
    fn list(&self) -> Vec<TaskRecord>;

    fn get(&self, id: GranuleId) -> Option<TaskRecord>;

    /// Unclaimed -> Claimed(owner). Fails if the record is missing or not
    /// unclaimed.
    fn claim(&self, id: GranuleId, owner: WorkerId) -> Result<TaskRecord, StoreError>;

    /// Claimed(owner) -> Unclaimed. A non-empty `error` bumps `retry_count`
    /// and sets `last_error`.
    fn release(&self, id: GranuleId, owner: WorkerId, error: Option<&str>)
    -> Result<(), StoreError>;

    /// Claimed(owner) -> Completed.
    fn complete(
        &self,
        id: GranuleId,
        owner: WorkerId,
        summary: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Replace the content (and hash) without touching the claim state.
    fn update_content(&self, id: GranuleId, content: &str) -> Result<TaskRecord, StoreError>;

    /// Claimed records whose claim is strictly older than `max_age`.
    fn stale_claims(&self, max_age: Duration) -> Vec<TaskRecord>;

    /// Return every stale claim to unclaimed. Retry metadata is untouched.
    fn release_stale_claims(&self, max_age: Duration) -> usize;

    /// Counts by state. Unclaimed records at or above `max_retries` are
    /// reported as failed instead of unclaimed.
    fn counts(&self, max_retries: u32) -> StoreCounts {
        StoreCounts::from_records(&self.list(), max_retries)
    }
}
