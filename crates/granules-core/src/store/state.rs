//! Record table shared by the memory and file stores.
//!
//! Everything here is synchronous and assumes the caller holds the store
//! lock. Time is passed in, never read.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{GranuleId, StoreError, TaskClass, TaskRecord, WorkerId};

pub(crate) struct StoreState {
    /// Next id sequence to hand out. Never decreases.
    next_id: u64,

    /// Keyed by id, so iteration is in id order.
    records: BTreeMap<GranuleId, TaskRecord>,
}

impl StoreState {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            records: BTreeMap::new(),
        }
    }

    fn allocate_id(&mut self) -> GranuleId {
        let id = GranuleId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn record_mut(&mut self, id: GranuleId) -> Result<&mut TaskRecord, StoreError> {
        self.records.get_mut(&id).ok_or(StoreError::NotFound(id))
    }

    pub(crate) fn create(&mut self, class: TaskClass, content: &str, now: DateTime<Utc>) -> TaskRecord {
        let id = self.allocate_id();
        let record = TaskRecord::new(id, class, content, now);
        self.records.insert(id, record.clone());
        record
    }

    pub(crate) fn list(&self) -> Vec<TaskRecord> {
        self.records.values().cloned().collect()
    }

    pub(crate) fn get(&self, id: GranuleId) -> Option<TaskRecord> {
        self.records.get(&id).cloned()
    }

    pub(crate) fn claim(
        &mut self,
        id: GranuleId,
        owner: WorkerId,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        let record = self.record_mut(id)?;
        record.claim(owner, now)?;
        Ok(record.clone())
    }

    pub(crate) fn release(
        &mut self,
        id: GranuleId,
        owner: WorkerId,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.record_mut(id)?.release(owner, error)
    }

    pub(crate) fn complete(
        &mut self,
        id: GranuleId,
        owner: WorkerId,
        summary: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.record_mut(id)?.complete(owner, summary, now)
    }

    pub(crate) fn update_content(&mut self, id: GranuleId, content: &str) -> Result<TaskRecord, StoreError> {
        let record = self.record_mut(id)?;
        record.set_content(content);
        Ok(record.clone())
    }

    pub(crate) fn stale_claims(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<TaskRecord> {
        self.records
            .values()
            .filter(|r| r.is_stale(now, max_age))
            .cloned()
            .collect()
    }

    pub(crate) fn release_stale_claims(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let mut released = 0;
        for record in self.records.values_mut() {
            if record.is_stale(now, max_age) {
                record.reclaim();
                released += 1;
            }
        }
        released
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            next_id: self.next_id,
            records: self.list(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        let records: BTreeMap<_, _> = snapshot.records.into_iter().map(|r| (r.id, r)).collect();
        // Never hand out an id that is already on disk, even if nextId lags.
        let floor = records.keys().next_back().map_or(1, |id| id.seq() + 1);
        Self {
            next_id: snapshot.next_id.max(floor),
            records,
        }
    }
}

/// Durable form: `{ "nextId": n, "records": [...] }`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Snapshot {
    pub(crate) next_id: u64,
    #[serde(alias = "granules")]
    pub(crate) records: Vec<TaskRecord>,
}

/// Store APIs take `std::time::Duration`; staleness math is in chrono.
pub(crate) fn max_age(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or(Duration::MAX)
}
