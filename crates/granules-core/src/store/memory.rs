//! In-memory task store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::state::{StoreState, max_age};
use crate::domain::{GranuleId, StoreError, TaskClass, TaskRecord, WorkerId};
use crate::ports::{Clock, SystemClock, TaskStore};

/// Process-lifetime store. Records vanish when it is dropped.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::new()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panic mid-operation cannot leave a record half-updated, so a
        // poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore for MemoryStore {
    fn create(&self, class: TaskClass, content: &str) -> TaskRecord {
        let now = self.clock.now();
        self.lock().create(class, content, now)
    }

    fn list(&self) -> Vec<TaskRecord> {
        self.lock().list()
    }

    fn get(&self, id: GranuleId) -> Option<TaskRecord> {
        self.lock().get(id)
    }

    fn claim(&self, id: GranuleId, owner: WorkerId) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        self.lock().claim(id, owner, now)
    }

    fn release(
        &self,
        id: GranuleId,
        owner: WorkerId,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.lock().release(id, owner, error)
    }

    fn complete(
        &self,
        id: GranuleId,
        owner: WorkerId,
        summary: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.lock().complete(id, owner, summary, now)
    }

    fn update_content(&self, id: GranuleId, content: &str) -> Result<TaskRecord, StoreError> {
        self.lock().update_content(id, content)
    }

    fn stale_claims(&self, max: Duration) -> Vec<TaskRecord> {
        let now = self.clock.now();
        self.lock().stale_claims(now, max_age(max))
    }

    fn release_stale_claims(&self, max: Duration) -> usize {
        let now = self.clock.now();
        let released = self.lock().release_stale_claims(now, max_age(max));
        if released > 0 {
            tracing::info!(count = released, "released stale claims");
        }
        released
    }
}
