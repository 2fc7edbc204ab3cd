//! Durable task store backed by a single JSON snapshot file.
//!
//! - Loaded once on construction. A missing or unreadable file means an
//!   empty store.
//! - After every mutation the full snapshot is written to `.<name>.tmp` in
//!   the same directory, synced, and renamed over the target, so readers
//!   never see a partial file.
//! - A failed write is logged and the in-memory change stands; the next
//!   successful write brings the file up to date.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::state::{Snapshot, StoreState, max_age};
use crate::domain::{GranuleId, StoreError, TaskClass, TaskRecord, WorkerId};
use crate::ports::{Clock, SystemClock, TaskStore};

pub struct FileStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    path: PathBuf,
}

impl FileStore {
    /// Open (or start) the store at `path`. Fails only if the parent
    /// directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let path = path.into();
        let dir = parent_dir(&path);
        fs::create_dir_all(dir).map_err(|e| {
            StoreError::Persistence(format!("cannot create {}: {e}", dir.display()))
        })?;

        let state = load(&path);
        Ok(Self {
            state: Mutex::new(state),
            clock,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write while still holding the lock so snapshots land in mutation order.
    fn persist(&self, state: &StoreState) {
        if let Err(e) = write_snapshot(&self.path, &state.to_snapshot()) {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to persist task store");
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn load(path: &Path) -> StoreState {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return StoreState::new(),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "cannot read task store, starting empty");
            return StoreState::new();
        }
    };
    match serde_json::from_str::<Snapshot>(&data) {
        Ok(snapshot) => {
            tracing::debug!(path = %path.display(), records = snapshot.records.len(), "loaded task store");
            StoreState::from_snapshot(snapshot)
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "corrupt task store, starting empty");
            StoreState::new()
        }
    }
}

/// `.state.json.tmp` next to `state.json`. Distinct targets in one
/// directory never share a temp file.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "granules-state".to_string());
    parent_dir(path).join(format!(".{name}.tmp"))
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(snapshot).map_err(io::Error::other)?;
    fs::create_dir_all(parent_dir(path))?;
    let tmp = temp_path(path);
    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(&json)?;
        file.sync_all()
    });
    let result = written.and_then(|()| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

impl TaskStore for FileStore {
    fn create(&self, class: TaskClass, content: &str) -> TaskRecord {
        let now = self.clock.now();
        let mut state = self.lock();
        let record = state.create(class, content, now);
        self.persist(&state);
        record
    }

    fn list(&self) -> Vec<TaskRecord> {
        self.lock().list()
    }

    fn get(&self, id: GranuleId) -> Option<TaskRecord> {
        self.lock().get(id)
    }

    fn claim(&self, id: GranuleId, owner: WorkerId) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let record = state.claim(id, owner, now)?;
        self.persist(&state);
        Ok(record)
    }

    fn release(
        &self,
        id: GranuleId,
        owner: WorkerId,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.release(id, owner, error)?;
        self.persist(&state);
        Ok(())
    }

    fn complete(
        &self,
        id: GranuleId,
        owner: WorkerId,
        summary: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.complete(id, owner, summary, now)?;
        self.persist(&state);
        Ok(())
    }

    fn update_content(&self, id: GranuleId, content: &str) -> Result<TaskRecord, StoreError> {
        let mut state = self.lock();
        let record = state.update_content(id, content)?;
        self.persist(&state);
        Ok(record)
    }

    fn stale_claims(&self, max: Duration) -> Vec<TaskRecord> {
        let now = self.clock.now();
        self.lock().stale_claims(now, max_age(max))
    }

    fn release_stale_claims(&self, max: Duration) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let released = state.release_stale_claims(now, max_age(max));
        if released > 0 {
            self.persist(&state);
            tracing::info!(count = released, "released stale claims");
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> FileStore {
        FileStore::open(dir.path().join("state.json")).unwrap()
    }

    #[test]
    fn mutations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let a = store.create(TaskClass::Implement, "do X");
        let b = store.create(TaskClass::Review, "look at X");
        store.claim(a.id, WorkerId::new(1)).unwrap();
        store.release(a.id, WorkerId::new(1), Some("boom")).unwrap();
        store.claim(b.id, WorkerId::new(2)).unwrap();
        store.complete(b.id, WorkerId::new(2), Some("fine")).unwrap();
        let before = store.list();
        drop(store);

        let reopened = store_in(&dir);
        assert_eq!(reopened.list(), before);
        let c = reopened.create(TaskClass::Test, "t");
        assert_eq!(c.id, GranuleId::new(3));
    }

    #[test]
    fn snapshot_has_expected_shape() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.create(TaskClass::Plan, "p");

        let raw = fs::read_to_string(store.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["nextId"], 2);
        assert_eq!(v["records"][0]["id"], "T-1");
        assert_eq!(v["records"][0]["state"], "unclaimed");
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.create(TaskClass::Plan, "p");
        store.create(TaskClass::Plan, "q");

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.list().is_empty());
        assert_eq!(store.create(TaskClass::Plan, "p").id, GranuleId::new(1));
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/state.json");
        let store = FileStore::open(&path).unwrap();
        store.create(TaskClass::Plan, "p");
        assert!(path.exists());
    }

    #[test]
    fn stale_release_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let store = FileStore::open_with_clock(&path, clock.clone()).unwrap();
        let rec = store.create(TaskClass::Test, "t");
        store.claim(rec.id, WorkerId::new(1)).unwrap();

        clock.advance(chrono::Duration::minutes(31));
        assert_eq!(store.release_stale_claims(Duration::from_secs(30 * 60)), 1);
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened.get(rec.id).unwrap().is_unclaimed());
    }

    #[test]
    fn failed_write_is_not_fatal_and_next_write_heals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).unwrap();

        // A non-empty directory at the target makes the rename fail.
        fs::create_dir(&path).unwrap();
        fs::write(path.join("blocker"), "x").unwrap();
        let first = store.create(TaskClass::Plan, "p");
        assert_eq!(store.get(first.id).unwrap().content(), "p");
        assert!(!temp_path(&path).exists());

        fs::remove_dir_all(&path).unwrap();
        store.create(TaskClass::Test, "t");
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.list().len(), 2);
    }

    #[test]
    fn stores_sharing_a_directory_keep_separate_temp_files() {
        let dir = TempDir::new().unwrap();
        let a = FileStore::open(dir.path().join("a.json")).unwrap();
        let b = FileStore::open(dir.path().join("b.json")).unwrap();
        a.create(TaskClass::Plan, "a");
        b.create(TaskClass::Plan, "b");
        a.create(TaskClass::Plan, "a2");

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.json".to_string(), "b.json".to_string()]);
        assert_eq!(temp_path(&dir.path().join("a.json")), dir.path().join(".a.json.tmp"));
        assert_eq!(FileStore::open(dir.path().join("a.json")).unwrap().list().len(), 2);
    }
}
