//! Task record: the unit of schedulable work.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::StoreError;
use super::ids::{GranuleId, WorkerId};
use super::state::{ClaimState, StateKind};
use super::task_class::TaskClass;

/// SHA-256 of the content, lowercase hex.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// One task and its lifecycle metadata.
///
/// Design:
/// - The store holds the only live copy; everyone else gets clones.
/// - All state transitions happen through the methods below, which the
///   store calls under its lock.
/// - `content` is private so `content_hash` can never go out of date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RecordWire", try_from = "RecordWire")]
pub struct TaskRecord {
    pub id: GranuleId,
    pub class: TaskClass,
    content: String,
    content_hash: String,
    pub state: ClaimState,
    pub created_at: DateTime<Utc>,

    /// Failed ownership cycles (release with an error message).
    pub retry_count: u32,

    /// Most recent failure message.
    pub last_error: Option<String>,
}

impl TaskRecord {
    pub fn new(id: GranuleId, class: TaskClass, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        let content = content.into();
        Self {
            id,
            class,
            content_hash: content_hash(&content),
            content,
            state: ClaimState::Unclaimed,
            created_at: now,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn state_kind(&self) -> StateKind {
        self.state.kind()
    }

    pub fn is_unclaimed(&self) -> bool {
        matches!(self.state, ClaimState::Unclaimed)
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self.state, ClaimState::Claimed { .. })
    }

    pub fn claimed_by(&self) -> Option<WorkerId> {
        self.state.owner()
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            ClaimState::Claimed { at, .. } => Some(at),
            _ => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            ClaimState::Completed { at, .. } => Some(at),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<&str> {
        match &self.state {
            ClaimState::Completed { summary, .. } => summary.as_deref(),
            _ => None,
        }
    }

    /// Claimed for strictly longer than `max_age` as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.state {
            ClaimState::Claimed { at, .. } => now.signed_duration_since(at) > max_age,
            _ => false,
        }
    }

    /// Unclaimed -> Claimed.
    pub(crate) fn claim(&mut self, owner: WorkerId, now: DateTime<Utc>) -> Result<(), StoreError> {
        if !self.is_unclaimed() {
            return Err(StoreError::NotClaimable {
                id: self.id,
                state: self.state_kind(),
            });
        }
        self.state = ClaimState::Claimed { by: owner, at: now };
        Ok(())
    }

    /// Claimed(owner) -> Unclaimed. An error message counts as a failed cycle.
    pub(crate) fn release(&mut self, owner: WorkerId, error: Option<&str>) -> Result<(), StoreError> {
        self.ensure_owner(owner)?;
        self.state = ClaimState::Unclaimed;
        // An empty message is treated as "no error".
        if let Some(error) = error.filter(|e| !e.is_empty()) {
            self.retry_count += 1;
            self.last_error = Some(error.to_string());
        }
        Ok(())
    }

    /// Claimed(owner) -> Completed.
    pub(crate) fn complete(
        &mut self,
        owner: WorkerId,
        summary: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_owner(owner)?;
        self.state = ClaimState::Completed {
            at: now,
            summary: summary.map(str::to_string),
        };
        Ok(())
    }

    /// Stale reclamation: Claimed -> Unclaimed without touching retry metadata.
    pub(crate) fn reclaim(&mut self) {
        if self.is_claimed() {
            self.state = ClaimState::Unclaimed;
        }
    }

    pub(crate) fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.content_hash = content_hash(&self.content);
    }

    fn ensure_owner(&self, owner: WorkerId) -> Result<(), StoreError> {
        if self.state.is_claimed_by(owner) {
            Ok(())
        } else {
            Err(StoreError::NotOwner { id: self.id, owner })
        }
    }
}

/// Flat camelCase shape used in snapshot files and tool responses.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordWire {
    id: GranuleId,
    class: TaskClass,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_hash: Option<String>,
    state: StateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claimed_by: Option<WorkerId>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    claimed_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default)]
    retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl From<TaskRecord> for RecordWire {
    fn from(record: TaskRecord) -> Self {
        let state = record.state.kind();
        let (claimed_by, claimed_at, completed_at, summary) = match record.state {
            ClaimState::Unclaimed => (None, None, None, None),
            ClaimState::Claimed { by, at } => (Some(by), Some(at), None, None),
            ClaimState::Completed { at, summary } => (None, None, Some(at), summary),
        };
        Self {
            id: record.id,
            class: record.class,
            content: record.content,
            content_hash: Some(record.content_hash),
            state,
            claimed_by,
            claimed_at,
            created_at: record.created_at,
            completed_at,
            summary,
            retry_count: record.retry_count,
            last_error: record.last_error,
        }
    }
}

impl TryFrom<RecordWire> for TaskRecord {
    type Error = String;

    fn try_from(wire: RecordWire) -> Result<Self, Self::Error> {
        let state = match wire.state {
            StateKind::Unclaimed => ClaimState::Unclaimed,
            StateKind::Claimed => match (wire.claimed_by, wire.claimed_at) {
                (Some(by), Some(at)) => ClaimState::Claimed { by, at },
                _ => {
                    return Err(format!(
                        "task {}: claimed without claimedBy/claimedAt",
                        wire.id
                    ));
                }
            },
            StateKind::Completed => match wire.completed_at {
                Some(at) => ClaimState::Completed {
                    at,
                    summary: wire.summary,
                },
                None => return Err(format!("task {}: completed without completedAt", wire.id)),
            },
        };

        let hash = content_hash(&wire.content);
        if let Some(stored) = wire.content_hash.as_deref()
            && stored != hash
        {
            tracing::warn!(task_id = %wire.id, "stored content hash does not match content, recomputing");
        }

        Ok(Self {
            id: wire.id,
            class: wire.class,
            content: wire.content,
            content_hash: hash,
            state,
            created_at: wire.created_at,
            retry_count: wire.retry_count,
            last_error: wire.last_error,
        })
    }
}
