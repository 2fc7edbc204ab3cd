//! Errors - ストアのエラー型
//!
//! 競合や未知の id はストア API の普通の結果なので、値として返し、
//! どう扱うかは呼び出し側が決める。

use thiserror::Error;

use super::ids::{GranuleId, WorkerId};
use super::state::StateKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(GranuleId),

    /// Claim lost: the record is already claimed or completed.
    #[error("task {id} is {state}, not unclaimed")]
    NotClaimable { id: GranuleId, state: StateKind },

    /// Release/complete by someone who does not hold the claim.
    #[error("task {id} is not claimed by {owner}")]
    NotOwner { id: GranuleId, owner: WorkerId },

    /// Durable storage could not be prepared or written.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::NotClaimable { .. } | StoreError::NotOwner { .. }
        )
    }
}
