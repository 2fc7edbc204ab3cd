//! State - タスクレコードの claim 状態
//!
//! 状態遷移:
//! - Unclaimed -> Claimed -> Completed
//! - Claimed -> Unclaimed（所有者による release、または期限切れ回収）
//!
//! 所有者と claim 時刻は `Claimed` の中にしか存在しないので、
//! 「所有者のいない claimed」は表現できない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::WorkerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimState {
    /// Available for pickup.
    Unclaimed,

    /// Exclusively owned by one worker since `at`.
    Claimed { by: WorkerId, at: DateTime<Utc> },

    /// Finished. Never claimable again.
    Completed {
        at: DateTime<Utc>,
        summary: Option<String>,
    },
}

impl ClaimState {
    pub fn kind(&self) -> StateKind {
        match self {
            ClaimState::Unclaimed => StateKind::Unclaimed,
            ClaimState::Claimed { .. } => StateKind::Claimed,
            ClaimState::Completed { .. } => StateKind::Completed,
        }
    }

    pub fn owner(&self) -> Option<WorkerId> {
        match self {
            ClaimState::Claimed { by, .. } => Some(*by),
            _ => None,
        }
    }

    pub fn is_claimed_by(&self, worker: WorkerId) -> bool {
        self.owner() == Some(worker)
    }
}

/// Field-less view of `ClaimState`, used on the wire and in counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Unclaimed,
    Claimed,
    Completed,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StateKind::Unclaimed => "unclaimed",
            StateKind::Claimed => "claimed",
            StateKind::Completed => "completed",
        };
        f.write_str(s)
    }
}
