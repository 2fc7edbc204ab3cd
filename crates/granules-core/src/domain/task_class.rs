//! TaskClass - タスク種別（閉じた集合）
//!
//! 種別によってワーカーが受け取る指示テンプレートが決まり、スケジューリング
//! にも関わる。`Audit` はシステムが idle になるまで後回しにされ、
//! `Implemented` はスケジューラを止める終端マーカー。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskClass {
    #[serde(rename = "explore")]
    Explore,
    #[serde(rename = "plan")]
    Plan,
    #[serde(rename = "implement")]
    Implement,
    #[serde(rename = "test")]
    Test,
    #[serde(rename = "review")]
    Review,
    #[serde(rename = "consolidate")]
    Consolidate,
    #[serde(rename = "audit")]
    Audit,
    /// Exit condition: the scheduler stops and reports this record's content.
    #[serde(rename = "Implemented")]
    Implemented,
}

impl TaskClass {
    pub const ALL: [TaskClass; 8] = [
        TaskClass::Explore,
        TaskClass::Plan,
        TaskClass::Implement,
        TaskClass::Test,
        TaskClass::Review,
        TaskClass::Consolidate,
        TaskClass::Audit,
        TaskClass::Implemented,
    ];

    /// Class of the record created when the scheduler starts on an empty store.
    pub const BOOTSTRAP: TaskClass = TaskClass::Plan;

    pub fn as_str(self) -> &'static str {
        match self {
            TaskClass::Explore => "explore",
            TaskClass::Plan => "plan",
            TaskClass::Implement => "implement",
            TaskClass::Test => "test",
            TaskClass::Review => "review",
            TaskClass::Consolidate => "consolidate",
            TaskClass::Audit => "audit",
            TaskClass::Implemented => "Implemented",
        }
    }

    /// Presence of a record of this class stops all dispatch.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskClass::Implemented)
    }

    /// Only dispatched when nothing else is pending or in flight.
    pub fn is_deferred(self) -> bool {
        matches!(self, TaskClass::Audit)
    }
}

impl fmt::Display for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown task class {0:?}")]
pub struct UnknownClassError(pub String);

impl FromStr for TaskClass {
    type Err = UnknownClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| UnknownClassError(s.to_string()))
    }
}
