//! SchedulerObserver port - 表示用フック
//!
//! スケジューラの tick 内から呼ばれるので、実装はブロックしてはいけない。

use crate::observability::{ExitReport, StatusSnapshot};

pub trait SchedulerObserver: Send + Sync {
    /// Published at the end of every tick.
    fn on_status(&self, _status: &StatusSnapshot) {}

    /// Published exactly once, when the scheduler stops on its own.
    fn on_exit(&self, _report: &ExitReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SchedulerObserver for NoopObserver {}
