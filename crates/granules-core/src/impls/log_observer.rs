//! LogObserver - スケジューラの状態を `tracing` で報告する

use std::sync::Mutex;

use crate::observability::{ExitReport, StatusSnapshot, StoreCounts};
use crate::ports::SchedulerObserver;

/// Logs a status line whenever counts or the active set change, and the
/// exit report once.
#[derive(Default)]
pub struct LogObserver {
    last: Mutex<Option<(StoreCounts, usize)>>,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedulerObserver for LogObserver {
    fn on_status(&self, status: &StatusSnapshot) {
        let key = (status.counts, status.active.len());
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if last.as_ref() == Some(&key) {
            return;
        }
        *last = Some(key);

        let c = &status.counts;
        tracing::info!(
            unclaimed = c.unclaimed,
            claimed = c.claimed,
            completed = c.completed,
            failed = c.failed,
            active = status.active.len(),
            "queue status"
        );
        for runner in &status.active {
            tracing::debug!(
                worker_id = %runner.worker_id,
                task_id = %runner.task_id,
                class = %runner.class,
                tier = %runner.tier,
                started_at = %runner.started_at,
                "active worker"
            );
        }
        if !status.failed.is_empty() {
            let ids: Vec<String> = status.failed.iter().map(ToString::to_string).collect();
            tracing::warn!(tasks = %ids.join(", "), "tasks reached the retry ceiling");
        }
    }

    fn on_exit(&self, report: &ExitReport) {
        match report {
            ExitReport::Implemented { task_id, content } => {
                tracing::info!(task_id = %task_id, "project implemented");
                tracing::info!("final report:\n{content}");
            }
            ExitReport::Idle { completed, failed } => {
                tracing::info!(completed, failed, "queue drained, nothing left to do");
            }
        }
    }
}
