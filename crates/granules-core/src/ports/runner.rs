//! TaskRunner port - タスクごとに独立した実行を 1 つ起動する
//!
//! runner は [`RunnerHandle`]（一度きりの終了通知と kill スイッチ）を返す。
//! 対になる runner 側は [`RunnerControl`] で、[`RunnerHandle::channel`] が
//! 両方を同時に作る。
//!
//! # 学習ポイント
//! - `oneshot` による終了通知
//! - async_trait による非同期 trait

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::domain::{TaskRecord, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerExit {
    /// The execution ran to completion with this exit code.
    Exited(i32),

    /// The execution could not be started or was lost.
    Failed(String),
}

impl RunnerExit {
    pub fn is_success(&self) -> bool {
        matches!(self, RunnerExit::Exited(0))
    }

    /// Message recorded as `last_error` when the exit counts as a failure.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            RunnerExit::Exited(0) => None,
            RunnerExit::Exited(code) => Some(format!("worker exited with code {code}")),
            RunnerExit::Failed(msg) => Some(msg.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn runner: {0}")]
    Spawn(String),

    #[error("runner has already exited")]
    AlreadyExited,
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Start working on `record` as `worker`, using capability `tier`.
    async fn spawn(
        &self,
        worker: WorkerId,
        record: &TaskRecord,
        tier: &str,
    ) -> Result<RunnerHandle, RunnerError>;
}

/// Scheduler side of a running execution.
#[derive(Debug)]
pub struct RunnerHandle {
    pub exit: oneshot::Receiver<RunnerExit>,
    pub kill: KillSwitch,
}

impl RunnerHandle {
    pub fn channel() -> (RunnerHandle, RunnerControl) {
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = watch::channel(false);
        (
            RunnerHandle {
                exit: exit_rx,
                kill: KillSwitch(kill_tx),
            },
            RunnerControl { exit_tx, kill_rx },
        )
    }

    /// Resolve once the runner reports. A runner that disappears without
    /// reporting counts as failed.
    pub async fn wait(exit: oneshot::Receiver<RunnerExit>) -> RunnerExit {
        exit.await
            .unwrap_or_else(|_| RunnerExit::Failed("runner dropped without reporting".into()))
    }
}

#[derive(Debug, Clone)]
pub struct KillSwitch(watch::Sender<bool>);

impl KillSwitch {
    /// Ask the runner to terminate. Idempotent; fails only when the runner
    /// side is already gone.
    pub fn kill(&self) -> Result<(), RunnerError> {
        if self.0.is_closed() {
            return Err(RunnerError::AlreadyExited);
        }
        self.0.send_replace(true);
        Ok(())
    }
}

/// Runner side of a running execution.
#[derive(Debug)]
pub struct RunnerControl {
    exit_tx: oneshot::Sender<RunnerExit>,
    kill_rx: watch::Receiver<bool>,
}

impl RunnerControl {
    /// Resolve when a kill is requested. Never resolves if the handle was
    /// dropped without killing.
    pub async fn killed(&mut self) {
        if self.kill_rx.wait_for(|k| *k).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn report(self, exit: RunnerExit) {
        // ignore send error: the scheduler may have stopped listening
        let _ = self.exit_tx.send(exit);
    }
}
