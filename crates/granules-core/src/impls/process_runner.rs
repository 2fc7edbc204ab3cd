//! ProcessRunner - dispatch されたタスクごとに OS プロセスを 1 つ起動する
//!
//! # 詳細
//! - コマンドライン: `worker_command` を空白で分割し、ツールサーバーが
//!   動いていれば `--mcp-config <path>`、続けて `--model <tier> -p <instructions>`
//! - stdout と stderr は `<log_dir>/worker-<W>.log` に流す
//! - `<log_dir>/worker-<W>.json` に実行メタデータを書き、終了時に上書きする
//! - 起動失敗も他の失敗と同じく終了チャネルで報告する

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::{Child, Command};

use crate::domain::{GranuleId, TaskRecord, WorkerId};
use crate::ports::{RunnerControl, RunnerError, RunnerExit, RunnerHandle, TaskRunner};
use crate::prompts::render_instructions;

pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    log_dir: PathBuf,
    mcp_config: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(command: &str, log_dir: impl Into<PathBuf>) -> Result<Self, RunnerError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| RunnerError::Spawn("worker command is empty".into()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            log_dir: log_dir.into(),
            mcp_config: None,
        })
    }

    /// Point workers at the tool server described by this MCP config file.
    pub fn with_mcp_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.mcp_config = Some(path.into());
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    fn command(&self, tier: &str, instructions: String) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(path) = &self.mcp_config {
            cmd.arg("--mcp-config").arg(path);
        }
        cmd.arg("--model")
            .arg(tier)
            .arg("-p")
            .arg(instructions)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Contents of `worker-<W>.json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunMetadata {
    worker_id: WorkerId,
    task_id: GranuleId,
    tier: String,
    command: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    started_at: DateTime<Utc>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    exited_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

struct LogPaths {
    stream: PathBuf,
    metadata: PathBuf,
}

impl LogPaths {
    fn new(dir: &Path, worker: WorkerId) -> Self {
        Self {
            stream: dir.join(format!("worker-{worker}.log")),
            metadata: dir.join(format!("worker-{worker}.json")),
        }
    }
}

fn write_metadata(path: &Path, meta: &RunMetadata) {
    let result = serde_json::to_vec_pretty(meta)
        .map_err(std::io::Error::other)
        .and_then(|json| std::fs::write(path, json));
    if let Err(e) = result {
        tracing::warn!(error = %e, path = %path.display(), "failed to write worker metadata");
    }
}

/// Open the stream log and return stdio handles for stdout and stderr.
/// Logging problems never prevent the run.
fn open_stream_log(path: &Path, meta: &RunMetadata) -> (Stdio, Stdio) {
    let opened = File::create(path).and_then(|mut file| {
        writeln!(
            file,
            "[{}] worker {} started on task {} (tier {})",
            meta.started_at.to_rfc3339(),
            meta.worker_id,
            meta.task_id,
            meta.tier
        )?;
        let err = file.try_clone()?;
        Ok((file, err))
    });
    match opened {
        Ok((out, err)) => (Stdio::from(out), Stdio::from(err)),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "cannot open worker log");
            (Stdio::null(), Stdio::null())
        }
    }
}

#[async_trait]
impl TaskRunner for ProcessRunner {
    async fn spawn(
        &self,
        worker: WorkerId,
        record: &TaskRecord,
        tier: &str,
    ) -> Result<RunnerHandle, RunnerError> {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            tracing::warn!(error = %e, path = %self.log_dir.display(), "cannot create log directory");
        }

        let paths = LogPaths::new(&self.log_dir, worker);
        let mut meta = RunMetadata {
            worker_id: worker,
            task_id: record.id,
            tier: tier.to_string(),
            command: self.program.clone(),
            started_at: Utc::now(),
            exited_at: None,
            exit_code: None,
            error: None,
        };
        write_metadata(&paths.metadata, &meta);

        let (stdout, stderr) = open_stream_log(&paths.stream, &meta);
        let mut cmd = self.command(tier, render_instructions(worker, record));
        cmd.stdout(stdout).stderr(stderr);

        let (handle, control) = RunnerHandle::channel();
        match cmd.spawn() {
            Ok(child) => {
                tracing::debug!(worker_id = %worker, pid = ?child.id(), "worker process started");
                tokio::spawn(supervise(child, control, meta, paths));
            }
            Err(e) => {
                let message = format!("failed to launch {}: {e}", self.program);
                meta.exited_at = Some(Utc::now());
                meta.error = Some(message.clone());
                write_metadata(&paths.metadata, &meta);
                control.report(RunnerExit::Failed(message));
            }
        }
        Ok(handle)
    }
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    KillRequested,
}

async fn supervise(mut child: Child, mut control: RunnerControl, mut meta: RunMetadata, paths: LogPaths) {
    let waited = tokio::select! {
        status = child.wait() => Waited::Exited(status),
        _ = control.killed() => Waited::KillRequested,
    };
    let status = match waited {
        Waited::Exited(status) => status,
        Waited::KillRequested => {
            tracing::debug!(worker_id = %meta.worker_id, "killing worker process");
            if let Err(e) = child.kill().await {
                tracing::debug!(worker_id = %meta.worker_id, error = %e, "kill failed");
            }
            child.wait().await
        }
    };

    let exit = match status {
        Ok(status) => match status.code() {
            Some(code) => RunnerExit::Exited(code),
            None => RunnerExit::Failed(format!("worker terminated by signal ({status})")),
        },
        Err(e) => RunnerExit::Failed(format!("failed to wait for worker: {e}")),
    };

    meta.exited_at = Some(Utc::now());
    match &exit {
        RunnerExit::Exited(code) => meta.exit_code = Some(*code),
        RunnerExit::Failed(message) => meta.error = Some(message.clone()),
    }
    write_metadata(&paths.metadata, &meta);
    append_line(
        &paths.stream,
        &format!("[{}] worker exited: {exit:?}", Utc::now().to_rfc3339()),
    );

    control.report(exit);
}

fn append_line(path: &Path, line: &str) {
    let result = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{line}"));
    if let Err(e) = result {
        tracing::debug!(error = %e, path = %path.display(), "cannot append to worker log");
    }
}
