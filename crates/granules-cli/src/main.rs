use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use granules_core::config::StoreBackend;
use granules_core::impls::LogObserver;
use granules_core::observability::ExitReport;
use granules_core::runtime::open_store;
use granules_core::session::SessionLog;
use granules_core::{GranulesConfig, Runtime, tools};

#[derive(Parser, Debug)]
#[command(name = "granules")]
#[command(about = "Run a pool of workers against a shared task queue", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// JSON config file; flags and environment override it
    #[arg(long, short = 'c', env = "GRANULES_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Task store backend (memory or file)
    #[arg(long, env = "GRANULES_STORE", global = true)]
    store: Option<StoreBackend>,

    /// Snapshot path for the file store
    #[arg(long, env = "GRANULES_STATE_FILE", global = true)]
    state_file: Option<PathBuf>,

    #[arg(long, env = "GRANULES_MAX_WORKERS")]
    max_workers: Option<usize>,

    #[arg(long, env = "GRANULES_STALE_CLAIM_TIMEOUT_SECS")]
    stale_claim_timeout_secs: Option<u64>,

    #[arg(long, env = "GRANULES_TICK_INTERVAL_SECS")]
    tick_interval_secs: Option<u64>,

    #[arg(long, env = "GRANULES_MAX_RETRIES", global = true)]
    max_retries: Option<u32>,

    /// Operator prompt seeding the first planning task
    #[arg(long, short = 'p', env = "GRANULES_PROMPT")]
    prompt: Option<String>,

    /// Stop once nothing is runnable and no worker is active
    #[arg(long, env = "GRANULES_EXIT_ON_IDLE")]
    exit_on_idle: bool,

    /// Worker executable and leading arguments
    #[arg(long, env = "GRANULES_WORKER_CMD")]
    worker_cmd: Option<String>,

    /// Model tiers, escalated on each retry
    #[arg(long, env = "GRANULES_TIERS", value_delimiter = ',')]
    tiers: Option<Vec<String>>,

    #[arg(long, env = "GRANULES_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[arg(long, env = "GRANULES_SESSION_LOG")]
    session_log: Option<PathBuf>,

    /// Address of the worker tool server
    #[arg(long, env = "GRANULES_TOOL_SERVER_ADDR")]
    tool_server_addr: Option<SocketAddr>,

    /// Do not start the worker tool server (wins over --tool-server-addr)
    #[arg(long)]
    no_tool_server: bool,

    /// Print the exit report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the scheduler (default)
    Run,
    /// Print store counts and failed records
    Status,
    /// Print the worker tool descriptors as JSON
    Tools,
}

impl Cli {
    fn load_config(&self) -> Result<GranulesConfig> {
        let mut config = match &self.config {
            Some(path) => GranulesConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => GranulesConfig::default(),
        };

        if let Some(store) = self.store {
            config.store = store;
        }
        if let Some(path) = &self.state_file {
            config.state_file = path.clone();
        }
        if let Some(n) = self.max_workers {
            config.max_workers = n;
        }
        if let Some(secs) = self.stale_claim_timeout_secs {
            config.stale_claim_timeout_secs = secs;
        }
        if let Some(secs) = self.tick_interval_secs {
            config.tick_interval_secs = secs;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        if let Some(prompt) = &self.prompt {
            config.initial_prompt = Some(prompt.clone());
        }
        if self.exit_on_idle {
            config.exit_on_idle = true;
        }
        if let Some(cmd) = &self.worker_cmd {
            config.worker_command = cmd.clone();
        }
        if let Some(tiers) = &self.tiers {
            config.tiers = tiers
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(path) = &self.session_log {
            config.session_log = path.clone();
        }
        if let Some(addr) = self.tool_server_addr {
            config.tool_server_addr = Some(addr);
        }
        if self.no_tool_server {
            config.tool_server_addr = None;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        None | Some(Command::Run) => run(&cli).await,
        Some(Command::Status) => status(&cli),
        Some(Command::Tools) => {
            println!("{}", serde_json::to_string_pretty(&tools::descriptors())?);
            Ok(())
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    let mut runtime = Runtime::from_config(&config, Arc::new(LogObserver::new()))
        .await
        .context("starting control plane")?;
    let scheduler = &runtime.scheduler;

    let mut sessions = SessionLog::open(&config.session_log);
    if let Err(e) = sessions.start_session() {
        tracing::warn!(path = %sessions.path().display(), error = %e, "session log not written");
    }

    scheduler.start().await;

    let report = tokio::select! {
        report = scheduler.wait_stopped() => report,
        _ = shutdown_signal() => {
            tracing::info!("shutdown requested, stopping workers");
            scheduler.stop().await;
            None
        }
    };

    runtime.shutdown_tool_server().await;
    if let Err(e) = sessions.end_session() {
        tracing::warn!(path = %sessions.path().display(), error = %e, "session log not written");
    }

    match report {
        Some(report) if cli.json => println!("{}", serde_json::to_string_pretty(&report)?),
        Some(ExitReport::Implemented { task_id, content }) => {
            eprintln!("implementation recorded by {task_id}");
            println!("{content}");
        }
        Some(ExitReport::Idle { completed, failed }) => {
            eprintln!("idle: {completed} completed, {failed} failed");
        }
        None => eprintln!("stopped"),
    }
    Ok(())
}

fn status(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    if config.store == StoreBackend::Memory {
        anyhow::bail!("the memory store has no state outside a running scheduler");
    }
    let store = open_store(&config).context("opening task store")?;
    let records = store.list();
    let failed: Vec<_> = records
        .iter()
        .filter(|r| r.is_unclaimed() && r.retry_count >= config.max_retries)
        .collect();
    let out = serde_json::json!({
        "counts": store.counts(config.max_retries),
        "failed": failed,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn config_file(json: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();
        file
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("granules").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flag_overrides_file_value() {
        let file = config_file(r#"{ "maxWorkers": 5, "maxRetries": 4, "store": "memory" }"#);
        let path = file.path().to_str().unwrap();
        let config = parse(&["-c", path, "--max-workers", "2"]).load_config().unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.store, StoreBackend::Memory);
    }

    #[test]
    fn unset_flags_keep_file_values() {
        let file = config_file(
            r#"{ "exitOnIdle": true, "tiers": ["haiku"], "workerCommand": "my-worker --fast" }"#,
        );
        let path = file.path().to_str().unwrap();
        let config = parse(&["--config", path]).load_config().unwrap();
        assert!(config.exit_on_idle);
        assert_eq!(config.tiers, vec!["haiku"]);
        assert_eq!(config.worker_command, "my-worker --fast");
        assert_eq!(config.max_workers, GranulesConfig::default().max_workers);
    }

    #[test]
    fn tiers_are_trimmed_and_blanks_dropped() {
        let config = parse(&["--tiers", " sonnet, ,opus "]).load_config().unwrap();
        assert_eq!(config.tiers, vec!["sonnet", "opus"]);
    }

    #[test]
    fn tool_server_can_be_moved_or_disabled() {
        let file = config_file(r#"{ "toolServerAddr": "127.0.0.1:3999" }"#);
        let path = file.path().to_str().unwrap();

        let config = parse(&["-c", path]).load_config().unwrap();
        assert_eq!(config.tool_server_addr, Some("127.0.0.1:3999".parse().unwrap()));

        let config = parse(&["-c", path, "--tool-server-addr", "0.0.0.0:4000"])
            .load_config()
            .unwrap();
        assert_eq!(config.tool_server_addr, Some("0.0.0.0:4000".parse().unwrap()));

        let config = parse(&["-c", path, "--no-tool-server"]).load_config().unwrap();
        assert_eq!(config.tool_server_addr, None);
    }

    #[test]
    fn global_config_flag_works_after_subcommand() {
        let file = config_file(r#"{ "maxRetries": 7 }"#);
        let cli = parse(&["status", "-c", file.path().to_str().unwrap()]);
        assert!(matches!(cli.command, Some(Command::Status)));
        assert_eq!(cli.load_config().unwrap().max_retries, 7);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = parse(&["-c", "/nonexistent/granules.json"]);
        let err = cli.load_config().unwrap_err();
        assert!(format!("{err:#}").contains("loading config"));
    }

    #[test]
    fn bad_flag_value_is_rejected() {
        assert!(Cli::try_parse_from(["granules", "--max-workers", "many"]).is_err());
    }
}
