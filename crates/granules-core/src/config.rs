//! Configuration for the control plane.
//!
//! Sources, lowest to highest priority:
//! 1. defaults
//! 2. a JSON config file (optional)
//! 3. `GRANULES_*` environment variables and command-line flags (applied by
//!    the binary)
//!
//! Example file:
//! ```json
//! { "store": "file", "maxWorkers": 4, "tiers": ["sonnet", "opus"] }
//! ```

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::{RetryPolicy, SchedulerSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Records live for the lifetime of the process.
    Memory,
    /// Records are snapshotted to `state_file` after every change.
    #[default]
    File,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Memory => f.write_str("memory"),
            StoreBackend::File => f.write_str("file"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "file" => Ok(StoreBackend::File),
            other => Err(ConfigError::Invalid(format!(
                "unknown store backend {other:?} (expected memory or file)"
            ))),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {error}")]
    Io { path: String, error: String },

    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GranulesConfig {
    pub store: StoreBackend,

    /// Snapshot path for the file store.
    pub state_file: PathBuf,

    /// Concurrency cap on running workers.
    pub max_workers: usize,

    /// Claims older than this are returned to the queue.
    pub stale_claim_timeout_secs: u64,

    pub tick_interval_secs: u64,

    /// Retry ceiling; tasks that reach it are reported as failed.
    pub max_retries: u32,

    /// Content of the bootstrap task when the store starts empty.
    pub initial_prompt: Option<String>,

    /// Stop once nothing is running and nothing is dispatchable.
    pub exit_on_idle: bool,

    /// Worker executable plus leading arguments, whitespace separated.
    pub worker_command: String,

    /// Capability tiers, escalated by retry count.
    pub tiers: Vec<String>,

    /// Per-worker `.log` and `.json` files go here.
    pub log_dir: PathBuf,

    pub session_log: PathBuf,

    /// Where the worker tool server listens. `null` disables it.
    pub tool_server_addr: Option<SocketAddr>,
}

pub const DEFAULT_TOOL_SERVER_PORT: u16 = 3000;

impl Default for GranulesConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::File,
            state_file: PathBuf::from(".granules-state.json"),
            max_workers: 3,
            stale_claim_timeout_secs: 30 * 60,
            tick_interval_secs: 5,
            max_retries: 3,
            initial_prompt: None,
            exit_on_idle: false,
            worker_command: "claude".to_string(),
            tiers: vec!["sonnet".to_string(), "opus".to_string()],
            log_dir: PathBuf::from("logs"),
            session_log: PathBuf::from("logs/sessions.json"),
            tool_server_addr: Some(SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_TOOL_SERVER_PORT))),
        }
    }
}

impl GranulesConfig {
    /// Load configuration from a specific file path. Keys missing from the
    /// file keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn stale_claim_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_claim_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Worker MCP config, written next to the worker logs.
    pub fn mcp_config_path(&self) -> PathBuf {
        self.log_dir.join("mcp-config.json")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.tiers.clone())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            max_workers: self.max_workers,
            stale_claim_timeout: self.stale_claim_timeout(),
            tick_interval: self.tick_interval(),
            retry: self.retry_policy(),
            initial_prompt: self
                .initial_prompt
                .clone()
                .filter(|p| !p.trim().is_empty()),
            exit_on_idle: self.exit_on_idle,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("maxWorkers must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("maxRetries must be at least 1".into()));
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("tickIntervalSecs must be greater than zero".into()));
        }
        if self.stale_claim_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "staleClaimTimeoutSecs must be greater than zero".into(),
            ));
        }
        if self.tiers.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid("at least one tier is required".into()));
        }
        if self.worker_command.trim().is_empty() {
            return Err(ConfigError::Invalid("workerCommand must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = GranulesConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.stale_claim_timeout(), Duration::from_secs(1800));
        assert_eq!(config.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.store, StoreBackend::File);
    }

    #[test]
    fn file_overrides_only_given_keys() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{ "store": "memory", "maxWorkers": 5, "tiers": ["haiku"] }"#,
        )
        .unwrap();

        let config = GranulesConfig::from_file(file.path()).unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.tiers, vec!["haiku"]);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.worker_command, "claude");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = GranulesConfig::from_file("/nonexistent/granules.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        assert!(matches!(
            GranulesConfig::from_json("{ maxWorkers: }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[rstest]
    #[case::no_workers(r#"{ "maxWorkers": 0 }"#)]
    #[case::no_retries(r#"{ "maxRetries": 0 }"#)]
    #[case::zero_tick(r#"{ "tickIntervalSecs": 0 }"#)]
    #[case::zero_stale(r#"{ "staleClaimTimeoutSecs": 0 }"#)]
    #[case::no_tiers(r#"{ "tiers": [] }"#)]
    #[case::no_command(r#"{ "workerCommand": "  " }"#)]
    fn validation_rejects(#[case] json: &str) {
        let config = GranulesConfig::from_json(json).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn tool_server_defaults_to_port_3000_and_can_be_disabled() {
        let config = GranulesConfig::default();
        assert_eq!(config.tool_server_addr.map(|a| a.port()), Some(3000));

        let config = GranulesConfig::from_json(r#"{ "toolServerAddr": null }"#).unwrap();
        assert_eq!(config.tool_server_addr, None);

        let config = GranulesConfig::from_json(r#"{ "toolServerAddr": "0.0.0.0:4100" }"#).unwrap();
        assert_eq!(config.tool_server_addr, Some("0.0.0.0:4100".parse().unwrap()));
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn settings_drop_blank_prompt() {
        let config = GranulesConfig {
            initial_prompt: Some(" ".into()),
            ..Default::default()
        };
        assert_eq!(config.scheduler_settings().initial_prompt, None);
    }
}
