use thiserror::Error;

use crate::app::BuildError;
use crate::config::ConfigError;
use crate::domain::StoreError;
use crate::ports::RunnerError;

/// Startup failures. Once running, nothing surfaces as an error.
#[derive(Debug, Error)]
pub enum GranulesError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("task store: {0}")]
    Store(#[from] StoreError),

    #[error("task runner: {0}")]
    Runner(#[from] RunnerError),

    #[error("scheduler: {0}")]
    Build(#[from] BuildError),

    #[error("tool server: {0}")]
    ToolServer(#[from] std::io::Error),
}
