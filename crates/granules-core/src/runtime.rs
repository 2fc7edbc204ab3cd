use std::sync::Arc;

use crate::app::{Scheduler, SchedulerBuilder};
use crate::config::{GranulesConfig, StoreBackend};
use crate::error::GranulesError;
use crate::impls::ProcessRunner;
use crate::ports::{SchedulerObserver, TaskStore};
use crate::server::{ToolServer, write_mcp_config};
use crate::store::{FileStore, MemoryStore};

/// A store, a scheduler and the tool server, wired from configuration.
///
/// The store is shared: the scheduler drives it and the tool server answers
/// worker tool calls against the same instance.
pub struct Runtime {
    pub store: Arc<dyn TaskStore>,
    pub scheduler: Scheduler,
    pub tool_server: Option<ToolServer>,
}

impl Runtime {
    /// Opens the store, starts the tool server (when configured) and builds
    /// the scheduler. Workers receive the server through `--mcp-config`.
    pub async fn from_config(
        config: &GranulesConfig,
        observer: Arc<dyn SchedulerObserver>,
    ) -> Result<Self, GranulesError> {
        config.validate()?;
        let store = open_store(config)?;
        let mut runner = ProcessRunner::new(&config.worker_command, &config.log_dir)?;

        let tool_server = match config.tool_server_addr {
            Some(addr) => {
                let server = ToolServer::start(addr, Arc::clone(&store)).await?;
                let path = config.mcp_config_path();
                write_mcp_config(&path, &server.url())?;
                tracing::info!(path = %path.display(), url = %server.url(), "worker MCP config written");
                runner = runner.with_mcp_config(path);
                Some(server)
            }
            None => {
                tracing::info!("tool server disabled");
                None
            }
        };

        let scheduler = SchedulerBuilder::new(Arc::clone(&store), Arc::new(runner))
            .settings(config.scheduler_settings())
            .observer(observer)
            .build()?;
        Ok(Self {
            store,
            scheduler,
            tool_server,
        })
    }

    /// Stops the tool server, if one is running. Call after the scheduler stops.
    pub async fn shutdown_tool_server(&mut self) {
        if let Some(server) = self.tool_server.take() {
            server.shutdown().await;
        }
    }
}

pub fn open_store(config: &GranulesConfig) -> Result<Arc<dyn TaskStore>, GranulesError> {
    let store: Arc<dyn TaskStore> = match config.store {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => Arc::new(FileStore::open(&config.state_file)?),
    };
    tracing::info!(backend = %config.store, records = store.list().len(), "task store ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskClass;
    use crate::ports::NoopObserver;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> GranulesConfig {
        GranulesConfig {
            state_file: dir.path().join("state.json"),
            log_dir: dir.path().join("logs"),
            session_log: dir.path().join("logs/sessions.json"),
            tool_server_addr: Some("127.0.0.1:0".parse().unwrap()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let config = GranulesConfig {
            max_workers: 0,
            store: StoreBackend::Memory,
            ..Default::default()
        };
        let err = Runtime::from_config(&config, Arc::new(NoopObserver)).await.err();
        assert!(matches!(err, Some(GranulesError::Config(_))));
    }

    #[tokio::test]
    async fn file_backend_reopens_existing_state() {
        let dir = TempDir::new().unwrap();
        let config = GranulesConfig {
            tool_server_addr: None,
            ..config_in(&dir)
        };
        let first = Runtime::from_config(&config, Arc::new(NoopObserver)).await.unwrap();
        first.store.create(TaskClass::Explore, "e");
        drop(first);

        let second = Runtime::from_config(&config, Arc::new(NoopObserver)).await.unwrap();
        assert_eq!(second.store.list().len(), 1);
        assert!(second.tool_server.is_none());
    }

    #[tokio::test]
    async fn tool_server_shares_the_store_and_writes_worker_config() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let mut runtime = Runtime::from_config(&config, Arc::new(NoopObserver)).await.unwrap();

        let url = runtime.tool_server.as_ref().unwrap().url();
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(config.mcp_config_path()).unwrap()).unwrap();
        assert_eq!(written["mcpServers"]["granules"]["url"], url.as_str());

        // A record created through the runtime's store is what the server sees.
        runtime.store.create(TaskClass::Plan, "p");
        let addr = runtime.tool_server.as_ref().unwrap().local_addr();
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"list_granules"}}"#;
        let request = format!(
            "POST /mcp HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");
        assert!(reply.contains(r#"\"count\":1"#), "{reply}");

        runtime.shutdown_tool_server().await;
        assert!(runtime.tool_server.is_none());
    }
}
