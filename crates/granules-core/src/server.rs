//! ToolServer - ワーカーにツールを HTTP で提供するサーバー
//!
//! スケジューラが使っているのと同じ [`TaskStore`] を公開する。
//! ワーカーは `--mcp-config` で渡された URL にツール呼び出しを送る。
//!
//! # ルート
//! - `POST /mcp`: JSON-RPC 2.0 (`initialize`, `ping`, `tools/list`, `tools/call`)
//! - `POST /tools/{name}`: 引数オブジェクトをそのまま受け取る REST 形式
//! - `GET /tools`: ツール記述子の一覧
//! - `GET /health`
//!
//! # 学習ポイント
//! - ルーターは `router()` で単体生成できるので、テストは
//!   `tower::ServiceExt::oneshot` でソケットを開かずに叩ける
//! - ツール呼び出しの失敗は HTTP エラーではなく `success: false` で返す

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::ports::TaskStore;
use crate::tools::{self, ToolResponse};

/// クライアントが版を指定しなかったときに返すプロトコル版
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

#[derive(Clone)]
struct ServerState {
    store: Arc<dyn TaskStore>,
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn rpc_reply(id: Value, outcome: Result<Value, RpcError>) -> Response {
    let body = match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": e.code, "message": e.message },
        }),
    };
    Json(body).into_response()
}

/// ツールサーバーのルーターを組み立てる
pub fn router(store: Arc<dyn TaskStore>) -> Router {
    Router::new()
        .route("/mcp", post(mcp))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(call_tool))
        .route("/health", get(health))
        .with_state(ServerState { store })
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_tools() -> impl IntoResponse {
    Json(tools::descriptors())
}

fn is_known_tool(name: &str) -> bool {
    tools::descriptors().iter().any(|d| d.name == name)
}

async fn call_tool(
    State(state): State<ServerState>,
    UrlPath(name): UrlPath<String>,
    body: Bytes,
) -> Response {
    if !is_known_tool(&name) {
        return (
            StatusCode::NOT_FOUND,
            Json(ToolResponse::failure(format!("tool {name} not found"))),
        )
            .into_response();
    }
    let args = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(args) => args,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ToolResponse::failure(format!("request body is not JSON: {e}"))),
                )
                    .into_response();
            }
        }
    };
    tracing::debug!(tool = %name, "tool call over REST");
    Json(tools::dispatch_json(state.store.as_ref(), &name, args)).into_response()
}

/// JSON-RPC 2.0 エンドポイント。バッチは扱わない。
async fn mcp(State(state): State<ServerState>, body: Bytes) -> Response {
    let raw = match serde_json::from_slice::<Value>(&body) {
        Ok(raw) => raw,
        Err(e) => return rpc_reply(Value::Null, Err(RpcError::new(PARSE_ERROR, e.to_string()))),
    };
    let request = match serde_json::from_value::<RpcRequest>(raw) {
        Ok(request) => request,
        Err(e) => {
            return rpc_reply(Value::Null, Err(RpcError::new(INVALID_REQUEST, e.to_string())));
        }
    };

    // 通知には応答しない
    let Some(id) = request.id else {
        tracing::debug!(method = %request.method, "notification received");
        return StatusCode::ACCEPTED.into_response();
    };

    let outcome = handle_rpc(&state, &request.method, request.params);
    rpc_reply(id, outcome)
}

fn handle_rpc(state: &ServerState, method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "initialize" => {
            let version = params
                .get("protocolVersion")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_PROTOCOL_VERSION);
            Ok(json!({
                "protocolVersion": version,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "granules", "version": env!("CARGO_PKG_VERSION") },
            }))
        }
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": tools::descriptors() })),
        "tools/call" => {
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| RpcError::new(INVALID_PARAMS, "tools/call requires a tool name"))?;
            if !is_known_tool(name) {
                return Err(RpcError::new(INVALID_PARAMS, format!("tool {name} not found")));
            }
            let args = params.get("arguments").cloned().unwrap_or(Value::Null);
            tracing::debug!(tool = %name, "tool call over JSON-RPC");
            let response = tools::dispatch_json(state.store.as_ref(), name, args);
            let text = serde_json::to_string(&response)
                .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;
            Ok(json!({
                "content": [{ "type": "text", "text": text }],
                "isError": !response.success,
            }))
        }
        other => Err(RpcError::new(METHOD_NOT_FOUND, format!("unknown method {other}"))),
    }
}

/// ワーカー用 MCP 設定ファイルの中身
pub fn mcp_config(url: &str) -> Value {
    json!({
        "mcpServers": {
            "granules": { "type": "http", "url": url }
        }
    })
}

/// `mcp_config` を `path` に書き出す。親ディレクトリがなければ作る。
pub fn write_mcp_config(path: &Path, url: &str) -> io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_vec_pretty(&mcp_config(url)).map_err(io::Error::other)?;
    std::fs::write(path, json)
}

/// バックグラウンドで動くツールサーバー
///
/// # フロー
/// 1. `start()` でソケットを bind し、axum を spawn する
/// 2. ワーカーには `url()` を渡す
/// 3. `shutdown()` で受付を止め、タスクの終了を待つ
pub struct ToolServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ToolServer {
    pub async fn start(addr: SocketAddr, store: Arc<dyn TaskStore>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown, stop) = oneshot::channel::<()>();
        let app = router(store);

        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    // 送信側が落ちた場合も停止扱い
                    let _ = stop.await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "tool server failed");
            }
        });
        tracing::info!(addr = %addr, "tool server listening");
        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// ワーカーが接続する JSON-RPC エンドポイント
    pub fn url(&self) -> String {
        let ip = if self.addr.ip().is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.addr.ip()
        };
        format!("http://{}/mcp", SocketAddr::new(ip, self.addr.port()))
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::debug!(error = %e, "tool server task ended abnormally");
        }
        tracing::info!(addr = %self.addr, "tool server stopped");
    }
}
