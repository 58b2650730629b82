//! Streamable-HTTP transport. Every POST is handled on its own; the probe
//! state behind the shared `McpServer` is the only thing requests have in
//! common.

use std::net::IpAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::header::HOST;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use mcphub_test_runtime::server::{RpcError, error_response};
use mcphub_test_runtime::{McpServer, handle_http_jsonrpc};

const MCP_PATH: &str = "/mcp";

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Which `Host` header values the HTTP transport answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPolicy {
    Any,
    LoopbackOnly,
    Allow(Vec<String>),
}

impl HostPolicy {
    /// An explicit list wins; otherwise a loopback bind only answers loopback names.
    pub fn new(allowed_hosts: Vec<String>, bind_host: &str) -> Self {
        if !allowed_hosts.is_empty() {
            HostPolicy::Allow(allowed_hosts)
        } else if is_loopback(bind_host) {
            HostPolicy::LoopbackOnly
        } else {
            HostPolicy::Any
        }
    }

    pub fn permits(&self, host: Option<&str>) -> bool {
        let name = host.map(strip_port).map(str::to_ascii_lowercase);
        match (self, name) {
            (HostPolicy::Any, _) => true,
            (_, None) => false,
            (HostPolicy::LoopbackOnly, Some(name)) => is_loopback(&name),
            (HostPolicy::Allow(allowed), Some(name)) => allowed.iter().any(|h| *h == name),
        }
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

#[derive(Clone)]
pub struct AppState {
    pub server: McpServer,
    pub host_policy: Arc<HostPolicy>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route(
            MCP_PATH,
            post(mcp_post)
                .get(mcp_method_not_allowed)
                .delete(mcp_method_not_allowed),
        )
        .layer(middleware::from_fn_with_state(state.clone(), host_guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: &str) -> Result<(), ServeError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    tracing::info!(event = "http_listening", addr = %addr, mcp_path = MCP_PATH);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn host_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host());
    if !state.host_policy.permits(host) {
        tracing::warn!(event = "http_host_rejected", host = ?host);
        return (
            StatusCode::FORBIDDEN,
            Json(error_response(
                Value::Null,
                RpcError::invalid_request(format!("Invalid Host header: {}", host.unwrap_or(""))),
            )),
        )
            .into_response();
    }
    next.run(req).await
}

async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(event = "http_parse_error", error = %err);
            return (
                StatusCode::OK,
                Json(error_response(Value::Null, RpcError::parse_error())),
            )
                .into_response();
        }
    };

    let mut responses = handle_http_jsonrpc(&state.server, header_pairs(&headers), incoming).await;

    match responses.len() {
        0 => StatusCode::ACCEPTED.into_response(),
        1 => (StatusCode::OK, Json(responses.remove(0))).into_response(),
        _ => (StatusCode::OK, Json(Value::Array(responses))).into_response(),
    }
}

/// Every header value in arrival order. Bytes that are not UTF-8 are replaced,
/// never dropped.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

async fn mcp_method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "jsonrpc": "2.0",
            "error": { "code": -32000, "message": "Method not allowed." },
            "id": null
        })),
    )
        .into_response()
}

async fn banner() -> &'static str {
    "mcphub-test-server\n\n- POST /mcp\n- Authorization: Bearer user=<id>;role=<role>;scopes=<...>"
}

async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "ts": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}
