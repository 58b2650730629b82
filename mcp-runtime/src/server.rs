//! JSON-RPC 2.0 session: turns MCP messages into dispatcher and prompt calls.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value, json};

use crate::context::RawRequest;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::prompts::{PromptError, PromptRegistry};
use crate::registry::{RegistryError, ToolRegistry};
use crate::state::ProbeState;
use crate::{MCP_PROTOCOL_VERSION, MCP_SERVER_NAME};

#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "Parse error".to_string(),
            data: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

impl From<DispatchError> for RpcError {
    fn from(err: DispatchError) -> Self {
        Self {
            code: err.kind().rpc_code(),
            message: err.message(),
            data: Some(err.data()),
        }
    }
}

impl From<PromptError> for RpcError {
    fn from(err: PromptError) -> Self {
        RpcError::invalid_params(err.to_string())
    }
}

/// One server instance: the tool dispatcher plus the prompt registry.
/// Cloning shares the same registries and probe state.
#[derive(Debug, Clone)]
pub struct McpServer {
    dispatcher: Dispatcher,
    prompts: Arc<PromptRegistry>,
}

impl McpServer {
    /// Builds a server with the full tool catalogue and prompt set.
    pub fn new(state: Arc<ProbeState>) -> Result<Self, RegistryError> {
        let mut tools = ToolRegistry::new();
        let mut prompts = PromptRegistry::new();
        crate::register_all(&mut tools, &mut prompts, state)?;
        Ok(Self::from_parts(tools, prompts))
    }

    pub fn from_parts(tools: ToolRegistry, prompts: PromptRegistry) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::new(tools)),
            prompts: Arc::new(prompts),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handles a single message or a batch; returns every response to send.
    pub async fn handle_incoming_message(&self, incoming: Value, request: &RawRequest) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            // Elements run concurrently; responses keep batch order.
            let calls = batch
                .iter()
                .map(|item| self.handle_single_message(item.clone(), request));
            responses.extend(join_all(calls).await.into_iter().flatten());
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming, request).await {
            responses.push(response);
        }
        responses
    }

    /// Handles one message that is not a batch; `None` for notifications and client responses.
    pub async fn handle_single_message(&self, incoming: Value, request: &RawRequest) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // A client response; this server never issues outbound requests.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = obj.get("id").cloned() {
            let result = self.handle_request(method, params, request).await;
            Some(match result {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            })
        } else {
            self.handle_notification(method, &params);
            None
        }
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        match method {
            "notifications/initialized" => {
                tracing::debug!(event = "mcp_client_initialized");
            }
            "notifications/cancelled" => {
                tracing::info!(
                    event = "mcp_request_cancelled",
                    request_id = ?params.get("requestId"),
                );
            }
            // Unknown notifications are ignored.
            _ => {}
        }
    }

    async fn handle_request(
        &self,
        method: &str,
        params: Value,
        request: &RawRequest,
    ) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params, request).await,
            "prompts/list" => Ok(self.prompts.list_payload()),
            "prompts/get" => self.handle_prompts_get(params),
            "logging/setLevel" => Ok(json!({})),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    pub fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                },
                "prompts": {
                    "listChanged": false
                },
                "logging": {}
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    pub fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = self
            .dispatcher
            .registry()
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.advertised_schema(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Value, request: &RawRequest) -> Result<Value, RpcError> {
        let mut params = match params {
            Value::Object(map) => map,
            _ => return Err(RpcError::invalid_params("tools/call params must be an object")),
        };

        let name = match params.remove("name") {
            Some(Value::String(name)) => name,
            _ => {
                return Err(RpcError::invalid_params(
                    "tools/call requires string field 'name'",
                ));
            }
        };

        let output = self
            .dispatcher
            .dispatch(&name, params.remove("arguments"), request)
            .await?;
        Ok(output.to_value())
    }

    fn handle_prompts_get(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("prompts/get params must be an object"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("prompts/get requires string field 'name'"))?;
        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "prompts/get 'arguments' must be an object",
                ));
            }
        };
        Ok(self.prompts.get(name, &args)?)
    }
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}
