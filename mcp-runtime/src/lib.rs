//! Runtime of the MCP test-double server: tool registry and dispatcher,
//! per-request context, probe state, the built-in tool and prompt
//! catalogues, and the JSON-RPC session shared by the stdio and HTTP
//! transports.

use std::sync::Arc;

pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod prompts;
pub mod registry;
pub mod schema;
pub mod server;
pub mod state;
pub mod stdio;
pub mod tools;

pub use context::{Identity, RawRequest, RequestContext};
pub use dispatch::{DispatchError, Dispatcher};
pub use envelope::{Content, ErrorKind, ToolError, ToolOutput};
pub use prompts::{PromptError, PromptRegistry};
pub use registry::{RegistryError, ToolContract, ToolHandler, ToolRegistry};
pub use server::{McpServer, RpcError};
pub use state::{ProbeState, ServerStatus};
pub use stdio::serve_stdio;

pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
pub const MCP_SERVER_NAME: &str = "mcphub-test-server";

/// Registers the full tool and prompt catalogues. Tools that keep state
/// share `state`; callers decide its lifetime.
pub fn register_all(
    tools: &mut ToolRegistry,
    prompts: &mut PromptRegistry,
    state: Arc<ProbeState>,
) -> Result<(), RegistryError> {
    tools::register_all(tools, state)?;
    prompts::register_all(prompts)?;
    tracing::info!(
        event = "catalogue_registered",
        tools = tools.len(),
        prompts = prompts.len(),
    );
    Ok(())
}

/// Handles one HTTP-delivered JSON-RPC payload with the given headers as the
/// request context. Returns zero, one or many responses.
pub async fn handle_http_jsonrpc(
    server: &McpServer,
    headers: Vec<(String, String)>,
    incoming: serde_json::Value,
) -> Vec<serde_json::Value> {
    server
        .handle_incoming_message(incoming, &RawRequest { headers })
        .await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn http_payloads_carry_headers_into_the_call() {
        let server = McpServer::new(Arc::new(ProbeState::new())).unwrap();
        let responses = handle_http_jsonrpc(
            &server,
            vec![("X-User-Role".to_string(), "HR_MANAGER".to_string())],
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "tools/call",
                "params": { "name": "get_salary_info", "arguments": { "employeeId": "E-1" } }
            }),
        )
        .await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 7);
        assert!(responses[0].get("result").is_some());
    }

    #[test]
    fn registering_twice_is_rejected() {
        let state = Arc::new(ProbeState::new());
        let mut tools = ToolRegistry::new();
        let mut prompts = PromptRegistry::new();
        register_all(&mut tools, &mut prompts, state.clone()).unwrap();
        assert!(register_all(&mut tools, &mut prompts, state).is_err());
        assert_eq!(tools.len(), 11);
        assert_eq!(prompts.len(), 1);
    }
}
