//! Dispatcher: resolve, validate, build context, invoke, normalize.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value, json};

use crate::context::{RawRequest, RequestContext};
use crate::envelope::{ErrorKind, ToolError, ToolOutput};
use crate::registry::ToolRegistry;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("Tool {tool} not found")]
    UnknownTool { tool: String },
    #[error("Invalid arguments for tool {tool}: {}", .messages.join("; "))]
    InvalidArguments {
        tool: String,
        field: Option<String>,
        messages: Vec<String>,
    },
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::UnknownTool { .. } => ErrorKind::UnknownTool,
            DispatchError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            DispatchError::Tool(err) => err.kind,
        }
    }

    /// Human-readable message; a tool's own message passes through untouched.
    pub fn message(&self) -> String {
        match self {
            DispatchError::Tool(err) => err.message.clone(),
            other => other.to_string(),
        }
    }

    /// Machine-readable detail. Tool metadata passes through unchanged.
    pub fn data(&self) -> Value {
        match self {
            DispatchError::UnknownTool { tool } => json!({
                "kind": ErrorKind::UnknownTool,
                "tool": tool,
            }),
            DispatchError::InvalidArguments {
                tool,
                field,
                messages,
            } => json!({
                "kind": ErrorKind::InvalidArguments,
                "tool": tool,
                "field": field,
                "errors": messages,
            }),
            DispatchError::Tool(err) => Value::Object(err.metadata.clone()),
        }
    }
}

/// Stateless front of the registry; cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn dispatch(
        &self,
        name: &str,
        raw_args: Option<Value>,
        request: &RawRequest,
    ) -> Result<ToolOutput, DispatchError> {
        let Some(tool) = self.registry.get(name) else {
            tracing::warn!(event = "tool_call_rejected", tool = name, reason = "unknown_tool");
            return Err(DispatchError::UnknownTool {
                tool: name.to_string(),
            });
        };

        let args = match (&tool.schema, raw_args) {
            // Argument-less tools ignore whatever was sent.
            (None, _) => Map::new(),
            (Some(_), None | Some(Value::Null)) => Map::new(),
            (Some(_), Some(Value::Object(map))) => map,
            (Some(_), Some(other)) => {
                return Err(self.reject(
                    name,
                    None,
                    vec![format!("arguments must be an object, got {}", json_type(&other))],
                ));
            }
        };
        if let Some(schema) = &tool.schema {
            schema
                .validate(&args)
                .map_err(|err| self.reject(name, Some(err.field), err.messages))?;
        }

        let ctx = RequestContext::extract(request);
        let started = Instant::now();
        tracing::info!(event = "tool_call_started", tool = name, module = tool.contract.module);

        let outcome = tool.contract.handler.call(args, &ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(output) => tracing::info!(
                event = "tool_call_finished",
                tool = name,
                elapsed_ms,
                items = output.content.len(),
                is_error = output.is_error,
            ),
            Err(err) => tracing::info!(
                event = "tool_call_failed",
                tool = name,
                elapsed_ms,
                error_kind = err.kind.as_str(),
                message = %err.message,
            ),
        }
        outcome.map_err(DispatchError::from)
    }

    fn reject(&self, tool: &str, field: Option<String>, messages: Vec<String>) -> DispatchError {
        tracing::warn!(
            event = "tool_call_rejected",
            tool,
            reason = "invalid_arguments",
            field = ?field,
        );
        DispatchError::InvalidArguments {
            tool: tool.to_string(),
            field,
            messages,
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::registry::{ToolContract, ToolHandler};

    #[derive(Clone, Default)]
    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolHandler for Counting {
        async fn call(
            &self,
            args: Map<String, Value>,
            ctx: &RequestContext,
        ) -> Result<ToolOutput, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if args.get("fail").and_then(Value::as_bool) == Some(true) {
                return Err(ToolError::internal("boom").with_meta("retryable", true));
            }
            Ok(ToolOutput::json(&json!({
                "args": args,
                "role": ctx.header_first("x-user-role"),
            })))
        }
    }

    fn dispatcher(handler: Counting) -> Dispatcher {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolContract::new("test", "probe", "counting probe", handler.clone())
                    .with_input_schema(json!({
                        "type": "object",
                        "properties": {
                            "n": { "type": "integer", "minimum": 0 },
                            "fail": { "type": "boolean" }
                        },
                        "required": ["n"]
                    })),
            )
            .unwrap();
        registry
            .register(ToolContract::new("test", "bare", "no schema", handler))
            .unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn unknown_tool_never_invokes_a_handler() {
        let handler = Counting::default();
        let dispatcher = dispatcher(handler.clone());
        let err = dispatcher
            .dispatch("missing", Some(json!({ "n": 1 })), &RawRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTool);
        assert_eq!(err.data()["tool"], "missing");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_the_handler_runs() {
        let handler = Counting::default();
        let dispatcher = dispatcher(handler.clone());
        let request = RawRequest::default();

        let err = dispatcher
            .dispatch("probe", Some(json!({ "n": -3 })), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
        assert_eq!(err.data()["field"], "n");

        let err = dispatcher
            .dispatch("probe", Some(json!([1, 2])), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
        assert_eq!(err.data()["field"], Value::Null);

        let err = dispatcher.dispatch("probe", None, &request).await.unwrap_err();
        assert_eq!(err.data()["field"], "n");

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn context_is_built_from_the_raw_request() {
        let dispatcher = dispatcher(Counting::default());
        let request = RawRequest::from_headers([("X-User-Role", "HR_MANAGER")]);
        let output = dispatcher
            .dispatch("probe", Some(json!({ "n": 2 })), &request)
            .await
            .unwrap();
        let body: Value = serde_json::from_str(output.first_text().unwrap()).unwrap();
        assert_eq!(body["role"], "HR_MANAGER");
        assert_eq!(body["args"]["n"], 2);
    }

    #[tokio::test]
    async fn tools_without_schema_ignore_extra_arguments() {
        let dispatcher = dispatcher(Counting::default());
        let output = dispatcher
            .dispatch("bare", Some(json!({ "fail": true, "x": 1 })), &RawRequest::default())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(output.first_text().unwrap()).unwrap();
        assert_eq!(body["args"], json!({}));
    }

    #[tokio::test]
    async fn handler_errors_pass_through_unchanged() {
        let dispatcher = dispatcher(Counting::default());
        let err = dispatcher
            .dispatch("probe", Some(json!({ "n": 0, "fail": true })), &RawRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.message(), "boom");
        assert_eq!(err.data(), json!({ "retryable": true }));
    }
}
