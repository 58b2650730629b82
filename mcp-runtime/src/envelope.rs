//! Result envelope shared by every tool: success content or a structured error.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value, json};

/// Closed set of error kinds a tool call can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller or context violates a precondition (role, credential, status).
    InvalidRequest,
    /// Simulated backend failure.
    Internal,
    /// No tool registered under the requested name.
    UnknownTool,
    /// Arguments rejected by the tool's input schema.
    InvalidArguments,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Internal => "internal",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::InvalidArguments => "invalid_arguments",
        }
    }

    /// JSON-RPC error code used on the wire for this kind.
    pub fn rpc_code(self) -> i64 {
        match self {
            ErrorKind::InvalidRequest => -32600,
            ErrorKind::Internal => -32603,
            ErrorKind::UnknownTool | ErrorKind::InvalidArguments => -32602,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured tool failure: a kind, a message and free-form metadata.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
    pub metadata: Map<String, Value>,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn to_value(&self) -> Value {
        json!({
            "errorKind": self.kind,
            "message": self.message,
            "metadata": self.metadata,
        })
    }
}

/// One item of a success envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Content::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            Content::Image { .. } => None,
        }
    }
}

/// Success envelope. `is_error` stays false for soft failures, which are
/// successful calls with an empty semantic outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub content: Vec<Content>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn new(content: Vec<Content>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![Content::text(text)])
    }

    /// Text envelope carrying a pretty-printed JSON document.
    pub fn json(value: &Value) -> Self {
        Self::text(to_pretty_json(value))
    }

    /// Text of the first text item, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(Content::as_text)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "content": [], "isError": false }))
    }
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_rpc_codes() {
        assert_eq!(ErrorKind::InvalidRequest.rpc_code(), -32600);
        assert_eq!(ErrorKind::Internal.rpc_code(), -32603);
        assert_eq!(ErrorKind::UnknownTool.rpc_code(), -32602);
        assert_eq!(ErrorKind::InvalidArguments.rpc_code(), -32602);
    }

    #[test]
    fn tool_error_keeps_metadata_order_and_values() {
        let err = ToolError::internal("down")
            .with_meta("retry_after", 30)
            .with_meta("retryable", true);
        let value = err.to_value();
        assert_eq!(value["errorKind"], "internal");
        assert_eq!(value["metadata"]["retry_after"], 30);
        assert_eq!(value["metadata"]["retryable"], true);
        assert_eq!(err.to_string(), "internal: down");
    }

    #[test]
    fn output_serializes_with_type_tags_and_is_error_flag() {
        let output = ToolOutput::new(vec![
            Content::image("AAAA", "image/png"),
            Content::text("caption"),
        ]);
        let value = output.to_value();
        assert_eq!(value["isError"], false);
        assert_eq!(value["content"][0]["type"], "image");
        assert_eq!(value["content"][0]["mimeType"], "image/png");
        assert_eq!(value["content"][1]["type"], "text");
        assert_eq!(value["content"][1]["text"], "caption");
    }
}
