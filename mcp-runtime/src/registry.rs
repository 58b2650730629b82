//! Tool contracts and the flat, name-keyed registry they live in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::context::RequestContext;
use crate::envelope::{ToolError, ToolOutput};
use crate::schema::{ArgumentSchema, SchemaError};

/// Body of a tool. Receives arguments that already passed the contract's
/// schema, plus the context of this one invocation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        args: Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError>;
}

#[derive(Clone)]
pub struct ToolContract {
    pub name: &'static str,
    pub module: &'static str,
    pub description: &'static str,
    /// `None` means the tool takes no arguments.
    pub input_schema: Option<Value>,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolContract {
    pub fn new(
        module: &'static str,
        name: &'static str,
        description: &'static str,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name,
            module,
            description,
            input_schema: None,
            handler: Arc::new(handler),
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Schema advertised to clients; argument-less tools advertise an empty object.
    pub fn advertised_schema(&self) -> Value {
        self.input_schema.clone().unwrap_or_else(|| {
            json!({
                "type": "object",
                "properties": {}
            })
        })
    }
}

impl std::fmt::Debug for ToolContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContract")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
    #[error("prompt '{0}' is already registered")]
    DuplicatePrompt(String),
    #[error("tool '{tool}' declares an unusable schema: {source}")]
    InvalidSchema {
        tool: String,
        #[source]
        source: SchemaError,
    },
}

#[derive(Debug)]
pub struct RegisteredTool {
    pub contract: ToolContract,
    pub schema: Option<ArgumentSchema>,
}

/// Tools in registration order, looked up by name. Names are unique:
/// a second registration under a taken name is rejected and leaves the
/// registry untouched.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, contract: ToolContract) -> Result<(), RegistryError> {
        if self.index.contains_key(contract.name) {
            return Err(RegistryError::DuplicateTool(contract.name.to_string()));
        }

        let schema = contract
            .input_schema
            .as_ref()
            .map(ArgumentSchema::compile)
            .transpose()
            .map_err(|source| RegistryError::InvalidSchema {
                tool: contract.name.to_string(),
                source,
            })?;

        tracing::debug!(
            event = "tool_registered",
            tool = contract.name,
            module = contract.module,
        );
        self.index.insert(contract.name, self.tools.len());
        self.tools.push(RegisteredTool { contract, schema });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).and_then(|idx| self.tools.get(*idx))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolContract> {
        self.tools.iter().map(|tool| &tool.contract)
    }

    pub fn names_in_module<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'static str> + 'a {
        self.iter()
            .filter(move |contract| contract.module == module)
            .map(|contract| contract.name)
    }
}
