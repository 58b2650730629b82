//! Argument gate compiled from a tool's declared input schema.
//!
//! Each declared property gets its own validator so a rejection can name the
//! offending field. Properties the schema does not declare are ignored.

use jsonschema::{Draft, Validator};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid schema for property '{property}': {message}")]
pub struct SchemaError {
    pub property: String,
    pub message: String,
}

/// Rejection of one argument field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentError {
    pub field: String,
    pub messages: Vec<String>,
}

pub struct ArgumentSchema {
    required: Vec<String>,
    properties: Vec<(String, Validator)>,
}

impl std::fmt::Debug for ArgumentSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentSchema")
            .field("required", &self.required)
            .field(
                "properties",
                &self.properties.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ArgumentSchema {
    pub fn compile(schema: &Value) -> Result<Self, SchemaError> {
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut properties = Vec::new();
        if let Some(declared) = schema.get("properties").and_then(Value::as_object) {
            for (name, property_schema) in declared {
                let validator = compile_property(property_schema).map_err(|message| SchemaError {
                    property: name.clone(),
                    message,
                })?;
                properties.push((name.clone(), validator));
            }
        }

        Ok(Self {
            required,
            properties,
        })
    }

    /// Checks required fields first, then every present declared property.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), ArgumentError> {
        for field in &self.required {
            if args.get(field).is_none_or(Value::is_null) {
                return Err(ArgumentError {
                    field: field.clone(),
                    messages: vec![format!("missing required property '{field}'")],
                });
            }
        }

        for (name, validator) in &self.properties {
            let Some(value) = args.get(name) else {
                continue;
            };
            let messages: Vec<String> = validator
                .iter_errors(value)
                .map(|err| err.to_string())
                .collect();
            if !messages.is_empty() {
                return Err(ArgumentError {
                    field: name.clone(),
                    messages,
                });
            }
        }
        Ok(())
    }
}

fn compile_property(schema: &Value) -> Result<Validator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| err.to_string())
}
