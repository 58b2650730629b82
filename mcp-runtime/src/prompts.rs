//! Prompt templates. Only `code_review` is served.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::registry::RegistryError;

#[derive(Debug, Clone, Serialize)]
pub struct PromptArgument {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: Value,
}

type Render = fn(&HashMap<&'static str, String>) -> Vec<PromptMessage>;

#[derive(Debug, Clone)]
pub struct PromptDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: Vec<PromptArgument>,
    render: Render,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("Prompt {0} not found")]
    UnknownPrompt(String),
    #[error("Missing required argument '{argument}' for prompt {prompt}")]
    MissingArgument { prompt: String, argument: String },
    #[error("Argument '{argument}' for prompt {prompt} must be a string")]
    InvalidArgument { prompt: String, argument: String },
}

#[derive(Debug, Default)]
pub struct PromptRegistry {
    prompts: Vec<PromptDefinition>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prompt: PromptDefinition) -> Result<(), RegistryError> {
        if self.prompts.iter().any(|existing| existing.name == prompt.name) {
            return Err(RegistryError::DuplicatePrompt(prompt.name.to_string()));
        }
        self.prompts.push(prompt);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn list_payload(&self) -> Value {
        let prompts: Vec<Value> = self
            .prompts
            .iter()
            .map(|prompt| {
                json!({
                    "name": prompt.name,
                    "description": prompt.description,
                    "arguments": prompt.arguments,
                })
            })
            .collect();
        json!({ "prompts": prompts })
    }

    pub fn get(&self, name: &str, args: &Map<String, Value>) -> Result<Value, PromptError> {
        let prompt = self
            .prompts
            .iter()
            .find(|prompt| prompt.name == name)
            .ok_or_else(|| PromptError::UnknownPrompt(name.to_string()))?;

        let mut values = HashMap::new();
        for argument in &prompt.arguments {
            match args.get(argument.name) {
                Some(Value::String(value)) => {
                    values.insert(argument.name, value.clone());
                }
                Some(Value::Null) | None if !argument.required => {}
                Some(Value::Null) | None => {
                    return Err(PromptError::MissingArgument {
                        prompt: prompt.name.to_string(),
                        argument: argument.name.to_string(),
                    });
                }
                Some(_) => {
                    return Err(PromptError::InvalidArgument {
                        prompt: prompt.name.to_string(),
                        argument: argument.name.to_string(),
                    });
                }
            }
        }

        Ok(json!({
            "description": prompt.description,
            "messages": (prompt.render)(&values),
        }))
    }
}

pub fn register_all(registry: &mut PromptRegistry) -> Result<(), RegistryError> {
    registry.register(PromptDefinition {
        name: "code_review",
        description: "Prompt template for requesting a code review.",
        arguments: vec![
            PromptArgument {
                name: "language",
                description: "Programming language",
                required: true,
            },
            PromptArgument {
                name: "code",
                description: "Code to review",
                required: true,
            },
        ],
        render: render_code_review,
    })
}

fn render_code_review(values: &HashMap<&'static str, String>) -> Vec<PromptMessage> {
    let language = values.get("language").map(String::as_str).unwrap_or_default();
    let code = values.get("code").map(String::as_str).unwrap_or_default();
    vec![PromptMessage {
        role: "user",
        content: json!({
            "type": "text",
            "text": format!(
                "Please review the following {language} code:\n\n```{language}\n{code}\n```"
            ),
        }),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PromptRegistry {
        let mut registry = PromptRegistry::new();
        register_all(&mut registry).unwrap();
        registry
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn code_review_renders_a_single_user_message() {
        let payload = registry()
            .get("code_review", &args(json!({ "language": "rust", "code": "fn main() {}" })))
            .unwrap();
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(
            messages[0]["content"]["text"],
            "Please review the following rust code:\n\n```rust\nfn main() {}\n```"
        );
    }

    #[test]
    fn missing_or_mistyped_arguments_are_rejected() {
        let registry = registry();
        assert_eq!(
            registry.get("code_review", &args(json!({ "language": "go" }))),
            Err(PromptError::MissingArgument {
                prompt: "code_review".to_string(),
                argument: "code".to_string()
            })
        );
        assert!(matches!(
            registry.get("code_review", &args(json!({ "language": 1, "code": "x" }))),
            Err(PromptError::InvalidArgument { .. })
        ));
        assert!(matches!(
            registry.get("summarize", &Map::new()),
            Err(PromptError::UnknownPrompt(_))
        ));
    }

    #[test]
    fn duplicate_prompt_is_rejected() {
        let mut registry = registry();
        assert!(matches!(
            register_all(&mut registry),
            Err(RegistryError::DuplicatePrompt(name)) if name == "code_review"
        ));
    }

    #[test]
    fn list_describes_required_arguments() {
        let payload = registry().list_payload();
        assert_eq!(payload["prompts"][0]["name"], "code_review");
        assert_eq!(payload["prompts"][0]["arguments"][0]["name"], "language");
        assert_eq!(payload["prompts"][0]["arguments"][1]["required"], true);
    }
}
