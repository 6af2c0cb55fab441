//! Prompt generators
//!
//! A prompt generator turns an argument map into message text for
//! `prompts/get`.

use crate::tools::ToolError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Renders a prompt from its arguments
#[async_trait]
pub trait PromptGenerator: Send + Sync {
    async fn generate(&self, arguments: &Map<String, Value>) -> Result<String, ToolError>;
}

/// Template with `{{name}}` placeholders.
///
/// String arguments are substituted verbatim, other values as JSON.
/// Placeholders with no matching argument are left in place.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    required: Vec<String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            required: Vec::new(),
        }
    }

    /// Fail with invalid arguments when `name` is missing
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    pub fn render(&self, arguments: &Map<String, Value>) -> String {
        arguments
            .iter()
            .fold(self.template.clone(), |text, (key, value)| {
                let replacement = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                text.replace(&format!("{{{{{}}}}}", key), &replacement)
            })
    }
}

#[async_trait]
impl PromptGenerator for PromptTemplate {
    async fn generate(&self, arguments: &Map<String, Value>) -> Result<String, ToolError> {
        if let Some(missing) = self.required.iter().find(|name| !arguments.contains_key(*name)) {
            return Err(ToolError::invalid_arguments(format!(
                "Missing required argument: {}",
                missing
            )));
        }
        Ok(self.render(arguments))
    }
}
