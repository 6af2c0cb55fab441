//! Tool descriptors and the two function-calling projections

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Externally visible tool description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Projection with upper-cased primitive type names (`STRING`, `OBJECT`, ...)
pub fn gemini_declaration(tool: &ToolDescriptor) -> Value {
    let properties = tool
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, def)| {
                    let kind = def.get("type").and_then(Value::as_str).unwrap_or("string");
                    let description = def.get("description").and_then(Value::as_str).unwrap_or("");

                    let mut prop = Map::new();
                    prop.insert("type".to_string(), Value::String(kind.to_uppercase()));
                    prop.insert("description".to_string(), Value::String(description.to_string()));
                    if let Some(values) = def.get("enum") {
                        prop.insert("enum".to_string(), values.clone());
                    }
                    (name.clone(), Value::Object(prop))
                })
                .collect::<Map<String, Value>>()
        })
        .unwrap_or_default();

    let required = tool
        .input_schema
        .get("required")
        .cloned()
        .unwrap_or_else(|| json!([]));

    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": {
            "type": "OBJECT",
            "properties": properties,
            "required": required,
        }
    })
}

/// Projection passing the schema through with `type` values lower-cased
pub fn anthropic_declaration(tool: &ToolDescriptor) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": lowercase_types(&tool.input_schema),
    })
}

fn lowercase_types(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let converted = match (key.as_str(), inner) {
                        ("type", Value::String(kind)) => Value::String(kind.to_lowercase()),
                        _ => lowercase_types(inner),
                    };
                    (key.clone(), converted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(lowercase_types).collect()),
        other => other.clone(),
    }
}
