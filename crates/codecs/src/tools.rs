use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool's JSON-schema-shaped parameter list, as offered to a model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolParameterSchema {
    /// Parameter name -> its schema fragment (expects at least a `type`/`description`).
    #[serde(default)]
    pub properties: indexmap::IndexMap<String, Value>,
    /// Names of required parameters.
    #[serde(default)]
    pub required: Vec<String>,
}

/// A tool as offered to a model in its system prompt: name, description, and
/// parameter schema, independent of dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// The name the model should use to call this tool.
    pub name: String,
    /// Human-readable description shown to the model.
    #[serde(default)]
    pub description: String,
    /// Parameter schema.
    #[serde(default, rename = "inputSchema")]
    pub input_schema: ToolParameterSchema,
}

impl ToolSchema {
    /// Normalize an OpenAI-shape tool definition
    /// (`{"type":"function","function":{"name",...,"parameters":...}}`) into
    /// the internal `{name, description, inputSchema}` shape. Returns `None`
    /// if `value` isn't recognizable as either shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(function) = value.get("function") {
            return Self::from_flat(function);
        }

        Self::from_flat(value)
    }

    fn from_flat(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.to_string();
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let schema_value = value.get("inputSchema").or_else(|| value.get("parameters"));

        let input_schema = match schema_value {
            Some(v) => serde_json::from_value(v.clone()).unwrap_or_default(),
            None => ToolParameterSchema::default(),
        };

        Some(Self {
            name,
            description,
            input_schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_openai_shape() {
        let value = serde_json::json!({
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Get current weather",
                "parameters": {
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                }
            }
        });

        let tool = ToolSchema::from_value(&value).unwrap();
        assert_eq!(tool.name, "get_weather");
        assert_eq!(tool.input_schema.required, vec!["city"]);
    }

    #[test]
    fn accepts_flat_shape() {
        let value = serde_json::json!({
            "name": "get_weather",
            "description": "Get current weather",
            "inputSchema": {"properties": {}, "required": []}
        });

        let tool = ToolSchema::from_value(&value).unwrap();
        assert_eq!(tool.name, "get_weather");
    }

    #[test]
    fn rejects_unrecognizable_value() {
        let value = serde_json::json!({"foo": "bar"});
        assert!(ToolSchema::from_value(&value).is_none());
    }
}
