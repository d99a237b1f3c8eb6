// Core types for tool hosts
//
// Descriptor shape follows the Claude API tool definition format; other
// backends convert from it when the request body is built.

use crate::conversation::ToolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool exposed by a connected host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Host that owns the tool; not part of the wire format
    #[serde(skip)]
    pub owner_host_id: String,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        owner_host_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            owner_host_id: owner_host_id.into(),
        }
    }
}

/// JSON Schema for tool input parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub schema_type: String, // Usually "object"
    pub properties: Value,
    pub required: Vec<String>,
}

impl ToolInputSchema {
    /// Create a simple schema with required string parameters
    pub fn simple(params: Vec<(&str, &str)>) -> Self {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for (param_name, param_desc) in params.iter() {
            properties.insert(
                param_name.to_string(),
                serde_json::json!({
                    "type": "string",
                    "description": param_desc
                }),
            );
            required.push(param_name.to_string());
        }

        Self {
            schema_type: "object".to_string(),
            properties: Value::Object(properties),
            required,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": self.schema_type,
            "properties": self.properties,
            "required": self.required,
        })
    }
}

/// Structured result of one tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }

    /// Pair with the invocation that produced it
    pub fn into_result(self, tool_use_id: String) -> ToolResult {
        ToolResult {
            tool_use_id,
            content: self.content,
            is_error: self.is_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_input_schema() {
        let schema = ToolInputSchema::simple(vec![("path", "Directory to list")]);
        let value = schema.to_value();
        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["path"]["type"], "string");
        assert_eq!(value["required"][0], "path");
    }

    #[test]
    fn test_descriptor_wire_format_skips_owner() {
        let descriptor = ToolDescriptor::new("bash", "Run", serde_json::json!({}), "builtin");
        let value = serde_json::to_value(&descriptor).unwrap();
        assert!(value.get("owner_host_id").is_none());
        assert_eq!(value["name"], "bash");
    }

    #[test]
    fn test_output_into_result() {
        let result = ToolOutput::error("nope").into_result("toolu_9".to_string());
        assert_eq!(result.tool_use_id, "toolu_9");
        assert!(result.is_error);
    }
}
