use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider-neutral description of a callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name, unique per server.
    pub name: String,

    /// Human-readable description, shown to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema of the tool's parameters.
    pub parameters: Value,
}

impl ToolSchema {
    /// Parse one entry of a plain-HTTP `GET /tools` listing.
    ///
    /// Servers serve either OpenAI-function shaped entries
    /// (`{"type":"function","function":{…}}`) or bare
    /// `{name, description, parameters|input_schema}` objects; both are
    /// accepted. Entries without a name are dropped.
    pub fn from_listing_value(value: &Value) -> Option<Self> {
        let body = value.get("function").unwrap_or(value);

        let name = body.get("name")?.as_str()?.to_string();

        let description = body
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        let parameters = body
            .get("parameters")
            .or_else(|| body.get("input_schema"))
            .cloned()
            .unwrap_or_else(empty_object_schema);

        Some(Self {
            name,
            description,
            parameters,
        })
    }

    /// Convert an MCP tool definition.
    pub(crate) fn from_mcp_tool(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.as_deref().map(str::to_string),
            parameters: Value::Object((*tool.input_schema).clone()),
        }
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}
