use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// A tool that can be offered to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The name of the tool, unique within one request
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// Parameters that the tool accepts, keyed by parameter name
    pub parameters: BTreeMap<String, ParameterSpec>,
}

impl ToolDescriptor {
    /// Create a new tool with the given name and description and no parameters
    pub fn new<N, D>(name: N, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        ToolDescriptor {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter<N, T, D>(
        mut self,
        name: N,
        param_type: T,
        description: D,
        required: bool,
    ) -> Self
    where
        N: Into<String>,
        T: Into<String>,
        D: Into<String>,
    {
        self.parameters.insert(
            name.into(),
            ParameterSpec {
                param_type: param_type.into(),
                description: description.into(),
                required,
            },
        );
        self
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
    }

    /// Render the parameters as a JSON schema object
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    json!({
                        "type": spec.param_type,
                        "description": spec.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&str> = self.required_parameters().collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A backend's request to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    /// Arguments as the backend encoded them, usually JSON text
    pub raw_arguments: String,
}

impl ToolCallRequest {
    pub fn new<I, N, A>(id: I, tool_name: N, raw_arguments: A) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Success,
    Error,
}

/// The answer to a tool call. One is produced for every request, failed or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub outcome: ToolOutcome,
    pub payload: Value,
}

impl ToolCallResult {
    pub fn success<S: Into<String>>(tool_call_id: S, result: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            outcome: ToolOutcome::Success,
            payload: json!({
                "status": "success",
                "result": result,
            }),
        }
    }

    pub fn error<S: Into<String>>(tool_call_id: S, tool: &str, message: &str) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            outcome: ToolOutcome::Error,
            payload: json!({
                "status": "error",
                "error": message,
                "tool": tool,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome == ToolOutcome::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_schema() {
        let tool = ToolDescriptor::new("lookup", "Look up a fact")
            .with_parameter("query", "string", "What to look up", true)
            .with_parameter("limit", "integer", "Maximum results", false);

        let schema = tool.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["description"], "Maximum results");
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[test]
    fn test_schema_without_parameters() {
        let schema = ToolDescriptor::new("ping", "Ping").input_schema();
        assert_eq!(schema["properties"], json!({}));
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn test_error_result_payload() {
        let result = ToolCallResult::error("call_1", "lookup", "boom");
        assert!(result.is_error());
        assert_eq!(result.payload["status"], "error");
        assert_eq!(result.payload["error"], "boom");
        assert_eq!(result.payload["tool"], "lookup");
    }

    #[test]
    fn test_success_result_payload() {
        let result = ToolCallResult::success("call_1", json!(42));
        assert!(!result.is_error());
        assert_eq!(result.payload, json!({"status": "success", "result": 42}));
    }
}
