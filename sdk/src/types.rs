//! Tool schema, input and output types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JSON type of a declared tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// One declared parameter of a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    /// A required parameter
    pub fn required(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
        }
    }

    /// An optional parameter
    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: false,
        }
    }
}

/// Declared argument shape of a tool, advertised to the model and checked
/// before every dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Validate raw arguments against this schema.
    ///
    /// Arguments must be a JSON object. Every required parameter must be
    /// present, every present parameter must have the declared type, and
    /// parameters the schema does not declare are rejected.
    pub fn validate(&self, arguments: &serde_json::Value) -> Result<ToolInput, ToolError> {
        let object = arguments.as_object().ok_or_else(|| {
            ToolError::InvalidParameter("arguments must be a JSON object".to_string())
        })?;

        for key in object.keys() {
            if !self.params.iter().any(|p| &p.name == key) {
                return Err(ToolError::UnexpectedParameter(key.clone()));
            }
        }

        let mut input = ToolInput::new(&self.name);
        for spec in &self.params {
            match object.get(&spec.name) {
                Some(serde_json::Value::Null) | None if spec.required => {
                    return Err(ToolError::MissingParameter(spec.name.clone()));
                }
                Some(serde_json::Value::Null) | None => {}
                Some(value) if !spec.param_type.matches(value) => {
                    return Err(ToolError::InvalidParameter(format!(
                        "'{}' must be of type {}",
                        spec.name,
                        spec.param_type.as_str()
                    )));
                }
                Some(value) => {
                    input.params.insert(spec.name.clone(), value.clone());
                }
            }
        }

        Ok(input)
    }

    /// Render as a JSON-schema style function declaration for providers that
    /// support native tool calling.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for spec in &self.params {
            properties.insert(
                spec.name.clone(),
                serde_json::json!({
                    "type": spec.param_type.as_str(),
                    "description": spec.description,
                }),
            );
            if spec.required {
                required.push(spec.name.clone());
            }
        }

        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// Validated input to a tool handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool: String,
    pub params: HashMap<String, serde_json::Value>,
}

impl ToolInput {
    /// Create a new ToolInput
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: HashMap::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an i64 parameter
    pub fn param_i64(&self, key: &str) -> Result<i64, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get an optional bool parameter
    pub fn param_bool_opt(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|v| v.as_bool())
    }
}

/// Output from a tool handler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}

impl ToolOutput {
    /// Create a successful output with text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            success: true,
            data: serde_json::json!({ "text": text.into() }),
            error: None,
        }
    }

    /// Create a successful output with JSON data
    pub fn json(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    /// Create an error output
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// Text rendering handed back to the model
    pub fn render(&self) -> String {
        if let Some(error) = &self.error {
            return format!("ERROR: {}", error);
        }
        match self.data.get("text").and_then(|v| v.as_str()) {
            Some(text) => text.to_string(),
            None => self.data.to_string(),
        }
    }
}

/// Argument validation errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unexpected parameter: {0}")]
    UnexpectedParameter(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_schema() -> ToolSchema {
        ToolSchema::new("read_file", "Read a file")
            .with_param(ParamSpec::required("path", ParamType::String, "File path"))
            .with_param(ParamSpec::optional(
                "max_bytes",
                ParamType::Integer,
                "Byte limit",
            ))
    }

    #[test]
    fn test_validate_accepts_declared_shape() {
        let input = read_schema()
            .validate(&json!({"path": "README.md", "max_bytes": 10}))
            .unwrap();
        assert_eq!(input.tool, "read_file");
        assert_eq!(input.param_str("path").unwrap(), "README.md");
        assert_eq!(input.param_i64("max_bytes").unwrap(), 10);
    }

    #[test]
    fn test_validate_optional_may_be_absent() {
        let input = read_schema().validate(&json!({"path": "a"})).unwrap();
        assert!(input.params.get("max_bytes").is_none());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = read_schema().validate(&json!({})).unwrap_err();
        assert!(matches!(err, ToolError::MissingParameter(p) if p == "path"));
    }

    #[test]
    fn test_validate_wrong_type() {
        let err = read_schema().validate(&json!({"path": 42})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameter(_)));
    }

    #[test]
    fn test_validate_unexpected_parameter() {
        let err = read_schema()
            .validate(&json!({"path": "a", "mode": "rw"}))
            .unwrap_err();
        assert!(matches!(err, ToolError::UnexpectedParameter(p) if p == "mode"));
    }

    #[test]
    fn test_validate_non_object() {
        let err = read_schema().validate(&json!(["a"])).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameter(_)));
    }

    #[test]
    fn test_json_schema_lists_required() {
        let schema = read_schema().to_json_schema();
        assert_eq!(schema["function"]["name"], "read_file");
        assert_eq!(schema["function"]["parameters"]["required"], json!(["path"]));
        assert_eq!(
            schema["function"]["parameters"]["properties"]["max_bytes"]["type"],
            "integer"
        );
    }

    #[test]
    fn test_tool_output_render() {
        assert_eq!(ToolOutput::text("hi").render(), "hi");
        assert_eq!(ToolOutput::error("boom").render(), "ERROR: boom");
        assert_eq!(ToolOutput::json(json!({"n": 1})).render(), r#"{"n":1}"#);
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::MissingParameter("test_param".to_string());
        assert_eq!(err.to_string(), "Missing parameter: test_param");

        let err = ToolError::InvalidParameter("bad_value".to_string());
        assert_eq!(err.to_string(), "Invalid parameter: bad_value");
    }
}
