use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Arguments of a tool call, always a JSON object once decoded.
pub type Arguments = Map<String, Value>;

/// Vendor family a call was issued by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Ollama,
    TextFallback,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
            Provider::TextFallback => "text_fallback",
        }
    }
}

/// Name reported for calls that arrived without one.
pub const UNNAMED_CALL: &str = "unknown";

/// A model-issued request to run one named operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Arguments,
    pub provider: Provider,
}

impl ToolCall {
    /// Build a call, synthesizing an id when the vendor did not send one.
    pub fn new(
        id: Option<&str>,
        name: impl Into<String>,
        arguments: Arguments,
        provider: Provider,
    ) -> Self {
        Self {
            id: id_or_synthesized(id),
            name: name.into(),
            arguments,
            provider,
        }
    }
}

/// A call whose argument encoding could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedCall {
    pub id: String,
    pub name: String,
    pub error: String,
    pub provider: Provider,
}

/// Output of an adapter: either a runnable call or a parse failure that
/// still needs a tool result so the model can react to it.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCall {
    Ready(ToolCall),
    Malformed(MalformedCall),
}

impl ParsedCall {
    /// Decode raw arguments and wrap the result.
    pub fn from_raw(id: Option<&str>, name: &str, raw: &Value, provider: Provider) -> Self {
        match parse_arguments(raw) {
            Ok(arguments) => ParsedCall::Ready(ToolCall::new(id, name, arguments, provider)),
            Err(error) => ParsedCall::Malformed(MalformedCall {
                id: id_or_synthesized(id),
                name: name.to_string(),
                error,
                provider,
            }),
        }
    }

    /// A call entry the vendor sent without a usable name.
    pub fn unnamed(id: Option<&str>, provider: Provider) -> Self {
        ParsedCall::Malformed(MalformedCall {
            id: id_or_synthesized(id),
            name: UNNAMED_CALL.to_string(),
            error: "missing tool name".to_string(),
            provider,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            ParsedCall::Ready(call) => &call.id,
            ParsedCall::Malformed(call) => &call.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ParsedCall::Ready(call) => &call.name,
            ParsedCall::Malformed(call) => &call.name,
        }
    }
}

/// Generate an id of the form `call_<8 hex>`.
pub fn synthesize_call_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..8])
}

fn id_or_synthesized(id: Option<&str>) -> String {
    match id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => synthesize_call_id(),
    }
}

/// Accept both pre-parsed objects and JSON-string encoded arguments.
///
/// `null` and blank strings decode to an empty map. Anything that is not,
/// or does not decode to, a JSON object is an error.
pub fn parse_arguments(raw: &Value) -> Result<Arguments, String> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Arguments::new()),
        Value::String(text) if text.trim().is_empty() => Ok(Arguments::new()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!(
                "JSON parse error: arguments must be an object, got {}",
                json_type_name(&other)
            )),
            Err(e) => Err(format!("JSON parse error: {}", e)),
        },
        other => Err(format!(
            "JSON parse error: arguments must be an object, got {}",
            json_type_name(other)
        )),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Result returned by the operation registry for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Arguments,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            error: Some(message.clone()),
            message,
            ..Default::default()
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Path of the file the operation touched, if it reported one.
    pub fn file_path(&self) -> Option<&str> {
        ["file_path", "absolute_path", "path", "full_path"]
            .iter()
            .find_map(|key| self.str_field(key))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self)
            .unwrap_or_else(|_| json!({ "success": self.success, "message": self.message }))
    }
}

/// Canonical tool definition offered to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// Object schema with the given `(name, type, description)` properties.
    pub fn new(
        name: &str,
        description: &str,
        properties: &[(&str, &str, &str)],
        required: &[&str],
    ) -> Self {
        let mut props = Map::new();
        for (prop, kind, desc) in properties {
            let schema = if *kind == "array" {
                json!({ "type": "array", "items": { "type": "string" }, "description": desc })
            } else {
                json!({ "type": kind, "description": desc })
            };
            props.insert(prop.to_string(), schema);
        }

        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": props,
                "required": required,
            }),
        }
    }
}
