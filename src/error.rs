use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Terminal status of one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    ValidationError,
    ExecutionError,
    VerificationFailed,
    ParseError,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::ValidationError => "validation_error",
            CallStatus::ExecutionError => "execution_error",
            CallStatus::VerificationFailed => "verification_failed",
            CallStatus::ParseError => "parse_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallStatus::Success)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every way a tool call can fail. None of these escape the pipeline: each
/// becomes a tool result the model can read.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments for {function}: {reason}")]
    Validation { function: String, reason: String },

    #[error("{0}")]
    Execution(String),

    #[error("{message}")]
    VerificationFailed { message: String, verification: Value },

    #[error("{0}")]
    Parse(String),
}

impl ToolError {
    pub fn status(&self) -> CallStatus {
        match self {
            ToolError::Validation { .. } => CallStatus::ValidationError,
            ToolError::Execution(_) => CallStatus::ExecutionError,
            ToolError::VerificationFailed { .. } => CallStatus::VerificationFailed,
            ToolError::Parse(_) => CallStatus::ParseError,
        }
    }

    /// Uniform tool-result payload for this failure.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "success": false,
            "status": self.status().as_str(),
            "error": self.to_string(),
        });
        if let ToolError::VerificationFailed { verification, .. } = self {
            payload["verification"] = verification.clone();
        }
        payload
    }
}
