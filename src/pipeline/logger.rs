use serde::Serialize;
use serde_json::Value;

use crate::error::CallStatus;

const MAX_LOGGED_ARGS: usize = 500;

/// One terminal tool call, as handed to a `CallLogger`.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub call_id: String,
    pub model: String,
    pub function: String,
    pub status: CallStatus,
    pub args: Value,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
}

/// Sink for call records. Implementations must not fail the call.
pub trait CallLogger: Send + Sync {
    fn log(&self, record: &CallRecord);
}

/// Writes one line per call through the `log` facade.
#[derive(Debug, Default, Clone)]
pub struct LogCallLogger;

impl CallLogger for LogCallLogger {
    fn log(&self, record: &CallRecord) {
        let args = truncate(&record.args.to_string(), MAX_LOGGED_ARGS);
        match &record.error {
            Some(error) => log::warn!(
                "tool_call id={} model={} function={} status={} duration_ms={} args={} error={}",
                record.call_id,
                record.model,
                record.function,
                record.status,
                record.duration_ms,
                args,
                error
            ),
            None => log::info!(
                "tool_call id={} model={} function={} status={} duration_ms={} args={}",
                record.call_id,
                record.model,
                record.function,
                record.status,
                record.duration_ms,
                args
            ),
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{}...", head)
}
