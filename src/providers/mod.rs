//! Vendor wire formats and chat clients.
//!
//! Each vendor gets one adapter that translates between its native tool-call
//! shapes and the canonical `ParsedCall`, plus a thin HTTP client. The text
//! fallback is an adapter with no client.

pub mod anthropic;
pub mod fallback;
pub mod ollama;
pub mod openai;

pub use anthropic::{AnthropicAdapter, AnthropicClient};
pub use fallback::TextFallbackAdapter;
pub use ollama::{OllamaAdapter, OllamaClient};
pub use openai::{OpenAiAdapter, OpenAiClient};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::ops::AddAssign;
use std::sync::Arc;

use crate::config::AiModelConfig;
use crate::pipeline::CallOutcome;
use crate::tool_call::{ParsedCall, Provider, ToolDefinition};

/// Translation between a vendor's message shapes and canonical calls.
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Tool calls carried by an assistant message, in model order.
    fn parse_calls(&self, message: &Value) -> Vec<ParsedCall>;

    /// Result message for one executed call.
    fn format_result(&self, outcome: &CallOutcome) -> Value;

    /// Result messages for a whole batch, in call order.
    fn format_results(&self, outcomes: &[CallOutcome]) -> Vec<Value> {
        outcomes.iter().map(|outcome| self.format_result(outcome)).collect()
    }

    fn format_tools(&self, definitions: &[ToolDefinition]) -> Vec<Value>;

    /// Assistant message to keep in history ahead of the results, so that
    /// every result id has a matching call.
    fn history_message(&self, message: &Value, _calls: &[ParsedCall]) -> Value {
        message.clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// How the model may use the offered tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolChoice {
    #[default]
    Auto,
    /// At least one call, where the vendor supports forcing.
    Required,
    /// Text answer only. Tools stay declared where the vendor needs them to
    /// accept earlier calls in the history.
    Disabled,
}

/// Parameters for one model call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation in `{role, content}` form plus vendor result messages.
    pub messages: Vec<Value>,
    /// Tools already formatted by the client's adapter.
    pub tools: Vec<Value>,
    pub temperature: f32,
    pub tool_choice: ToolChoice,
}

#[derive(Debug, Clone)]
pub struct ModelReply {
    /// Assistant message in the vendor's shape, ready to append to the conversation.
    pub message: Value,
    pub text: String,
    pub usage: TokenUsage,
}

/// A chat-completion endpoint together with the adapter for its wire format.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model(&self) -> &str;
    fn adapter(&self) -> &dyn ProviderAdapter;
    async fn complete(&self, request: &ChatRequest) -> Result<ModelReply>;
}

pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";

/// Build the chat client named by `[ai_model]`.
pub fn from_config(config: &AiModelConfig) -> Result<Arc<dyn ChatModel>> {
    let model: Arc<dyn ChatModel> = match config.provider.as_str() {
        "ollama" => Arc::new(OllamaClient::new(
            config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_string()),
            config.model.clone(),
        )),
        "openai" => {
            let key = config
                .api_key
                .clone()
                .context("OpenAI provider requires api_key or OPENAI_API_KEY")?;
            Arc::new(OpenAiClient::new(config.endpoint.clone(), config.model.clone(), key))
        }
        "anthropic" => {
            let key = config
                .api_key
                .clone()
                .context("Anthropic provider requires api_key or ANTHROPIC_API_KEY")?;
            Arc::new(AnthropicClient::new(config.endpoint.clone(), config.model.clone(), key))
        }
        other => anyhow::bail!("Unknown AI provider: {}", other),
    };

    log::info!("Using {} model {}", config.provider, config.model);
    Ok(model)
}

/// Plain text of a message whose content is a string or a list of text blocks.
pub fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Calls in the `tool_calls[].function` shape shared by OpenAI and Ollama,
/// falling back to the legacy single `function_call`.
///
/// One `ParsedCall` per entry, in order: entries without a name come back
/// malformed so they still get a result.
pub(crate) fn parse_function_calls(message: &Value, provider: Provider) -> Vec<ParsedCall> {
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        return calls
            .iter()
            .map(|call| {
                let id = call.get("id").and_then(Value::as_str);
                function_call(id, call.get("function"), provider)
            })
            .collect();
    }

    match message.get("function_call") {
        Some(function) => vec![function_call(None, Some(function), provider)],
        None => Vec::new(),
    }
}

fn function_call(id: Option<&str>, function: Option<&Value>, provider: Provider) -> ParsedCall {
    let name = function.and_then(|f| f.get("name")).and_then(Value::as_str);
    match (name, function) {
        (Some(name), Some(function)) => {
            let raw = function.get("arguments").unwrap_or(&Value::Null);
            ParsedCall::from_raw(id, name, raw, provider)
        }
        _ => {
            log::warn!("{} tool call without a function name", provider.as_str());
            ParsedCall::unnamed(id, provider)
        }
    }
}

/// Rewrite a legacy `function_call` into `tool_calls` and fill in missing
/// ids, using the ids the parsed calls were given.
pub(crate) fn function_call_history(message: &Value, calls: &[ParsedCall]) -> Value {
    let mut message = message.clone();
    let Some(object) = message.as_object_mut() else {
        return message;
    };

    if let Some(function) = object.remove("function_call") {
        if let Some(call) = calls.first() {
            object.insert(
                "tool_calls".to_string(),
                serde_json::json!([{ "id": call.id(), "type": "function", "function": function }]),
            );
        }
        return message;
    }

    if let Some(entries) = object.get_mut("tool_calls").and_then(Value::as_array_mut) {
        for (entry, call) in entries.iter_mut().zip(calls) {
            let Some(entry) = entry.as_object_mut() else {
                continue;
            };
            let has_id = entry
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| !id.trim().is_empty());
            if !has_id {
                entry.insert("id".to_string(), Value::String(call.id().to_string()));
            }
        }
    }
    message
}

/// `{type: "function", function: {...}}` tool entries.
pub(crate) fn function_tools(definitions: &[ToolDefinition]) -> Vec<Value> {
    definitions
        .iter()
        .map(|def| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": def.name,
                    "description": def.description,
                    "parameters": def.parameters,
                }
            })
        })
        .collect()
}

/// Serialized payload used as the content of a result message.
pub(crate) fn result_content(outcome: &CallOutcome) -> String {
    outcome.payload.to_string()
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tool_calls_keeps_order() {
        let message = json!({
            "role": "assistant",
            "tool_calls": [
                { "id": "a", "type": "function", "function": { "name": "read_note", "arguments": "{\"file_path\": \"x.md\"}" } },
                { "id": "b", "type": "function", "function": { "name": "search_vault", "arguments": { "query": "milk" } } }
            ]
        });
        let calls = parse_function_calls(&message, Provider::OpenAi);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id(), "a");
        assert_eq!(calls[1].name(), "search_vault");
    }

    #[test]
    fn test_parse_legacy_function_call() {
        let message = json!({
            "role": "assistant",
            "function_call": { "name": "read_note", "arguments": "{\"file_path\": \"x.md\"}" }
        });
        let calls = parse_function_calls(&message, Provider::OpenAi);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id().starts_with("call_"));
    }

    #[test]
    fn test_nameless_entries_are_malformed() {
        let message = json!({
            "role": "assistant",
            "tool_calls": [
                { "id": "a", "type": "function", "function": { "arguments": "{}" } },
                { "id": "b", "type": "function", "function": { "name": "read_note", "arguments": "{}" } }
            ]
        });
        let calls = parse_function_calls(&message, Provider::OpenAi);
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], ParsedCall::Malformed(call) if call.id == "a"));
        assert!(matches!(&calls[1], ParsedCall::Ready(call) if call.name == "read_note"));
    }

    #[test]
    fn test_history_fills_missing_ids() {
        let message = json!({
            "role": "assistant",
            "tool_calls": [
                { "function": { "name": "read_note", "arguments": { "file_path": "a.md" } } },
                { "id": "kept", "function": { "name": "read_note", "arguments": { "file_path": "b.md" } } }
            ]
        });
        let calls = parse_function_calls(&message, Provider::Ollama);
        let history = function_call_history(&message, &calls);
        assert_eq!(history["tool_calls"][0]["id"], calls[0].id());
        assert_eq!(history["tool_calls"][1]["id"], "kept");
    }

    #[test]
    fn test_message_text_from_blocks() {
        let message = json!({
            "content": [
                { "type": "text", "text": "Hello" },
                { "type": "tool_use", "id": "t", "name": "x", "input": {} },
                { "type": "text", "text": "world" }
            ]
        });
        assert_eq!(message_text(&message), "Hello\nworld");
        assert_eq!(message_text(&json!({ "content": "plain" })), "plain");
        assert_eq!(message_text(&json!({ "content": null })), "");
    }

    #[test]
    fn test_from_config_requires_keys() {
        let mut config = AiModelConfig {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            endpoint: None,
            temperature: 0.3,
            api_key: None,
        };
        assert!(from_config(&config).is_err());

        config.api_key = Some("k".to_string());
        let model = from_config(&config).unwrap();
        assert_eq!(model.adapter().provider(), Provider::OpenAi);

        config.provider = "ollama".to_string();
        config.api_key = None;
        assert_eq!(from_config(&config).unwrap().model(), "gpt-4o-mini");

        config.provider = "gemini".to_string();
        assert!(from_config(&config).is_err());
    }

    #[test]
    fn test_usage_adds_up() {
        let mut total = TokenUsage::default();
        total += TokenUsage { input_tokens: 10, output_tokens: 3 };
        total += TokenUsage { input_tokens: 5, output_tokens: 2 };
        assert_eq!(total, TokenUsage { input_tokens: 15, output_tokens: 5 });
    }
}
