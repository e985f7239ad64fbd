use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    message_text, result_content, ChatModel, ChatRequest, ModelReply, ProviderAdapter, TokenUsage, ToolChoice,
};
use crate::pipeline::CallOutcome;
use crate::tool_call::{ParsedCall, Provider, ToolDefinition};

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    fn result_block(outcome: &CallOutcome) -> Value {
        json!({
            "type": "tool_result",
            "tool_use_id": outcome.call_id,
            "content": result_content(outcome),
        })
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn parse_calls(&self, message: &Value) -> Vec<ParsedCall> {
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            return Vec::new();
        };

        blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
            .map(|block| {
                let id = block.get("id").and_then(Value::as_str);
                match block.get("name").and_then(Value::as_str) {
                    Some(name) => {
                        let raw = block.get("input").unwrap_or(&Value::Null);
                        ParsedCall::from_raw(id, name, raw, Provider::Anthropic)
                    }
                    None => {
                        log::warn!("anthropic tool_use block without a name");
                        ParsedCall::unnamed(id, Provider::Anthropic)
                    }
                }
            })
            .collect()
    }

    fn format_result(&self, outcome: &CallOutcome) -> Value {
        json!({
            "role": "user",
            "content": [Self::result_block(outcome)],
        })
    }

    /// One user message for the whole batch; the API rejects consecutive
    /// user turns.
    fn format_results(&self, outcomes: &[CallOutcome]) -> Vec<Value> {
        if outcomes.is_empty() {
            return Vec::new();
        }
        let blocks: Vec<Value> = outcomes.iter().map(Self::result_block).collect();
        vec![json!({ "role": "user", "content": blocks })]
    }

    fn format_tools(&self, definitions: &[ToolDefinition]) -> Vec<Value> {
        definitions
            .iter()
            .map(|def| {
                json!({
                    "name": def.name,
                    "description": def.description,
                    "input_schema": def.parameters,
                })
            })
            .collect()
    }
}

/// Client for the messages API.
pub struct AnthropicClient {
    pub endpoint: String,
    pub model: String,
    api_key: String,
    client: reqwest::Client,
    adapter: AnthropicAdapter,
}

impl AnthropicClient {
    pub fn new(endpoint: Option<String>, model: String, api_key: String) -> Self {
        Self {
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model,
            api_key,
            client: reqwest::Client::new(),
            adapter: AnthropicAdapter,
        }
    }

    /// System messages travel in the top-level `system` field.
    fn request_body(&self, request: &ChatRequest) -> Value {
        let (system, messages): (Vec<&Value>, Vec<&Value>) = request
            .messages
            .iter()
            .partition(|m| m.get("role").and_then(Value::as_str) == Some("system"));

        let system = system
            .iter()
            .map(|m| message_text(m))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": messages,
            "temperature": request.temperature,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
            match request.tool_choice {
                ToolChoice::Auto => {}
                ToolChoice::Required => body["tool_choice"] = json!({ "type": "any" }),
                ToolChoice::Disabled => body["tool_choice"] = json!({ "type": "none" }),
            }
        }
        body
    }
}

fn parse_reply(response: &Value) -> Result<ModelReply> {
    let content = response
        .get("content")
        .and_then(Value::as_array)
        .context("No content in Anthropic response")?;

    // Keep only tool_use blocks in history; the preamble text is dropped.
    let has_tool_use = content
        .iter()
        .any(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"));
    let kept: Vec<Value> = if has_tool_use {
        content
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
            .cloned()
            .collect()
    } else {
        content.clone()
    };

    let text = message_text(&json!({ "content": content }));
    let usage = TokenUsage {
        input_tokens: response["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: response["usage"]["output_tokens"].as_u64().unwrap_or(0),
    };

    Ok(ModelReply {
        message: json!({ "role": "assistant", "content": kept }),
        text,
        usage,
    })
}

#[async_trait]
impl ChatModel for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn adapter(&self) -> &dyn ProviderAdapter {
        &self.adapter
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ModelReply> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.endpoint.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(request))
            .send()
            .await
            .context("Failed to send request to Anthropic")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error ({}): {}", status, error_text);
        }

        let response_json: Value = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        parse_reply(&response_json)
    }
}
