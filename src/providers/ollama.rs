use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    function_call_history, function_tools, message_text, parse_function_calls, result_content,
    ChatModel, ChatRequest, ModelReply, ProviderAdapter, TokenUsage, ToolChoice,
};
use crate::pipeline::CallOutcome;
use crate::tool_call::{ParsedCall, Provider, ToolDefinition};

#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaAdapter;

impl ProviderAdapter for OllamaAdapter {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn parse_calls(&self, message: &Value) -> Vec<ParsedCall> {
        parse_function_calls(message, Provider::Ollama)
    }

    fn format_result(&self, outcome: &CallOutcome) -> Value {
        json!({
            "role": "tool",
            "tool_call_id": outcome.call_id,
            "tool_name": outcome.name,
            "content": result_content(outcome),
        })
    }

    fn format_tools(&self, definitions: &[ToolDefinition]) -> Vec<Value> {
        function_tools(definitions)
    }

    fn history_message(&self, message: &Value, calls: &[ParsedCall]) -> Value {
        function_call_history(message, calls)
    }
}

/// Shared HTTP client for Ollama API calls.
pub struct OllamaClient {
    pub endpoint: String,
    pub model: String,
    client: reqwest::Client,
    adapter: OllamaAdapter,
}

impl OllamaClient {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            endpoint,
            model,
            client: reqwest::Client::new(),
            adapter: OllamaAdapter,
        }
    }

    /// Ollama has no tool choice: `Required` sends the tools as usual and
    /// `Disabled` leaves them out.
    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": request.temperature
            }
        });

        if !request.tools.is_empty() && request.tool_choice != ToolChoice::Disabled {
            body["tools"] = json!(request.tools);
        }

        body
    }
}

fn parse_reply(response: &Value) -> Result<ModelReply> {
    let message = response
        .get("message")
        .filter(|m| m.is_object())
        .cloned()
        .context("No message in Ollama response")?;

    let usage = TokenUsage {
        input_tokens: response["prompt_eval_count"].as_u64().unwrap_or(0),
        output_tokens: response["eval_count"].as_u64().unwrap_or(0),
    };

    Ok(ModelReply {
        text: message_text(&message),
        message,
        usage,
    })
}

#[async_trait]
impl ChatModel for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn adapter(&self) -> &dyn ProviderAdapter {
        &self.adapter
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ModelReply> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint.trim_end_matches('/')))
            .json(&self.request_body(request))
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error ({}): {}", status, error_text);
        }

        let response_json: Value = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        parse_reply(&response_json)
    }
}
