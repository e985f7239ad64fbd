use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    function_call_history, function_tools, message_text, parse_function_calls, result_content,
    ChatModel, ChatRequest, ModelReply, ProviderAdapter, TokenUsage, ToolChoice,
};
use crate::pipeline::CallOutcome;
use crate::tool_call::{ParsedCall, Provider, ToolDefinition};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn parse_calls(&self, message: &Value) -> Vec<ParsedCall> {
        parse_function_calls(message, Provider::OpenAi)
    }

    fn format_result(&self, outcome: &CallOutcome) -> Value {
        json!({
            "role": "tool",
            "tool_call_id": outcome.call_id,
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

/// Client for the chat completions API.
pub struct OpenAiClient {
    pub endpoint: String,
    pub model: String,
    api_key: String,
    client: reqwest::Client,
    adapter: OpenAiAdapter,
}

impl OpenAiClient {
    pub fn new(endpoint: Option<String>, model: String, api_key: String) -> Self {
        Self {
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model,
            api_key,
            client: reqwest::Client::new(),
            adapter: OpenAiAdapter,
        }
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });

        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
            body["tool_choice"] = json!(match request.tool_choice {
                ToolChoice::Auto => "auto",
                ToolChoice::Required => "required",
                ToolChoice::Disabled => "none",
            });
        }

        body
    }
}

fn parse_reply(response: &Value) -> Result<ModelReply> {
    let message = response["choices"][0]["message"].clone();
    if !message.is_object() {
        anyhow::bail!("No message in OpenAI response");
    }

    let usage = TokenUsage {
        input_tokens: response["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: response["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    };

    Ok(ModelReply {
        text: message_text(&message),
        message,
        usage,
    })
}

#[async_trait]
impl ChatModel for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn adapter(&self) -> &dyn ProviderAdapter {
        &self.adapter
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ModelReply> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error ({}): {}", status, error_text);
        }

        let response_json: Value = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        parse_reply(&response_json)
    }
}
