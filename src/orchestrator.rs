//! One user turn: model call, tool execution, follow-up model call.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::ConversationContext;
use crate::intent::{insert_reminder, Intent};
use crate::pipeline::{CallOutcome, ContextSink, ToolCallPipeline};
use crate::providers::fallback::find_matching_brace;
use crate::providers::{
    ChatModel, ChatRequest, ModelReply, ProviderAdapter, TextFallbackAdapter, TokenUsage, ToolChoice,
};
use crate::session::HistoryEntry;
use crate::tool_call::{ParsedCall, ToolDefinition};

pub const POST_TOOL_GUIDANCE: &str =
    "Tools have executed. Respond with the answer only. Do not mention tool calls, file reads, or include JSON.";

const MAX_STRIP_ITERATIONS: usize = 10;

static PREAMBLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^I'll\s+(check|open|read|look|search|find)[^.]*\.\s*",
        r"(?i)^Let\s+me\s+(check|open|read|look|search|find)[^.]*\.\s*",
        r"(?i)^I'm\s+going\s+to\s+(check|open|read|look|search|find)[^.]*\.\s*",
        r"(?i)^Checking[^.]*\.\s*",
        r"(?i)^Reading[^.]*\.\s*",
        r"(?i)^Opening[^.]*\.\s*",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("Failed to compile preamble regex"))
    .collect()
});

/// `(read_note)/path` or `[search: ...]` echoes at the start of a reply.
static TOOL_ECHO_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^[\[(]\w+[)\]][/\\]?\S*\s*").expect("Failed to compile tool echo regex"));

#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub text: String,
    pub calls: Vec<CallOutcome>,
    pub usage: TokenUsage,
    /// The model was asked a second time with a tool reminder.
    pub forced_retry: bool,
    /// Calls were inferred from free text.
    pub used_fallback: bool,
}

pub struct ConversationOrchestrator {
    model: Arc<dyn ChatModel>,
    pipeline: Arc<ToolCallPipeline>,
    definitions: Vec<ToolDefinition>,
    temperature: f32,
    fallback: TextFallbackAdapter,
}

impl ConversationOrchestrator {
    pub fn new(model: Arc<dyn ChatModel>, pipeline: Arc<ToolCallPipeline>, temperature: f32) -> Self {
        let definitions = pipeline.registry().definitions();
        Self {
            model,
            pipeline,
            definitions,
            temperature,
            fallback: TextFallbackAdapter,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model()
    }

    pub fn pipeline(&self) -> &ToolCallPipeline {
        &self.pipeline
    }

    pub async fn run_turn(
        &self,
        mut messages: Vec<Value>,
        intent: Intent,
        sink: Option<&ContextSink<'_>>,
    ) -> Result<TurnOutcome> {
        let adapter = self.model.adapter();
        let tools = adapter.format_tools(&self.definitions);
        let mut outcome = TurnOutcome::default();

        let first_choice = if intent.expects_tool() { ToolChoice::Required } else { ToolChoice::Auto };
        let mut reply = self.complete(&messages, &tools, first_choice, &mut outcome).await?;
        let mut calls = adapter.parse_calls(&reply.message);

        if calls.is_empty() && intent.expects_tool() {
            log::warn!("Model answered without tools despite {:?}; retrying with reminder", intent);
            for reminder in intent.reminders() {
                insert_reminder(&mut messages, reminder);
            }
            outcome.forced_retry = true;
            reply = self.complete(&messages, &tools, ToolChoice::Required, &mut outcome).await?;
            calls = adapter.parse_calls(&reply.message);
        }

        let mut result_adapter: &dyn ProviderAdapter = adapter;
        if calls.is_empty() && intent.expects_tool() {
            calls = self.fallback.parse_calls(&reply.message);
            if !calls.is_empty() {
                log::info!("Inferred {} call(s) from model text", calls.len());
                outcome.used_fallback = true;
                result_adapter = &self.fallback;
            }
        }

        if calls.is_empty() {
            outcome.text = reply.text;
            return Ok(outcome);
        }

        log::info!(
            "Executing {} tool call(s): {}",
            calls.len(),
            calls.iter().map(ParsedCall::name).collect::<Vec<_>>().join(", ")
        );

        messages.push(result_adapter.history_message(&reply.message, &calls));
        let outcomes = self.pipeline.run_batch(&calls, self.model.model(), sink).await;
        messages.extend(result_adapter.format_results(&outcomes));
        messages.push(json!({ "role": "system", "content": POST_TOOL_GUIDANCE }));

        let second = self.complete(&messages, &tools, ToolChoice::Disabled, &mut outcome).await?;
        outcome.text = strip_json_prefix(&second.text);
        outcome.calls = outcomes;
        Ok(outcome)
    }

    async fn complete(
        &self,
        messages: &[Value],
        tools: &[Value],
        tool_choice: ToolChoice,
        outcome: &mut TurnOutcome,
    ) -> Result<ModelReply> {
        let request = ChatRequest {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            temperature: self.temperature,
            tool_choice: if tools.is_empty() { ToolChoice::Auto } else { tool_choice },
        };
        let reply = self
            .model
            .complete(&request)
            .await
            .with_context(|| format!("Model call to {} failed", self.model.model()))?;
        outcome.usage += reply.usage;
        Ok(reply)
    }
}

/// System prompt, context section, prior history, then the new message.
pub fn build_messages(
    system_prompt: &str,
    context: &ConversationContext,
    history: &[HistoryEntry],
    user_text: &str,
) -> Vec<Value> {
    let mut messages = vec![json!({ "role": "system", "content": system_prompt })];

    let context_section = context.format_for_prompt();
    if !context_section.is_empty() {
        messages.push(json!({ "role": "system", "content": context_section }));
    }

    messages.extend(
        history
            .iter()
            .map(|entry| json!({ "role": entry.role, "content": entry.content })),
    );
    messages.push(json!({ "role": "user", "content": user_text }));
    messages
}

/// Drop narrated preambles and echoed JSON or tool markers from the start of
/// a final answer.
pub fn strip_json_prefix(text: &str) -> String {
    let mut text = text.to_string();

    for pattern in PREAMBLE_PATTERNS.iter() {
        text = pattern.replace(&text, "").into_owned();
    }

    let mut rest = text.as_str();
    for _ in 0..MAX_STRIP_ITERATIONS {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        let bracketed = match rest.chars().next() {
            Some('{') => find_matching_brace(rest, '{', '}'),
            Some('[') => find_matching_brace(rest, '[', ']'),
            _ => None,
        };
        if let Some(end) = bracketed {
            rest = &rest[end..];
            continue;
        }

        if let Some(m) = TOOL_ECHO_REGEX.find(rest) {
            rest = &rest[m.end()..];
            continue;
        }

        break;
    }

    let cleaned = rest.trim().to_string();
    if cleaned.len() != text.trim().len() {
        log::debug!("Stripped preamble/JSON from response");
    }
    cleaned
}
