//! Tool-call inference for models that answer in free text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::{message_text, result_content, ProviderAdapter};
use crate::pipeline::CallOutcome;
use crate::tool_call::{ParsedCall, Provider, ToolDefinition};

/// `[name: ...] {json}` or `(name) {json}` at the start of the text.
static PSEUDO_CALL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^[\[(](\w+)[:\s)\]].*?(\{[^{}]*\})").expect("Failed to compile pseudo call regex")
});

/// A bare JSON object containing `key` becomes a call to `operation`, with
/// the value passed as `argument`. Keys in `passthrough` are copied when
/// present.
struct FallbackRule {
    key: &'static str,
    operation: &'static str,
    argument: &'static str,
    passthrough: &'static [&'static str],
}

const RULES: [FallbackRule; 2] = [
    FallbackRule {
        key: "path",
        operation: "read_note",
        argument: "file_path",
        passthrough: &[],
    },
    FallbackRule {
        key: "query",
        operation: "search_vault",
        argument: "query",
        passthrough: &["folder"],
    },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TextFallbackAdapter;

impl TextFallbackAdapter {
    /// At most one call inferred from the start of `text`.
    pub fn infer(&self, text: &str) -> Option<ParsedCall> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(captures) = PSEUDO_CALL_REGEX.captures(text) {
            let name = &captures[1];
            if let Ok(Value::Object(args)) = serde_json::from_str::<Value>(&captures[2]) {
                log::info!("Parsed pseudo tool call from text: {}", name);
                return Some(ParsedCall::from_raw(None, name, &Value::Object(args), Provider::TextFallback));
            }
        }

        if text.starts_with('{') {
            let end = find_matching_brace(text, '{', '}')?;
            let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&text[..end]) else {
                return None;
            };
            for rule in &RULES {
                if let Some(value) = object.get(rule.key) {
                    let mut args = Map::new();
                    args.insert(rule.argument.to_string(), value.clone());
                    for key in rule.passthrough {
                        if let Some(extra) = object.get(*key) {
                            args.insert(key.to_string(), extra.clone());
                        }
                    }
                    log::info!("Inferred {} from bare JSON ({})", rule.operation, rule.key);
                    return Some(ParsedCall::from_raw(
                        None,
                        rule.operation,
                        &Value::Object(args),
                        Provider::TextFallback,
                    ));
                }
            }
        }

        None
    }
}

impl ProviderAdapter for TextFallbackAdapter {
    fn provider(&self) -> Provider {
        Provider::TextFallback
    }

    fn parse_calls(&self, message: &Value) -> Vec<ParsedCall> {
        self.infer(&message_text(message)).into_iter().collect()
    }

    fn format_result(&self, outcome: &CallOutcome) -> Value {
        json!({
            "role": "user",
            "content": format!(
                "Result of tool {} (call {}):\n{}",
                outcome.name,
                outcome.call_id,
                result_content(outcome)
            ),
        })
    }

    /// Free-text models get the tools described in the prompt instead.
    fn format_tools(&self, _definitions: &[ToolDefinition]) -> Vec<Value> {
        Vec::new()
    }
}

/// Byte offset just past the bracket matching the one `text` starts with.
///
/// Brackets inside JSON strings (with escapes) are ignored.
pub(crate) fn find_matching_brace(text: &str, open: char, close: char) -> Option<usize> {
    if !text.starts_with(open) {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            _ if c == open => depth += 1,
            _ if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}
