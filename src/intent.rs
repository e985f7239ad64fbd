use serde_json::{json, Value};

pub const WRITE_TOOL_REMINDER: &str = "Reminder: Vault operations require calling the appropriate Obsidian tool. \
     Do not claim success until the tool call succeeds.";
pub const READ_TOOL_REMINDER: &str = "Reminder: This request requires checking the vault or task list. \
     Use the appropriate tool to retrieve the information.";

const WRITE_VERBS: &[&str] = &[
    "create", "add", "update", "write", "append", "insert", "put in", "record", "log", "capture",
    "populate", "fill",
];
const WRITE_TARGETS: &[&str] = &[
    "note", "job", "vault", "file", "folder", "schedule", "entry", "task", "daily", "document", "list",
];
const READ_VERBS: &[&str] = &[
    "check", "read", "search", "find", "look", "show", "list", "get", "what", "where", "is there",
    "do i have", "did i",
];
const READ_TARGETS: &[&str] = &[
    "note", "vault", "file", "folder", "task", "todo", "project", "attachment", "receipt", "daily",
    "template", "list",
];

/// Whether a user message asks for a vault write or lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Intent {
    pub write: bool,
    pub read: bool,
}

impl Intent {
    /// Verb + target heuristic. Each side is only reported when its switch is on.
    pub fn classify(text: &str, require_writes: bool, require_reads: bool) -> Self {
        let lowered = text.to_lowercase();
        Self {
            write: require_writes && matches_any(&lowered, WRITE_VERBS) && matches_any(&lowered, WRITE_TARGETS),
            read: require_reads && matches_any(&lowered, READ_VERBS) && matches_any(&lowered, READ_TARGETS),
        }
    }

    pub fn expects_tool(&self) -> bool {
        self.write || self.read
    }

    /// Reminders to add when the model ignored the tools, write first.
    pub fn reminders(&self) -> Vec<&'static str> {
        let mut reminders = Vec::new();
        if self.write {
            reminders.push(WRITE_TOOL_REMINDER);
        }
        if self.read {
            reminders.push(READ_TOOL_REMINDER);
        }
        reminders
    }
}

fn matches_any(text: &str, needles: &[&str]) -> bool {
    !text.is_empty() && needles.iter().any(|needle| text.contains(needle))
}

/// Insert a system message right after the leading system messages.
pub fn insert_reminder(messages: &mut Vec<Value>, reminder: &str) {
    let position = messages
        .iter()
        .take_while(|m| m.get("role").and_then(Value::as_str) == Some("system"))
        .count();
    messages.insert(position, json!({ "role": "system", "content": reminder }));
}
