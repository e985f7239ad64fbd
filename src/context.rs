use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool_call::Arguments;

pub const MAX_RECENT_NOTES: usize = 10;
pub const MAX_RECENT_FOLDERS: usize = 5;
pub const MAX_RECENT_OPERATIONS: usize = 15;

/// One completed operation, as remembered for reference resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Session memory used to resolve "that note" or "the folder we just opened".
///
/// Recency lists are newest-first; the oldest entries fall off the end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationContext {
    pub last_created_note: Option<String>,
    pub last_modified_note: Option<String>,
    pub last_accessed_folder: Option<String>,
    pub recent_notes: Vec<String>,
    pub recent_folders: Vec<String>,
    pub recent_operations: Vec<OperationRecord>,
}

/// Folds a completed call into a context. Injected into the pipeline so
/// callers can swap the policy.
pub type ContextUpdater = fn(ConversationContext, &str, &Arguments, bool) -> ConversationContext;

fn arg(args: &Arguments, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

impl ConversationContext {
    pub fn is_empty(&self) -> bool {
        self.last_created_note.is_none()
            && self.last_modified_note.is_none()
            && self.last_accessed_folder.is_none()
            && self.recent_operations.is_empty()
    }

    /// Record a completed operation. Failed operations leave the context as is.
    pub fn apply(mut self, name: &str, args: &Arguments, success: bool) -> Self {
        if !success {
            return self;
        }

        let mut record = OperationRecord {
            operation: name.to_string(),
            action: String::new(),
            note: None,
            folder: None,
            query: None,
            timestamp: Utc::now(),
        };

        match name {
            "create_simple_note" | "create_job_note" => {
                let title = arg(args, "title");
                self.last_created_note = Some(title.clone());
                self.last_modified_note = Some(title.clone());
                self.push_note(&title);
                record.note = Some(title);
                record.action = "created".to_string();
            }
            "create_from_template" => {
                let target = args
                    .get("variables")
                    .and_then(|v| v.get("title"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| arg(args, "destination"));
                self.last_created_note = Some(target.clone());
                self.last_modified_note = Some(target.clone());
                self.push_note(&target);
                record.note = Some(target);
                record.action = "created".to_string();
            }
            "update_note" | "update_note_section" | "replace_note_content" => {
                let path = arg(args, "file_path");
                self.last_modified_note = Some(path.clone());
                self.push_note(&path);
                record.note = Some(path);
                record.action = "updated".to_string();
            }
            "apply_tags_to_note" | "add_tags" => {
                let path = arg(args, "file_path");
                self.last_modified_note = Some(path.clone());
                self.push_note(&path);
                record.note = Some(path);
                record.action = "tagged".to_string();
            }
            "append_to_daily_note" => {
                let date = args
                    .get("date")
                    .and_then(Value::as_str)
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or("today");
                let label = format!("Daily Note ({})", date);
                self.last_modified_note = Some(label.clone());
                record.note = Some(label);
                record.action = "appended".to_string();
            }
            "rename_note" => {
                let old_path = arg(args, "file_path");
                let new_title = arg(args, "new_title");
                self.last_modified_note = Some(new_title.clone());
                self.recent_notes.retain(|n| *n != old_path);
                self.push_note(&new_title);
                record.note = Some(old_path);
                record.action = "renamed".to_string();
            }
            "move_note" => {
                let path = arg(args, "file_path");
                let folder = arg(args, "destination_folder");
                self.last_modified_note = Some(path.clone());
                self.last_accessed_folder = Some(folder.clone());
                self.push_note(&path);
                self.push_folder(&folder);
                record.note = Some(path);
                record.folder = Some(folder);
                record.action = "moved".to_string();
            }
            "list_folder_contents" | "list_folder" => {
                let folder = arg(args, "folder_name");
                self.last_accessed_folder = Some(folder.clone());
                self.push_folder(&folder);
                record.folder = Some(folder);
                record.action = "listed".to_string();
            }
            "search_vault" => {
                record.query = Some(arg(args, "query"));
                record.action = "searched".to_string();
            }
            "read_note" | "find_related_notes" => {
                let path = arg(args, "file_path");
                self.push_note(&path);
                record.note = Some(path);
                record.action = if name == "read_note" { "read" } else { "found_related" }.to_string();
            }
            "delete_note" => {
                let path = arg(args, "file_path");
                self.recent_notes.retain(|n| *n != path);
                record.note = Some(path);
                record.action = "deleted".to_string();
            }
            "research_and_save" => {
                record.note = args.get("title").and_then(Value::as_str).map(str::to_string);
                record.action = "researched".to_string();
            }
            "create_scheduled_task" => {
                record.note = args.get("name").and_then(Value::as_str).map(str::to_string);
                record.action = "scheduled".to_string();
            }
            _ => {
                record.action = name.to_string();
            }
        }

        self.recent_operations.insert(0, record);
        self.recent_operations.truncate(MAX_RECENT_OPERATIONS);
        self
    }

    fn push_note(&mut self, note: &str) {
        self.recent_notes.retain(|n| n != note);
        self.recent_notes.insert(0, note.to_string());
        self.recent_notes.truncate(MAX_RECENT_NOTES);
    }

    fn push_folder(&mut self, folder: &str) {
        self.recent_folders.retain(|f| f != folder);
        self.recent_folders.insert(0, folder.to_string());
        self.recent_folders.truncate(MAX_RECENT_FOLDERS);
    }

    /// Context section for the system prompt. Empty when nothing happened yet.
    pub fn format_for_prompt(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut lines = vec!["## Recent Conversation Context".to_string(), String::new()];

        if !self.recent_operations.is_empty() {
            lines.push("### Recent Actions (use these to understand what we just did):".to_string());
            for op in self.recent_operations.iter().take(5) {
                let action = title_case(&op.action);
                if let Some(note) = &op.note {
                    lines.push(format!("  • {}: {}", action, note));
                } else if let Some(folder) = &op.folder {
                    lines.push(format!("  • {}: {}", action, folder));
                } else if let Some(query) = &op.query {
                    lines.push(format!("  • {}: '{}'", action, query));
                }
            }
            lines.push(String::new());
        }

        if let Some(note) = &self.last_created_note {
            lines.push(format!("**Last created note**: {}", note));
        }
        if let Some(note) = &self.last_modified_note {
            lines.push(format!("**Last modified note**: {}", note));
        }
        if let Some(folder) = &self.last_accessed_folder {
            lines.push(format!("**Last accessed folder**: {}", folder));
        }
        lines.push(String::new());

        lines.push(
            "**Note**: If the user says 'that note', 'that file', 'the one we just created', \
             'the last one', 'it', etc., refer to the context above to infer what they mean. \
             If they say 'move that note', use the last modified note. If they say 'the folder', \
             use the last accessed folder."
                .to_string(),
        );

        lines.join("\n")
    }
}

fn title_case(action: &str) -> String {
    action
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_create_updates_pointers() {
        let ctx = ConversationContext::default().apply(
            "create_simple_note",
            &args(json!({ "title": "Shopping" })),
            true,
        );
        assert_eq!(ctx.last_created_note.as_deref(), Some("Shopping"));
        assert_eq!(ctx.last_modified_note.as_deref(), Some("Shopping"));
        assert_eq!(ctx.recent_notes, vec!["Shopping"]);
        assert_eq!(ctx.recent_operations[0].action, "created");
    }

    #[test]
    fn test_failed_operation_is_ignored() {
        let ctx = ConversationContext::default().apply(
            "create_simple_note",
            &args(json!({ "title": "Shopping" })),
            false,
        );
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_recent_lists_evict_oldest() {
        let mut ctx = ConversationContext::default();
        for i in 0..20 {
            ctx = ctx.apply("read_note", &args(json!({ "file_path": format!("n{}.md", i) })), true);
        }
        assert_eq!(ctx.recent_notes.len(), MAX_RECENT_NOTES);
        assert_eq!(ctx.recent_notes[0], "n19.md");
        assert_eq!(ctx.recent_notes[MAX_RECENT_NOTES - 1], "n10.md");
        assert_eq!(ctx.recent_operations.len(), MAX_RECENT_OPERATIONS);
        assert_eq!(ctx.recent_operations[0].note.as_deref(), Some("n19.md"));
    }

    #[test]
    fn test_folders_are_bounded() {
        let mut ctx = ConversationContext::default();
        for i in 0..8 {
            ctx = ctx.apply("list_folder_contents", &args(json!({ "folder_name": format!("f{}", i) })), true);
        }
        assert_eq!(ctx.recent_folders.len(), MAX_RECENT_FOLDERS);
        assert_eq!(ctx.last_accessed_folder.as_deref(), Some("f7"));
    }

    #[test]
    fn test_daily_append_label() {
        let ctx = ConversationContext::default().apply("append_to_daily_note", &args(json!({ "content": "x" })), true);
        assert_eq!(ctx.last_modified_note.as_deref(), Some("Daily Note (today)"));
    }

    #[test]
    fn test_format_for_prompt() {
        assert_eq!(ConversationContext::default().format_for_prompt(), "");

        let ctx = ConversationContext::default()
            .apply("create_simple_note", &args(json!({ "title": "Shopping" })), true)
            .apply("search_vault", &args(json!({ "query": "milk" })), true);
        let prompt = ctx.format_for_prompt();
        assert!(prompt.contains("  • Searched: 'milk'"));
        assert!(prompt.contains("  • Created: Shopping"));
        assert!(prompt.contains("**Last created note**: Shopping"));
    }

    #[test]
    fn test_context_deserializes_partial() {
        let ctx: ConversationContext = serde_json::from_str(r#"{"last_created_note": "A"}"#).unwrap();
        assert_eq!(ctx.last_created_note.as_deref(), Some("A"));
        assert!(ctx.recent_notes.is_empty());
    }
}
