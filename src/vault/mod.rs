//! Filesystem-backed vault: the operation registry the bot runs against.

mod reader;
mod writer;

pub use reader::{NoteMeta, SearchHit};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

use crate::operations::OperationRegistry;
use crate::tool_call::{Arguments, OperationResult, ToolDefinition};

pub const DEFAULT_DAILY_NOTES_FOLDER: &str = "Daily Notes";

/// Markdown vault rooted at a directory. All paths stay under the root.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
    daily_notes_folder: String,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            daily_notes_folder: DEFAULT_DAILY_NOTES_FOLDER.to_string(),
        }
    }

    pub fn with_daily_notes_folder(mut self, folder: impl Into<String>) -> Self {
        self.daily_notes_folder = folder.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a vault-relative path onto the root, rejecting escapes.
    pub(crate) fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let relative = Path::new(relative.trim());
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => bail!("Path escapes the vault: {}", relative.display()),
            }
        }
        Ok(self.root.join(relative))
    }

    pub(crate) fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

fn str_arg<'a>(args: &'a Arguments, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required<'a>(args: &'a Arguments, key: &str) -> Result<&'a str> {
    match str_arg(args, key) {
        Some(value) => Ok(value),
        None => bail!("Missing required argument: {}", key),
    }
}

fn tag_list(args: &Arguments) -> Vec<String> {
    match args.get("tags") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        Some(Value::String(tag)) => vec![tag.clone()],
        _ => Vec::new(),
    }
}

#[async_trait]
impl OperationRegistry for FsVault {
    async fn execute(&self, name: &str, args: &Arguments) -> Result<OperationResult> {
        log::debug!("FsVault: {} {:?}", name, args.keys().collect::<Vec<_>>());
        match name {
            "create_simple_note" => self.create_simple_note(
                required(args, "title")?,
                required(args, "content")?,
                str_arg(args, "folder"),
            ),
            "append_to_daily_note" => self.append_to_daily_note(
                required(args, "content")?,
                str_arg(args, "section"),
                str_arg(args, "date"),
            ),
            "apply_tags_to_note" => self.apply_tags_to_note(required(args, "file_path")?, &tag_list(args)),
            "replace_note_content" => self.replace_note_content(
                required(args, "file_path")?,
                required(args, "old_text")?,
                required(args, "new_text")?,
            ),
            "read_note" => self.read_note(required(args, "file_path")?),
            "search_vault" => self.search_vault(required(args, "query")?, str_arg(args, "folder")),
            _ => Ok(OperationResult::failed(format!("Unknown operation: {}", name))),
        }
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "create_simple_note",
                "Create a new Markdown note in the vault.",
                &[
                    ("title", "string", "Note title, also used as the filename"),
                    ("content", "string", "Markdown body of the note"),
                    ("folder", "string", "Optional vault-relative folder"),
                ],
                &["title", "content"],
            ),
            ToolDefinition::new(
                "append_to_daily_note",
                "Append a bullet to a section of the daily note.",
                &[
                    ("content", "string", "Text to append"),
                    ("section", "string", "Section header without '#', defaults to Quick Captures"),
                    ("date", "string", "Day in YYYY-MM-DD format, defaults to today"),
                ],
                &["content"],
            ),
            ToolDefinition::new(
                "apply_tags_to_note",
                "Add tags to the frontmatter of an existing note.",
                &[
                    ("file_path", "string", "Vault-relative path ending in .md"),
                    ("tags", "array", "Tags to add"),
                ],
                &["file_path", "tags"],
            ),
            ToolDefinition::new(
                "replace_note_content",
                "Replace a piece of text inside a note.",
                &[
                    ("file_path", "string", "Vault-relative path ending in .md"),
                    ("old_text", "string", "Exact text to replace"),
                    ("new_text", "string", "Replacement text"),
                ],
                &["file_path", "old_text", "new_text"],
            ),
            ToolDefinition::new(
                "read_note",
                "Read the full content of a note.",
                &[("file_path", "string", "Vault-relative path ending in .md")],
                &["file_path"],
            ),
            ToolDefinition::new(
                "search_vault",
                "Search note titles and contents.",
                &[
                    ("query", "string", "Text to look for"),
                    ("folder", "string", "Optional folder to restrict the search to"),
                ],
                &["query"],
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_rejects_escapes() {
        let vault = FsVault::new("/vault");
        assert_eq!(vault.resolve("Inbox/a.md").unwrap(), PathBuf::from("/vault/Inbox/a.md"));
        assert!(vault.resolve("../etc/passwd").is_err());
        assert!(vault.resolve("/etc/passwd").is_err());
        assert!(vault.resolve("Inbox/../../x.md").is_err());
    }

    #[tokio::test]
    async fn test_unknown_operation_reports_failure() {
        let vault = FsVault::new("/vault");
        let result = vault.execute("launch_rocket", &Arguments::new()).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_missing_argument_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        let args = json!({ "title": "x" });
        assert!(vault
            .execute("create_simple_note", args.as_object().unwrap())
            .await
            .is_err());
    }

    #[test]
    fn test_definitions_cover_every_operation() {
        let names: Vec<String> = FsVault::new("/v").definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names.len(), 6);
        assert!(names.contains(&"apply_tags_to_note".to_string()));
    }
}
