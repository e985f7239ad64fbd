use chrono::NaiveDate;
use serde_json::Value;

use crate::tool_call::Arguments;

/// Shape and predicate checks run before any side effect.
pub trait ArgumentValidator: Send + Sync {
    fn validate(&self, name: &str, args: &Arguments) -> Result<(), String>;
}

/// Built-in rules for the vault operations. Unknown operations pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl ArgumentValidator for SchemaValidator {
    fn validate(&self, name: &str, args: &Arguments) -> Result<(), String> {
        match name {
            "create_simple_note" | "create_job_note" => {
                let title = required_str(args, "title")?;
                if title.contains('/') || title.contains('\\') {
                    return Err("title cannot contain path separators".to_string());
                }
                if name == "create_simple_note" {
                    required_str(args, "content")?;
                }
                if let Some(folder) = optional_str(args, "folder")? {
                    folder_path(folder)?;
                }
                Ok(())
            }
            "append_to_daily_note" => {
                required_str(args, "content")?;
                if let Some(section) = optional_str(args, "section")? {
                    section_name(section)?;
                }
                if let Some(date) = optional_str(args, "date")? {
                    NaiveDate::parse_from_str(date, "%Y-%m-%d")
                        .map_err(|_| "date must be in YYYY-MM-DD format".to_string())?;
                }
                Ok(())
            }
            "replace_note_content" => {
                note_path(required_str(args, "file_path")?)?;
                required_str(args, "old_text")?;
                required_str(args, "new_text")?;
                Ok(())
            }
            "update_note_section" => {
                note_path(required_str(args, "file_path")?)?;
                section_name(required_str(args, "section_name")?)?;
                required_str(args, "new_content")?;
                Ok(())
            }
            "update_note" => {
                note_path(required_str(args, "file_path")?)?;
                required_str(args, "new_content")?;
                Ok(())
            }
            "apply_tags_to_note" => {
                note_path(required_str(args, "file_path")?)?;
                required_tags(args)
            }
            "read_note" | "delete_note" => {
                note_path(required_str(args, "file_path")?)?;
                Ok(())
            }
            "search_vault" => {
                required_str(args, "query")?;
                Ok(())
            }
            "create_from_template" => {
                let template = required_str(args, "template_name")?;
                if template.contains('/') || template.contains('\\') {
                    return Err("template_name cannot contain path separators".to_string());
                }
                folder_path(required_str(args, "destination")?)
            }
            _ => Ok(()),
        }
    }
}

fn required_str<'a>(args: &'a Arguments, key: &str) -> Result<&'a str, String> {
    match args.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::String(_)) => Err(format!("{} cannot be empty", key)),
        Some(_) => Err(format!("{} must be a string", key)),
        None => Err(format!("{} is required", key)),
    }
}

fn optional_str<'a>(args: &'a Arguments, key: &str) -> Result<Option<&'a str>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(format!("{} must be a string", key)),
    }
}

/// Vault-relative Markdown path.
fn note_path(path: &str) -> Result<(), String> {
    if !path.ends_with(".md") {
        return Err("file_path must end with .md".to_string());
    }
    if path.starts_with('/') || path.starts_with('\\') || path.contains(':') || path.contains("..") {
        return Err("file_path must be relative to the vault".to_string());
    }
    Ok(())
}

fn folder_path(folder: &str) -> Result<(), String> {
    if folder.contains("..") || folder.starts_with('/') || folder.starts_with('\\') {
        return Err("Invalid folder path".to_string());
    }
    Ok(())
}

fn section_name(section: &str) -> Result<(), String> {
    if section.trim_start().starts_with('#') {
        return Err("section name should not include '#' prefix".to_string());
    }
    Ok(())
}

fn required_tags(args: &Arguments) -> Result<(), String> {
    match args.get("tags") {
        Some(Value::Array(tags)) if tags.is_empty() => Err("tags cannot be empty".to_string()),
        Some(Value::Array(tags)) => {
            if tags.iter().all(|t| t.as_str().is_some_and(|s| !s.trim().is_empty())) {
                Ok(())
            } else {
                Err("tags must be non-empty strings".to_string())
            }
        }
        Some(Value::String(tag)) if !tag.trim().is_empty() => Ok(()),
        Some(_) => Err("tags must be a list of strings".to_string()),
        None => Err("tags is required".to_string()),
    }
}
