use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value as Yaml};

use super::FsVault;
use crate::markdown::{has_section, normalize_tag, note_filename, render_note, sanitize_tag, split_frontmatter, starts_with_frontmatter};
use crate::tool_call::OperationResult;

const DEFAULT_SECTION: &str = "Quick Captures";

impl FsVault {
    fn saved(&self, message: String, path: &std::path::Path) -> OperationResult {
        OperationResult::ok(message)
            .with_field("file_path", path.to_string_lossy().to_string())
            .with_field("relative_path", self.relative(path).to_string_lossy().to_string())
    }

    pub(super) fn create_simple_note(&self, title: &str, content: &str, folder: Option<&str>) -> Result<OperationResult> {
        let dir = match folder {
            Some(folder) => self.resolve(folder)?,
            None => self.root.clone(),
        };
        let filepath = dir.join(note_filename(title));

        if filepath.exists() {
            return Ok(OperationResult::failed(format!(
                "Note already exists: {}",
                self.relative(&filepath).display()
            )));
        }

        std::fs::create_dir_all(&dir).context("Failed to create note directory")?;

        let date = chrono::Local::now().format("%Y-%m-%d").to_string();
        std::fs::write(&filepath, render_note(title, &date, &[], content))
            .with_context(|| format!("Failed to write note: {}", filepath.display()))?;

        log::info!("FsVault: created {}", filepath.display());
        Ok(self.saved(format!("Created note '{}'", title), &filepath))
    }

    pub(super) fn append_to_daily_note(&self, content: &str, section: Option<&str>, date: Option<&str>) -> Result<OperationResult> {
        let date = match date {
            Some(date) => date.to_string(),
            None => chrono::Local::now().format("%Y-%m-%d").to_string(),
        };
        let section = section.unwrap_or(DEFAULT_SECTION);

        let dir = self.resolve(&self.daily_notes_folder)?;
        let filepath = dir.join(format!("{}.md", date));

        let existing = if filepath.exists() {
            std::fs::read_to_string(&filepath)
                .with_context(|| format!("Failed to read daily note: {}", filepath.display()))?
        } else {
            std::fs::create_dir_all(&dir).context("Failed to create daily notes directory")?;
            format!("# {}\n\n## {}\n", date, DEFAULT_SECTION)
        };

        let bullet = format!("- {}", content.trim());
        let updated = insert_under_section(&existing, section, &bullet);
        std::fs::write(&filepath, updated)
            .with_context(|| format!("Failed to write daily note: {}", filepath.display()))?;

        log::info!("FsVault: appended to {} under '{}'", filepath.display(), section);
        Ok(self
            .saved(format!("Added to daily note {} ({})", date, section), &filepath)
            .with_field("section", section))
    }

    pub(super) fn apply_tags_to_note(&self, file_path: &str, tags: &[String]) -> Result<OperationResult> {
        let filepath = self.resolve(file_path)?;
        if !filepath.is_file() {
            return Ok(OperationResult::failed(format!("Note not found: {}", file_path)));
        }

        let tags: Vec<String> = tags.iter().map(|t| sanitize_tag(t)).filter(|t| !t.is_empty()).collect();
        if tags.is_empty() {
            return Ok(OperationResult::failed("No valid tags provided"));
        }

        let content = std::fs::read_to_string(&filepath)
            .with_context(|| format!("Failed to read note: {}", filepath.display()))?;

        let updated = match split_frontmatter(&content) {
            Some((yaml, body)) => {
                let mut doc: Mapping = if yaml.trim().is_empty() {
                    Mapping::new()
                } else {
                    match serde_yaml::from_str(yaml) {
                        Ok(doc) => doc,
                        Err(e) => {
                            return Ok(OperationResult::failed(format!("Frontmatter is not valid YAML: {}", e)));
                        }
                    }
                };

                let mut merged = existing_tags(doc.get("tags"));
                for tag in &tags {
                    if !merged.iter().any(|e| normalize_tag(e) == normalize_tag(tag)) {
                        merged.push(tag.clone());
                    }
                }
                doc.insert(
                    Yaml::String("tags".to_string()),
                    Yaml::Sequence(merged.into_iter().map(Yaml::String).collect()),
                );

                let yaml = serde_yaml::to_string(&doc).context("Failed to serialize frontmatter")?;
                format!("---\n{}---\n{}", yaml, body)
            }
            None if starts_with_frontmatter(&content) => {
                return Ok(OperationResult::failed("Malformed frontmatter (no closing ---)"));
            }
            None => {
                let lines: String = tags.iter().map(|t| format!("  - {}\n", t)).collect();
                format!("---\ntags:\n{}---\n\n{}", lines, content)
            }
        };

        std::fs::write(&filepath, updated)
            .with_context(|| format!("Failed to write note: {}", filepath.display()))?;

        log::info!("FsVault: tagged {} with {:?}", filepath.display(), tags);
        Ok(self
            .saved(format!("Applied {} tag(s) to {}", tags.len(), file_path), &filepath)
            .with_field("tags", tags))
    }

    pub(super) fn replace_note_content(&self, file_path: &str, old_text: &str, new_text: &str) -> Result<OperationResult> {
        let filepath = self.resolve(file_path)?;
        if !filepath.is_file() {
            return Ok(OperationResult::failed(format!("Note not found: {}", file_path)));
        }

        let content = std::fs::read_to_string(&filepath)
            .with_context(|| format!("Failed to read note: {}", filepath.display()))?;
        if !content.contains(old_text) {
            return Ok(OperationResult::failed(format!("Text not found in {}", file_path)));
        }

        std::fs::write(&filepath, content.replacen(old_text, new_text, 1))
            .with_context(|| format!("Failed to write note: {}", filepath.display()))?;

        log::info!("FsVault: replaced text in {}", filepath.display());
        Ok(self.saved(format!("Updated {}", file_path), &filepath))
    }
}

fn existing_tags(value: Option<&Yaml>) -> Vec<String> {
    match value {
        Some(Yaml::Sequence(items)) => items.iter().filter_map(Yaml::as_str).map(str::to_string).collect(),
        Some(Yaml::String(s)) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn header_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    (level > 0 && trimmed[level..].starts_with(' ')).then_some(level)
}

/// Put `line` at the end of `section`, before the next header of the same or
/// higher level. A missing section is created at the end of the note.
fn insert_under_section(content: &str, section: &str, line: &str) -> String {
    if !has_section(content, section) {
        let mut out = content.trim_end().to_string();
        out.push_str(&format!("\n\n## {}\n{}\n", section, line));
        return out;
    }

    let lines: Vec<&str> = content.lines().collect();
    let header = lines.iter().position(|l| {
        header_level(l).is_some() && l.trim().trim_start_matches('#').trim() == section.trim()
    });
    let Some(header) = header else {
        return format!("{}\n{}\n", content.trim_end(), line);
    };
    let level = header_level(lines[header]).unwrap_or(2);

    let end = lines[header + 1..]
        .iter()
        .position(|l| header_level(l).is_some_and(|l| l <= level))
        .map(|offset| header + 1 + offset)
        .unwrap_or(lines.len());

    let insert_at = (header + 1..end)
        .rev()
        .find(|i| !lines[*i].trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(header + 1);

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    out.extend_from_slice(&lines[..insert_at]);
    out.push(line);
    out.extend_from_slice(&lines[insert_at..]);
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}
