use anyhow::{Context, Result};
use serde::Serialize;
use serde_yaml::Value as Yaml;
use std::path::{Path, PathBuf};

use super::FsVault;
use crate::markdown::{frontmatter_tags, split_frontmatter};
use crate::tool_call::OperationResult;

const MAX_SEARCH_RESULTS: usize = 20;
const SNIPPET_CHARS: usize = 120;

/// Metadata extracted from a note's YAML frontmatter.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteMeta {
    pub title: String,
    pub date: String,
    pub tags: Vec<String>,
    pub filename: String,
}

impl NoteMeta {
    /// Falls back to the filename when there is no usable frontmatter.
    pub fn parse(filename: &str, content: &str) -> Self {
        let mut meta = Self {
            title: filename.trim_end_matches(".md").to_string(),
            date: String::new(),
            tags: Vec::new(),
            filename: filename.to_string(),
        };

        let Some((yaml, _)) = split_frontmatter(content) else {
            return meta;
        };
        if let Ok(doc) = serde_yaml::from_str::<Yaml>(yaml) {
            if let Some(title) = doc.get("title").and_then(Yaml::as_str) {
                meta.title = title.to_string();
            }
            if let Some(date) = doc.get("date").and_then(Yaml::as_str) {
                meta.date = date.to_string();
            }
        }
        meta.tags = frontmatter_tags(yaml).unwrap_or_default();
        meta
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub file_path: String,
    pub title: String,
    pub tags: Vec<String>,
    pub snippet: String,
}

impl FsVault {
    pub(super) fn read_note(&self, file_path: &str) -> Result<OperationResult> {
        let filepath = self.resolve(file_path)?;
        if !filepath.is_file() {
            return Ok(OperationResult::failed(format!("Note not found: {}", file_path)));
        }

        let content = std::fs::read_to_string(&filepath)
            .with_context(|| format!("Failed to read note: {}", filepath.display()))?;
        let filename = filepath
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let meta = NoteMeta::parse(&filename, &content);

        Ok(OperationResult::ok(format!("Read {}", file_path))
            .with_field("file_path", filepath.to_string_lossy().to_string())
            .with_field("title", meta.title)
            .with_field("tags", meta.tags)
            .with_field("content", content))
    }

    pub(super) fn search_vault(&self, query: &str, folder: Option<&str>) -> Result<OperationResult> {
        let base = match folder {
            Some(folder) => self.resolve(folder)?,
            None => self.root.clone(),
        };
        if !base.is_dir() {
            log::info!("FsVault: search folder does not exist: {}", base.display());
            return Ok(OperationResult::ok("No notes found").with_field("results", Vec::<serde_json::Value>::new()));
        }

        let mut files = Vec::new();
        collect_markdown(&base, &mut files);
        files.sort();

        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        for path in files {
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("FsVault: failed to read {}: {}", path.display(), e);
                    continue;
                }
            };
            let filename = path.file_name().unwrap_or_default().to_string_lossy().to_string();

            let matching_line = content.lines().find(|line| line.to_lowercase().contains(&needle));
            if matching_line.is_none() && !filename.to_lowercase().contains(&needle) {
                continue;
            }

            let meta = NoteMeta::parse(&filename, &content);
            hits.push(SearchHit {
                file_path: self.relative(&path).to_string_lossy().to_string(),
                title: meta.title,
                tags: meta.tags,
                snippet: matching_line
                    .map(|line| line.trim().chars().take(SNIPPET_CHARS).collect())
                    .unwrap_or_default(),
            });
            if hits.len() >= MAX_SEARCH_RESULTS {
                break;
            }
        }

        log::info!("FsVault: search '{}' matched {} note(s)", query, hits.len());
        let results = serde_json::to_value(&hits).context("Failed to serialize search results")?;
        Ok(OperationResult::ok(format!("Found {} note(s) matching '{}'", hits.len(), query))
            .with_field("count", hits.len())
            .with_field("results", results))
    }
}

/// Markdown files below `dir`, skipping hidden entries such as `.obsidian`.
fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("FsVault: failed to read dir {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect_markdown(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_with_notes() -> (tempfile::TempDir, FsVault) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Cooking")).unwrap();
        std::fs::create_dir_all(dir.path().join(".obsidian")).unwrap();
        std::fs::write(
            dir.path().join("Cooking").join("Pasta.md"),
            "---\ntitle: \"Pasta night\"\ntags:\n  - recipes\n---\n\nBoil water, add salt.\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("Groceries.md"), "- salt\n- milk\n").unwrap();
        std::fs::write(dir.path().join(".obsidian").join("salt.md"), "salt").unwrap();
        let vault = FsVault::new(dir.path());
        (dir, vault)
    }

    #[test]
    fn test_note_meta_from_frontmatter() {
        let content = "---\ntitle: \"Test Note\"\ndate: 2024-01-15\ntags:\n  - rust\n  - coding\n---\n\n# Body\n";
        let meta = NoteMeta::parse("test.md", content);
        assert_eq!(meta.title, "Test Note");
        assert_eq!(meta.date, "2024-01-15");
        assert_eq!(meta.tags, vec!["rust", "coding"]);
    }

    #[test]
    fn test_note_meta_without_frontmatter() {
        let meta = NoteMeta::parse("Plain.md", "# Just a heading");
        assert_eq!(meta.title, "Plain");
        assert!(meta.tags.is_empty());
    }

    #[test]
    fn test_search_skips_hidden_folders() {
        let (_dir, vault) = vault_with_notes();
        let result = vault.search_vault("SALT", None).unwrap();
        assert_eq!(result.fields["count"], 2);
        let results = result.fields["results"].as_array().unwrap();
        assert_eq!(results[0]["title"], "Pasta night");
        assert_eq!(results[0]["snippet"], "Boil water, add salt.");
        assert_eq!(results[1]["file_path"], "Groceries.md");
    }

    #[test]
    fn test_search_in_folder() {
        let (_dir, vault) = vault_with_notes();
        let result = vault.search_vault("milk", Some("Cooking")).unwrap();
        assert_eq!(result.fields["count"], 0);
        let missing = vault.search_vault("milk", Some("Nope")).unwrap();
        assert!(missing.success);
    }

    #[test]
    fn test_read_note() {
        let (_dir, vault) = vault_with_notes();
        let result = vault.read_note("Cooking/Pasta.md").unwrap();
        assert!(result.success);
        assert_eq!(result.fields["title"], "Pasta night");
        assert!(result.str_field("content").unwrap().contains("Boil water"));
        assert!(!vault.read_note("Cooking/Missing.md").unwrap().success);
    }
}
