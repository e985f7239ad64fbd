//! Markdown and YAML frontmatter helpers shared by the vault and the verifier.

use serde_yaml::Value as Yaml;

/// Split a note into its frontmatter block and body.
///
/// The note must open with a `---` line; the block ends at the next line
/// that is exactly `---`. Returns `None` when either delimiter is missing.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

pub fn starts_with_frontmatter(content: &str) -> bool {
    content.lines().next().map(str::trim_end) == Some("---")
}

/// Tags declared in a frontmatter block.
///
/// Accepts a YAML list or a comma/space separated string. Returns `None`
/// when the block has no `tags` key or is not valid YAML.
pub fn frontmatter_tags(yaml: &str) -> Option<Vec<String>> {
    let doc: Yaml = serde_yaml::from_str(yaml).ok()?;
    let tags = doc.get("tags")?;

    let collected = match tags {
        Yaml::Sequence(items) => items
            .iter()
            .filter_map(|item| match item {
                Yaml::String(s) => Some(s.clone()),
                Yaml::Number(n) => Some(n.to_string()),
                Yaml::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .collect(),
        Yaml::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Yaml::Null => Vec::new(),
        _ => return None,
    };

    Some(collected.into_iter().map(|t| normalize_tag(&t)).collect())
}

/// Lowercase, drop a leading `#` and hyphenate spaces: the form tags are
/// compared in.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').trim().replace(' ', "-").to_lowercase()
}

/// Sanitize a tag for Obsidian: replace spaces with hyphens, keep only
/// alphanumeric chars, hyphens, underscores, and forward slashes.
pub fn sanitize_tag(tag: &str) -> String {
    tag.trim()
        .trim_start_matches('#')
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '/')
        .collect()
}

/// Filename for a note title: unsafe characters removed, whitespace runs
/// collapsed to one space.
pub fn note_filename(title: &str) -> String {
    let safe_title: String = title
        .chars()
        .filter(|c| !['/', '\\', ':', '*', '?', '"', '<', '>', '|'].contains(c))
        .collect();
    let safe_title = safe_title.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{}.md", safe_title)
}

/// Whether the note has a `#`, `##` or `###` header with this name.
pub fn has_section(content: &str, section: &str) -> bool {
    let section = section.trim();
    content.lines().any(|line| {
        let line = line.trim();
        ["# ", "## ", "### "]
            .iter()
            .any(|prefix| line.strip_prefix(prefix).map(str::trim) == Some(section))
    })
}

/// Render a frontmatter block followed by the body.
pub fn render_note(title: &str, date: &str, tags: &[String], body: &str) -> String {
    let mut md = String::new();

    md.push_str("---\n");
    md.push_str(&format!("title: \"{}\"\n", title.replace('"', "'")));
    md.push_str(&format!("date: {}\n", date));

    if !tags.is_empty() {
        md.push_str("tags:\n");
        for tag in tags {
            md.push_str(&format!("  - {}\n", tag));
        }
    }

    md.push_str("---\n\n");
    md.push_str(body);
    if !body.ends_with('\n') {
        md.push('\n');
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frontmatter_basic() {
        let content = "---\ntitle: \"Test\"\ntags: [rust]\n---\n\n# Body\n";
        let (yaml, body) = split_frontmatter(content).unwrap();
        assert_eq!(yaml, "title: \"Test\"\ntags: [rust]\n");
        assert_eq!(body, "\n# Body\n");
    }

    #[test]
    fn test_split_frontmatter_requires_both_delimiters() {
        assert!(split_frontmatter("# Just a heading\nNo frontmatter here.").is_none());
        assert!(split_frontmatter("---\ntags: [a]\nno closing").is_none());
    }

    #[test]
    fn test_frontmatter_tags_list_and_string() {
        assert_eq!(frontmatter_tags("tags: [A, '#b']\n").unwrap(), vec!["a", "b"]);
        assert_eq!(
            frontmatter_tags("tags:\n  - rust\n  - coding\n").unwrap(),
            vec!["rust", "coding"]
        );
        assert_eq!(frontmatter_tags("tags: work, home\n").unwrap(), vec!["work", "home"]);
        assert!(frontmatter_tags("title: x\n").is_none());
    }

    #[test]
    fn test_note_filename_strips_unsafe_chars() {
        assert_eq!(note_filename("Q3: plan / review?"), "Q3 plan review.md");
        assert_eq!(note_filename("  a    b\tc  "), "a b c.md");
    }

    #[test]
    fn test_has_section() {
        let content = "# Daily\n\n## Quick Captures\n- milk\n";
        assert!(has_section(content, "Quick Captures"));
        assert!(!has_section(content, "Work Notes"));
    }

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(sanitize_tag("#machine learning"), "machine-learning");
    }
}
