//! Checkers for tags and frontmatter.

use serde_json::Value;
use std::collections::HashSet;

use super::{Report, VerificationOutcome, Verifier};
use crate::markdown::{frontmatter_tags, normalize_tag, split_frontmatter, starts_with_frontmatter};
use crate::tool_call::{Arguments, OperationResult};

/// Tags requested by the call; a single string counts as one tag.
fn requested_tags(args: &Arguments) -> Vec<String> {
    match args.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(tag)) => vec![tag.clone()],
        _ => Vec::new(),
    }
}

/// Tokens of a frontmatter block, for blocks that are not valid YAML.
fn frontmatter_tokens(yaml: &str) -> HashSet<String> {
    yaml.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_' || c == '/'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub(super) fn verify_tags(
    verifier: &Verifier,
    args: &Arguments,
    result: &OperationResult,
) -> VerificationOutcome {
    let mut report = Report::default();

    let path = match verifier.require_file(result, &mut report, &["Verify note exists before applying tags"]) {
        Ok(path) => path,
        Err(details) => return report.abort(details),
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            report.fail("verification_error");
            return report.abort(format!("Could not read {}: {}", path.display(), e));
        }
    };

    if !starts_with_frontmatter(&content) {
        report.fail("frontmatter_present");
        report.suggest("Tags require YAML frontmatter at the start of the file");
        return report.abort("No frontmatter in file");
    }
    report.pass("frontmatter_present");

    let Some((yaml, _body)) = split_frontmatter(&content) else {
        report.fail("frontmatter_closed");
        report.suggest("Check frontmatter YAML syntax");
        return report.abort("Malformed frontmatter (no closing ---)");
    };
    report.pass("frontmatter_closed");

    let has_tags_key = yaml
        .lines()
        .any(|line| line.trim_start().to_lowercase().starts_with("tags:"));
    if has_tags_key {
        report.pass("tags_field");
    } else {
        report.fail("tags_field");
        report.suggest("The tags field may not have been added");
    }

    let present: HashSet<String> = match frontmatter_tags(yaml) {
        Some(tags) => tags.into_iter().collect(),
        None => frontmatter_tokens(yaml),
    };

    let requested = requested_tags(args);
    let missing: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|tag| {
            let wanted = normalize_tag(tag);
            !wanted.is_empty() && !present.contains(&wanted)
        })
        .collect();

    if missing.is_empty() {
        report.pass("all_tags_present");
        report.finish(format!("Tags verified: {}", path.display()))
    } else {
        report.fail("all_tags_present");
        report.suggest("Some tags may not have been added to frontmatter");
        let details = format!("Tags not found in frontmatter: {}", missing.join(", "));
        report.finish_with(String::new(), details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::VerificationStatus;
    use serde_json::json;
    use std::path::Path;

    fn run(content: &str, tags: serde_json::Value) -> VerificationOutcome {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagged.md");
        std::fs::write(&path, content).unwrap();
        let args = json!({ "file_path": "tagged.md", "tags": tags });
        verify_tags(
            &Verifier::default(),
            args.as_object().unwrap(),
            &OperationResult::ok("Tagged").with_field("file_path", path_str(&path)),
        )
    }

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_requested_tag_present() {
        let outcome = run("---\ntags: [a, b]\n---\n", json!(["a"]));
        assert_eq!(outcome.status, VerificationStatus::Passed);
        assert!(outcome.has_passed("all_tags_present"));
    }

    #[test]
    fn test_requested_tag_missing_is_listed() {
        let outcome = run("---\ntags: [a, b]\n---\n", json!(["c"]));
        assert!(outcome.is_failed());
        assert!(outcome.has_failed("all_tags_present"));
        assert!(outcome.details.contains('c'));
        assert_eq!(outcome.details, "Tags not found in frontmatter: c");
    }

    #[test]
    fn test_tags_compare_case_insensitively_without_hash() {
        let outcome = run("---\ntags:\n  - Project\n  - rust\n---\nbody", json!(["#project", "RUST"]));
        assert_eq!(outcome.status, VerificationStatus::Passed);
    }

    #[test]
    fn test_tag_in_body_does_not_count() {
        let outcome = run("---\ntags: [a]\n---\nThis mentions c in the body", json!("c"));
        assert!(outcome.has_failed("all_tags_present"));
    }

    #[test]
    fn test_missing_or_unclosed_frontmatter() {
        let outcome = run("# No frontmatter\ntags: [a]\n", json!(["a"]));
        assert!(outcome.has_failed("frontmatter_present"));

        let outcome = run("---\ntags: [a]\n", json!(["a"]));
        assert!(outcome.has_failed("frontmatter_closed"));
    }

    #[test]
    fn test_missing_tags_key() {
        let outcome = run("---\ntitle: x\n---\n", json!(["a"]));
        assert!(outcome.has_failed("tags_field"));
        assert!(outcome.has_failed("all_tags_present"));
    }
}
