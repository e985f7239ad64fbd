//! Checkers for note creation, append and update.

use std::path::Path;

use super::{
    arg_str, contains_snippet, recently_modified, Report, VerificationOutcome, Verifier,
    SNIPPET_LIMIT, UPDATE_SNIPPET_LIMIT,
};
use crate::markdown::has_section;
use crate::operations::{CreationKind, UpdateKind};
use crate::tool_call::{Arguments, OperationResult};

const DEFAULT_DAILY_SECTION: &str = "Quick Captures";

fn read_or_fail(path: &Path, report: &mut Report) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            log::warn!("Verifier: could not read {}: {}", path.display(), e);
            report.fail("verification_error");
            report.suggest("Check file system permissions");
            None
        }
    }
}

pub(super) fn verify_creation(
    verifier: &Verifier,
    kind: CreationKind,
    args: &Arguments,
    result: &OperationResult,
) -> VerificationOutcome {
    let mut report = Report::default();

    let path = match verifier.require_file(
        result,
        &mut report,
        &[
            "Check vault path configuration",
            "Verify parent directory exists and is writable",
        ],
    ) {
        Ok(path) => path,
        Err(details) => return report.abort(details),
    };

    match std::fs::metadata(&path).map(|m| m.len()) {
        Ok(0) => {
            report.fail("file_non_empty");
            report.suggest("Verify content was provided to the operation");
            return report.abort("File created but is empty");
        }
        Ok(_) => report.pass("file_non_empty"),
        Err(e) => {
            log::warn!("Verifier: could not stat {}: {}", path.display(), e);
            report.fail("verification_error");
        }
    }

    match kind {
        CreationKind::SimpleNote => {
            if let Some(requested) = arg_str(args, &["content"]) {
                if let Some(actual) = read_or_fail(&path, &mut report) {
                    if contains_snippet(&actual, requested, SNIPPET_LIMIT) {
                        report.pass("content_verified");
                    } else {
                        report.fail("content_verified");
                        report.suggest("Verify content encoding");
                        report.suggest("Check for content transformation during save");
                        return report.abort(format!("Content mismatch in {}", path.display()));
                    }
                }
            }
        }
        CreationKind::Template => {
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                report.pass("template_extension");
            } else {
                report.fail("template_extension");
                report.suggest("Template file should have .md extension");
            }
            if !path.to_string_lossy().to_lowercase().contains("template") {
                report.suggest("Consider placing template in a Templates folder");
            }
        }
        CreationKind::Structured => {}
    }

    if recently_modified(&path, verifier.recency_window()) {
        report.pass("recently_modified");
    }

    report.finish(format!("File creation verified: {}", path.display()))
}

pub(super) fn verify_append(
    verifier: &Verifier,
    args: &Arguments,
    result: &OperationResult,
) -> VerificationOutcome {
    let mut report = Report::default();

    let path = match verifier.require_file(
        result,
        &mut report,
        &["Verify daily note folder exists", "Check date format configuration"],
    ) {
        Ok(path) => path,
        Err(details) => return report.abort(details),
    };

    if let Some(actual) = read_or_fail(&path, &mut report) {
        if let Some(appended) = arg_str(args, &["content"]) {
            if contains_snippet(&actual, appended, SNIPPET_LIMIT) {
                report.pass("content_appended");
            } else {
                report.fail("content_appended");
                report.suggest("Check if file was modified by another process");
                report.suggest("Verify section header exists in daily note template");
                return report.abort(format!("Appended content not found in {}", path.display()));
            }
        }

        let section = arg_str(args, &["section"]).unwrap_or(DEFAULT_DAILY_SECTION);
        if has_section(&actual, section) {
            report.pass("section_exists");
        } else {
            report.suggest(format!(
                "Section '{}' header not found - content may be appended at end",
                section
            ));
        }
    }

    if recently_modified(&path, verifier.recency_window()) {
        report.pass("recently_modified");
    } else {
        report.suggest("File modification time is not recent - verify write succeeded");
    }

    report.finish(format!("Content append verified: {}", path.display()))
}

pub(super) fn verify_update(
    verifier: &Verifier,
    kind: UpdateKind,
    args: &Arguments,
    result: &OperationResult,
) -> VerificationOutcome {
    let mut report = Report::default();

    let path = match verifier.require_file(result, &mut report, &["Note may have been moved or deleted"]) {
        Ok(path) => path,
        Err(details) => return report.abort(details),
    };

    match kind {
        UpdateKind::Replace => {
            if let Some(actual) = read_or_fail(&path, &mut report) {
                if let Some(new_text) = arg_str(args, &["new_text"]) {
                    if contains_snippet(&actual, new_text, UPDATE_SNIPPET_LIMIT) {
                        report.pass("new_content_present");
                    } else {
                        report.fail("new_content_present");
                        report.suggest("Check if text replacement pattern matched");
                    }
                }
                // the old text may legitimately occur more than once
                if let Some(old_text) = arg_str(args, &["old_text"]) {
                    if contains_snippet(&actual, old_text, UPDATE_SNIPPET_LIMIT) {
                        report.suggest("Original text may have multiple occurrences");
                    } else {
                        report.pass("old_content_replaced");
                    }
                }
            }
        }
        UpdateKind::Section => {
            if let Some(actual) = read_or_fail(&path, &mut report) {
                if let Some(section) = arg_str(args, &["section", "section_name"]) {
                    if has_section(&actual, section) {
                        report.pass("section_exists");
                    } else {
                        report.fail("section_exists");
                        report.suggest(format!("Section '{}' not found - verify the name matches exactly", section));
                    }
                }
                if let Some(content) = arg_str(args, &["content", "new_content"]) {
                    if contains_snippet(&actual, content, UPDATE_SNIPPET_LIMIT) {
                        report.pass("new_content_present");
                    } else {
                        report.fail("new_content_present");
                    }
                }
            }
        }
        UpdateKind::Generic => {
            if recently_modified(&path, verifier.recency_window()) {
                report.pass("recently_modified");
            } else {
                report.fail("recently_modified");
                report.suggest("File may not have been modified");
            }
        }
    }

    report.finish(format!("Content update verified: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::VerificationStatus;
    use serde_json::json;
    use std::path::PathBuf;

    fn args(value: serde_json::Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn result_for(path: &Path) -> OperationResult {
        OperationResult::ok("done").with_field("file_path", path.to_string_lossy().to_string())
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_creation_passes_with_matching_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "Shopping.md", "---\ntitle: Shopping\n---\n\nBuy\nmilk\n");

        let outcome = verify_creation(
            &Verifier::default(),
            CreationKind::SimpleNote,
            &args(json!({ "title": "Shopping", "content": "Buy milk" })),
            &result_for(&path),
        );
        assert_eq!(outcome.status, VerificationStatus::Passed);
        assert!(outcome.has_passed("file_exists"));
        assert!(outcome.has_passed("content_verified"));
        assert!(outcome.has_passed("recently_modified"));
    }

    #[test]
    fn test_creation_fails_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = verify_creation(
            &Verifier::default(),
            CreationKind::SimpleNote,
            &args(json!({ "content": "Buy milk" })),
            &result_for(&dir.path().join("ghost.md")),
        );
        assert!(outcome.is_failed());
        assert!(outcome.has_failed("file_exists"));
        assert!(!outcome.suggestions.is_empty());
    }

    #[test]
    fn test_creation_fails_without_path_or_with_empty_file() {
        let outcome = verify_creation(
            &Verifier::default(),
            CreationKind::Structured,
            &Arguments::new(),
            &OperationResult::ok("done"),
        );
        assert!(outcome.has_failed("file_path_returned"));

        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "empty.md", "");
        let outcome = verify_creation(&Verifier::default(), CreationKind::Structured, &Arguments::new(), &result_for(&path));
        assert!(outcome.has_failed("file_non_empty"));
    }

    #[test]
    fn test_creation_content_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "n.md", "Something else entirely");
        let outcome = verify_creation(
            &Verifier::default(),
            CreationKind::SimpleNote,
            &args(json!({ "content": "Buy milk" })),
            &result_for(&path),
        );
        assert!(outcome.has_failed("content_verified"));
    }

    #[test]
    fn test_template_extension_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "weekly.txt", "# {{title}}");
        let outcome = verify_creation(&Verifier::default(), CreationKind::Template, &Arguments::new(), &result_for(&path));
        assert!(outcome.has_failed("template_extension"));
        assert!(outcome
            .suggestions
            .iter()
            .any(|s| s.contains("Templates folder")));
    }

    #[test]
    fn test_append_finds_normalized_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "2026-10-19.md",
            "# 2026-10-19\n\n## Quick Captures\n- call   the\n  dentist\n",
        );
        let outcome = verify_append(
            &Verifier::default(),
            &args(json!({ "content": "- call the dentist" })),
            &result_for(&path),
        );
        assert_eq!(outcome.status, VerificationStatus::Passed);
        assert!(outcome.has_passed("content_appended"));
        assert!(outcome.has_passed("section_exists"));
    }

    #[test]
    fn test_append_missing_content_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "2026-10-19.md", "## Quick Captures\n");
        let outcome = verify_append(
            &Verifier::default(),
            &args(json!({ "content": "call the dentist" })),
            &result_for(&path),
        );
        assert!(outcome.is_failed());
        assert!(outcome.has_failed("content_appended"));
    }

    #[test]
    fn test_append_missing_section_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "d.md", "call the dentist\n");
        let outcome = verify_append(
            &Verifier::default(),
            &args(json!({ "content": "call the dentist", "section": "Work Notes" })),
            &result_for(&path),
        );
        assert_eq!(outcome.status, VerificationStatus::Passed);
        assert!(outcome.suggestions.iter().any(|s| s.contains("Work Notes")));
    }

    #[test]
    fn test_replace_requires_new_text_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "n.md", "Meeting moved to Friday. Friday is busy.");

        let outcome = verify_update(
            &Verifier::default(),
            UpdateKind::Replace,
            &args(json!({ "old_text": "Thursday", "new_text": "Friday" })),
            &result_for(&path),
        );
        assert_eq!(outcome.status, VerificationStatus::Passed);
        assert!(outcome.has_passed("old_content_replaced"));

        let outcome = verify_update(
            &Verifier::default(),
            UpdateKind::Replace,
            &args(json!({ "old_text": "Friday", "new_text": "Saturday" })),
            &result_for(&path),
        );
        assert!(outcome.has_failed("new_content_present"));
        assert!(!outcome.has_failed("old_content_replaced"));
    }

    #[test]
    fn test_section_update_checks_header_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "p.md", "# Project\n\n## Status\nOn track\n");

        let ok = verify_update(
            &Verifier::default(),
            UpdateKind::Section,
            &args(json!({ "section_name": "Status", "new_content": "On track" })),
            &result_for(&path),
        );
        assert_eq!(ok.status, VerificationStatus::Passed);

        let bad = verify_update(
            &Verifier::default(),
            UpdateKind::Section,
            &args(json!({ "section": "Risks", "content": "None" })),
            &result_for(&path),
        );
        assert!(bad.has_failed("section_exists"));
        assert!(bad.has_failed("new_content_present"));
    }

    #[test]
    fn test_generic_update_uses_recency_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "g.md", "content");

        let fresh = verify_update(&Verifier::default(), UpdateKind::Generic, &Arguments::new(), &result_for(&path));
        assert_eq!(fresh.status, VerificationStatus::Passed);

        let strict = Verifier::default().with_recency_window(std::time::Duration::ZERO);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let stale = verify_update(&strict, UpdateKind::Generic, &Arguments::new(), &result_for(&path));
        assert!(stale.has_failed("recently_modified"));
    }
}
