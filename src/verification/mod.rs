//! Read-after-write verification of vault operations.
//!
//! Checkers never talk to the operation implementation. They only look at
//! the operation name, its arguments and the result it returned (usually a
//! file path), then inspect the filesystem.

mod files;
mod metadata;
mod sidecar;

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::operations::OperationKind;
use crate::tool_call::{Arguments, OperationResult};

pub const DEFAULT_RECENCY_WINDOW: Duration = Duration::from_secs(10);
pub const RESEARCH_RECENCY_WINDOW: Duration = Duration::from_secs(30);

/// Snippet lengths used when looking for echoed content in a file.
pub(crate) const SNIPPET_LIMIT: usize = 200;
pub(crate) const UPDATE_SNIPPET_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    Failed,
    Skipped,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Passed => "passed",
            VerificationStatus::Failed => "failed",
            VerificationStatus::Skipped => "skipped",
        }
    }
}

/// Same shape for every checker, so failures format uniformly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub status: VerificationStatus,
    pub details: String,
    pub checks_passed: Vec<String>,
    pub checks_failed: Vec<String>,
    pub suggestions: Vec<String>,
}

impl VerificationOutcome {
    pub fn skipped(details: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Skipped,
            details: details.into(),
            checks_passed: Vec::new(),
            checks_failed: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == VerificationStatus::Failed
    }

    pub fn has_passed(&self, check: &str) -> bool {
        self.checks_passed.iter().any(|c| c == check)
    }

    pub fn has_failed(&self, check: &str) -> bool {
        self.checks_failed.iter().any(|c| c == check)
    }
}

/// Accumulates check results for one verification run.
#[derive(Debug, Default)]
pub(crate) struct Report {
    passed: Vec<String>,
    failed: Vec<String>,
    suggestions: Vec<String>,
}

impl Report {
    pub(crate) fn pass(&mut self, check: &str) {
        self.passed.push(check.to_string());
    }

    pub(crate) fn fail(&mut self, check: &str) {
        self.failed.push(check.to_string());
    }

    pub(crate) fn suggest(&mut self, suggestion: impl Into<String>) {
        self.suggestions.push(suggestion.into());
    }

    /// Stop checking; the outcome is a failure with these details.
    pub(crate) fn abort(self, details: impl Into<String>) -> VerificationOutcome {
        self.into_outcome(VerificationStatus::Failed, details.into())
    }

    pub(crate) fn finish(self, ok_details: impl Into<String>) -> VerificationOutcome {
        if self.failed.is_empty() {
            self.into_outcome(VerificationStatus::Passed, ok_details.into())
        } else {
            let details = format!("Verification failed: {}", self.failed.join(", "));
            self.into_outcome(VerificationStatus::Failed, details)
        }
    }

    /// Like `finish`, but with caller-provided failure details.
    pub(crate) fn finish_with(self, ok_details: impl Into<String>, failed_details: impl Into<String>) -> VerificationOutcome {
        if self.failed.is_empty() {
            self.into_outcome(VerificationStatus::Passed, ok_details.into())
        } else {
            self.into_outcome(VerificationStatus::Failed, failed_details.into())
        }
    }

    fn into_outcome(self, status: VerificationStatus, details: String) -> VerificationOutcome {
        VerificationOutcome {
            status,
            details,
            checks_passed: self.passed,
            checks_failed: self.failed,
            suggestions: self.suggestions,
        }
    }
}

/// Per-category read-after-write checker.
#[derive(Debug, Clone)]
pub struct Verifier {
    vault_root: Option<PathBuf>,
    recency_window: Duration,
}

impl Default for Verifier {
    fn default() -> Self {
        Self {
            vault_root: None,
            recency_window: DEFAULT_RECENCY_WINDOW,
        }
    }
}

impl Verifier {
    /// Relative result paths and the task sidecar resolve against `vault_root`.
    pub fn new(vault_root: Option<PathBuf>) -> Self {
        Self {
            vault_root,
            ..Self::default()
        }
    }

    pub fn with_recency_window(mut self, window: Duration) -> Self {
        self.recency_window = window;
        self
    }

    pub fn recency_window(&self) -> Duration {
        self.recency_window
    }

    pub fn vault_root(&self) -> Option<&Path> {
        self.vault_root.as_deref()
    }

    /// Check that a write the registry reported as successful is observable.
    pub fn verify(
        &self,
        kind: OperationKind,
        name: &str,
        args: &Arguments,
        result: &OperationResult,
    ) -> VerificationOutcome {
        if !kind.is_write() {
            return VerificationOutcome::skipped("Operation does not require verification");
        }
        if !result.success {
            return VerificationOutcome::skipped("Operation reported failure, verification skipped");
        }

        log::debug!(
            "Verifier: checking {} ({}) file_path={:?}",
            name,
            kind.label(),
            result.file_path()
        );

        let outcome = match kind {
            OperationKind::FileCreation(creation) => files::verify_creation(self, creation, args, result),
            OperationKind::ContentAppend => files::verify_append(self, args, result),
            OperationKind::ContentUpdate(update) => files::verify_update(self, update, args, result),
            OperationKind::Metadata => metadata::verify_tags(self, args, result),
            OperationKind::TaskOp => sidecar::verify_task(self, args, result),
            OperationKind::Research => sidecar::verify_research(self, result),
            OperationKind::NonWrite => {
                VerificationOutcome::skipped("Operation does not require verification")
            }
        };

        match outcome.status {
            VerificationStatus::Failed => log::warn!(
                "Verifier: {} failed checks {:?}: {}",
                name,
                outcome.checks_failed,
                outcome.details
            ),
            _ => log::info!("Verifier: {} passed {:?}", name, outcome.checks_passed),
        }

        outcome
    }

    pub(crate) fn resolve(&self, raw: &str) -> PathBuf {
        let path = PathBuf::from(raw);
        match &self.vault_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }

    /// Resolve the result's file path and require it to exist.
    ///
    /// On failure the report is updated and the details for `abort` are
    /// returned.
    pub(crate) fn require_file(
        &self,
        result: &OperationResult,
        report: &mut Report,
        missing_hints: &[&str],
    ) -> Result<PathBuf, String> {
        let Some(raw) = result.file_path() else {
            report.fail("file_path_returned");
            report.suggest("Check that the operation returned a valid file path");
            return Err("No file path in operation result".to_string());
        };

        let path = self.resolve(raw);
        if !path.is_file() {
            report.fail("file_exists");
            for hint in missing_hints {
                report.suggest(*hint);
            }
            return Err(format!("File not found after write: {}", path.display()));
        }

        report.pass("file_exists");
        Ok(path)
    }
}

/// Collapse whitespace so content comparisons survive reformatting.
///
/// Trims, turns line breaks into spaces, truncates to `limit` characters and
/// collapses whitespace runs to a single space.
pub fn normalize(text: &str, limit: Option<usize>) -> String {
    let fragment = text.trim().replace(['\r', '\n'], " ");
    let fragment: String = match limit {
        Some(limit) if limit > 0 => fragment.chars().take(limit).collect(),
        _ => fragment,
    };
    fragment.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether the normalized snippet of `requested` appears in `actual`.
pub(crate) fn contains_snippet(actual: &str, requested: &str, limit: usize) -> bool {
    let snippet = normalize(requested, Some(limit));
    snippet.is_empty() || normalize(actual, None).contains(&snippet)
}

pub(crate) fn recently_modified(path: &Path, window: Duration) -> bool {
    let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age <= window,
        // mtime in the future: clock skew, count it as fresh
        Err(_) => true,
    }
}

/// First non-blank string argument among `keys`.
pub(crate) fn arg_str<'a>(args: &'a Arguments, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        args.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    })
}

/// Message returned to the model when a write could not be confirmed.
pub fn format_failure(original_message: &str, outcome: &VerificationOutcome, attempts: u32) -> String {
    let bullet = |items: &[String]| -> String {
        items
            .iter()
            .map(|item| format!("  - {}", item))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let original = if original_message.trim().is_empty() {
        "Operation completed"
    } else {
        original_message
    };

    format!(
        "Operation failed verification after {} attempt(s)\n\n\
         **Original Operation:** {}\n\n\
         **Verification Failed:**\n{}\n\n\
         **Failed Checks:**\n{}\n\n\
         **Suggestions:**\n{}\n\n\
         **Important:** This operation did NOT complete successfully. \
         Please try again or check the vault manually.",
        attempts,
        original,
        outcome.details,
        bullet(&outcome.checks_failed),
        bullet(&outcome.suggestions),
    )
}
