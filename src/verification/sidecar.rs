//! Checkers for scheduled tasks and research output.

use serde_json::Value;
use std::path::PathBuf;

use super::{recently_modified, Report, VerificationOutcome, Verifier, RESEARCH_RECENCY_WINDOW};
use crate::tool_call::{Arguments, OperationResult};

pub const TASKS_FILE_NAME: &str = ".scheduled_tasks.json";
const REQUIRED_TASK_FIELDS: [&str; 2] = ["name", "schedule"];

fn tasks_file(verifier: &Verifier, result: &OperationResult) -> Option<PathBuf> {
    if let Some(explicit) = result.str_field("tasks_file") {
        return Some(verifier.resolve(explicit));
    }
    verifier.vault_root().map(|root| root.join(TASKS_FILE_NAME))
}

/// Ids may be strings or numbers depending on who wrote the sidecar.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(super) fn verify_task(
    verifier: &Verifier,
    args: &Arguments,
    result: &OperationResult,
) -> VerificationOutcome {
    let mut report = Report::default();

    let Some(path) = tasks_file(verifier, result).filter(|p| p.is_file()) else {
        report.fail("tasks_file_exists");
        report.suggest(format!("The {} file should be created in vault root", TASKS_FILE_NAME));
        return report.abort("Tasks file not found");
    };
    report.pass("tasks_file_exists");

    let data: Value = match std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
    {
        Ok(data) => data,
        Err(e) => {
            report.fail("valid_json");
            report.suggest(format!("Check {} file syntax", TASKS_FILE_NAME));
            return report.abort(format!("Invalid tasks file: {}", e));
        }
    };
    report.pass("valid_json");

    let tasks: &[Value] = match &data {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => obj
            .get("tasks")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };

    let task_id = result
        .fields
        .get("task_id")
        .and_then(id_string)
        .or_else(|| args.get("task_id").and_then(id_string));

    let entry = match &task_id {
        Some(id) => {
            let found = tasks
                .iter()
                .find(|t| t.get("id").and_then(id_string).as_deref() == Some(id.as_str()));
            match found {
                Some(task) => {
                    report.pass("task_exists");
                    Some(task)
                }
                None => {
                    report.fail("task_exists");
                    report.suggest(format!("Task {} was not written to {}", id, TASKS_FILE_NAME));
                    None
                }
            }
        }
        None => tasks.last(),
    };

    if let Some(task) = entry {
        let missing: Vec<&str> = REQUIRED_TASK_FIELDS
            .iter()
            .copied()
            .filter(|field| task.get(*field).is_none())
            .collect();
        if missing.is_empty() {
            report.pass("task_has_required_fields");
        } else {
            report.fail("task_has_required_fields");
            report.suggest(format!("Task missing fields: {}", missing.join(", ")));
        }
    }

    report.finish("Task operation verified")
}

pub(super) fn verify_research(verifier: &Verifier, result: &OperationResult) -> VerificationOutcome {
    let mut report = Report::default();

    let path = match verifier.require_file(result, &mut report, &["Verify research completed successfully"]) {
        Ok(path) => path,
        Err(details) => return report.abort(details),
    };

    match std::fs::metadata(&path).map(|m| m.len()) {
        Ok(0) => {
            report.fail("file_non_empty");
            report.suggest("Research may have returned no results");
        }
        Ok(_) => report.pass("file_non_empty"),
        Err(_) => report.fail("verification_error"),
    }

    let recent = recently_modified(&path, RESEARCH_RECENCY_WINDOW);
    match result.str_field("action") {
        Some("created_new_file") | Some("created") => {
            if recent {
                report.pass("action_matches_file");
            } else {
                report.fail("action_matches_file");
                report.suggest("Result claims a new file but it was not written recently");
            }
        }
        Some("appended_to_existing") | Some("appended") => {
            if recent {
                report.pass("content_appended");
            } else {
                report.suggest("File modification time is not recent - verify append succeeded");
            }
        }
        _ => {}
    }

    report.finish(format!("Research operation verified: {}", path.display()))
}
