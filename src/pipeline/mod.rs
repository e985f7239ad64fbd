//! Per-call execution: validate, execute, verify (with retries), log and
//! fold successful calls into the session context.

mod logger;
mod state;

pub use logger::{CallLogger, CallRecord, LogCallLogger};
pub use state::{decide, CallState, Completed, Decision, RetryPolicy, RetryState};

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::{ConversationContext, ContextUpdater};
use crate::error::{CallStatus, ToolError};
use crate::operations::{OperationCatalog, OperationRegistry};
use crate::session::{Session, SessionStore};
use crate::tool_call::{Arguments, MalformedCall, OperationResult, ParsedCall, ToolCall};
use crate::validation::ArgumentValidator;
use crate::verification::{format_failure, VerificationStatus, Verifier};

/// Where successful calls are remembered.
pub struct ContextSink<'a> {
    pub session_id: &'a str,
    pub store: &'a dyn SessionStore,
    pub apply: ContextUpdater,
}

impl<'a> ContextSink<'a> {
    /// Sink using the default context policy.
    pub fn new(session_id: &'a str, store: &'a dyn SessionStore) -> Self {
        Self {
            session_id,
            store,
            apply: ConversationContext::apply,
        }
    }

    async fn update(&self, name: &str, args: &Arguments, success: bool) {
        let mut session = match self.store.load(self.session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => Session::new(self.session_id),
            Err(e) => {
                log::warn!("Context update skipped for {}: {:#}", self.session_id, e);
                return;
            }
        };

        let context = std::mem::take(&mut session.context);
        session.context = (self.apply)(context, name, args, success);
        session.updated_at = chrono::Utc::now();

        if let Err(e) = self.store.save(&session).await {
            log::warn!("Failed to save context for {}: {:#}", self.session_id, e);
        }
    }
}

/// Terminal result of one call, tagged by the model's call id.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub call_id: String,
    pub name: String,
    pub status: CallStatus,
    pub payload: Value,
    pub attempts: u32,
    pub duration: Duration,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

pub struct ToolCallPipeline {
    registry: Arc<dyn OperationRegistry>,
    catalog: OperationCatalog,
    verifier: Verifier,
    policy: RetryPolicy,
    validator: Option<Arc<dyn ArgumentValidator>>,
    logger: Option<Arc<dyn CallLogger>>,
}

impl ToolCallPipeline {
    pub fn new(registry: Arc<dyn OperationRegistry>) -> Self {
        Self {
            registry,
            catalog: OperationCatalog::builtin(),
            verifier: Verifier::default(),
            policy: RetryPolicy::default(),
            validator: None,
            logger: None,
        }
    }

    pub fn with_catalog(mut self, catalog: OperationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ArgumentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn CallLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn registry(&self) -> &Arc<dyn OperationRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one call to a terminal state.
    pub async fn execute_call(
        &self,
        call: &ToolCall,
        model: &str,
        sink: Option<&ContextSink<'_>>,
    ) -> CallOutcome {
        let started = Instant::now();
        let kind = self.catalog.kind_of(&call.name);
        let mut retry = RetryState::new(&self.policy);
        let mut state = CallState::Validating;

        log::info!("Tool call {} ({}) started via {}", call.name, call.id, call.provider.as_str());

        let terminal = loop {
            log::trace!("Tool call {} -> {}", call.id, state.name());
            state = match state {
                CallState::Validating => match self.validate(call) {
                    Ok(()) => CallState::Executing,
                    Err(e) => CallState::Done(Err(e)),
                },

                CallState::Executing => match self.registry.execute(&call.name, &call.arguments).await {
                    Ok(result) => CallState::Verifying(result),
                    Err(e) => {
                        log::error!("Error executing {}: {:#}", call.name, e);
                        CallState::Done(Err(ToolError::Execution(format!(
                            "Error executing {}: {:#}",
                            call.name, e
                        ))))
                    }
                },

                CallState::Verifying(result) => {
                    if !self.policy.verify_writes {
                        CallState::Done(Ok(plain(result)))
                    } else {
                        let outcome = self.verifier.verify(kind, &call.name, &call.arguments, &result);
                        match decide(&retry, &outcome) {
                            Decision::Accept if outcome.status == VerificationStatus::Passed => {
                                let mut payload = result.to_json();
                                payload["verification"] = json!({
                                    "status": "passed",
                                    "checks_passed": outcome.checks_passed,
                                    "details": outcome.details,
                                    "attempt": retry.attempts(),
                                });
                                CallState::Done(Ok(Completed { result, payload }))
                            }
                            Decision::Accept => CallState::Done(Ok(plain(result))),
                            Decision::Retry => {
                                log::warn!(
                                    "Verification failed for {} (attempt {}/{}): {}. Retrying in {:?}",
                                    call.name,
                                    retry.attempts(),
                                    retry.max_retries + 1,
                                    outcome.details,
                                    retry.delay
                                );
                                CallState::Retrying
                            }
                            Decision::HardFail => {
                                let attempts = retry.attempts();
                                log::warn!(
                                    "Verification failed for {} after {} attempt(s)",
                                    call.name,
                                    attempts
                                );
                                CallState::Done(Err(ToolError::VerificationFailed {
                                    message: format_failure(&result.message, &outcome, attempts),
                                    verification: json!({
                                        "status": "failed",
                                        "attempts": attempts,
                                        "checks_passed": outcome.checks_passed,
                                        "checks_failed": outcome.checks_failed,
                                        "suggestions": outcome.suggestions,
                                    }),
                                }))
                            }
                            Decision::Warn => {
                                let attempts = retry.attempts();
                                log::warn!(
                                    "Verification failed for {} after {} attempt(s); returning result with warning",
                                    call.name,
                                    attempts
                                );
                                let mut payload = result.to_json();
                                payload["verification"] = json!({
                                    "status": "warning",
                                    "message": format!(
                                        "Operation completed but verification failed: {}",
                                        outcome.details
                                    ),
                                    "attempts": attempts,
                                    "checks_failed": outcome.checks_failed,
                                });
                                CallState::Done(Ok(Completed { result, payload }))
                            }
                        }
                    }
                }

                CallState::Retrying => {
                    if !retry.delay.is_zero() {
                        tokio::time::sleep(retry.delay).await;
                    }
                    retry.advance();
                    CallState::Executing
                }

                CallState::Done(terminal) => break terminal,
            };
        };

        let duration = started.elapsed();
        let attempts = retry.attempts();

        let (status, payload, error, success) = match &terminal {
            Ok(done) => (CallStatus::Success, done.payload.clone(), None, done.result.success),
            Err(e) => (e.status(), e.to_payload(), Some(e.to_string()), false),
        };

        self.log_call(CallRecord {
            call_id: call.id.clone(),
            model: model.to_string(),
            function: call.name.clone(),
            status,
            args: Value::Object(call.arguments.clone()),
            error,
            duration_ms: duration.as_millis() as u64,
            success,
        });

        if let (Ok(done), Some(sink)) = (&terminal, sink) {
            sink.update(&call.name, &call.arguments, done.result.success).await;
        }

        log::info!("Tool call {} ({}) finished: {} in {:?}", call.name, call.id, status, duration);

        CallOutcome {
            call_id: call.id.clone(),
            name: call.name.clone(),
            status,
            payload,
            attempts,
            duration,
        }
    }

    /// Report a call whose arguments could not be decoded.
    pub fn report_malformed(&self, call: &MalformedCall, model: &str) -> CallOutcome {
        let error = ToolError::Parse(format!("Failed to parse arguments for {}: {}", call.name, call.error));
        log::warn!("Tool call {} ({}) rejected: {}", call.name, call.id, error);

        self.log_call(CallRecord {
            call_id: call.id.clone(),
            model: model.to_string(),
            function: call.name.clone(),
            status: error.status(),
            args: Value::Null,
            error: Some(error.to_string()),
            duration_ms: 0,
            success: false,
        });

        CallOutcome {
            call_id: call.id.clone(),
            name: call.name.clone(),
            status: error.status(),
            payload: error.to_payload(),
            attempts: 0,
            duration: Duration::ZERO,
        }
    }

    /// Run every call of a turn in model order. Duplicates run twice.
    pub async fn run_batch(
        &self,
        calls: &[ParsedCall],
        model: &str,
        sink: Option<&ContextSink<'_>>,
    ) -> Vec<CallOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for parsed in calls {
            let outcome = match parsed {
                ParsedCall::Ready(call) => self.execute_call(call, model, sink).await,
                ParsedCall::Malformed(call) => self.report_malformed(call, model),
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    fn validate(&self, call: &ToolCall) -> Result<(), ToolError> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        validator.validate(&call.name, &call.arguments).map_err(|reason| {
            log::warn!("Invalid arguments for {}: {}", call.name, reason);
            ToolError::Validation {
                function: call.name.clone(),
                reason,
            }
        })
    }

    fn log_call(&self, record: CallRecord) {
        if let Some(logger) = &self.logger {
            logger.log(&record);
        }
    }
}

fn plain(result: OperationResult) -> Completed {
    let payload = result.to_json();
    Completed { result, payload }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::SchemaValidator;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Behavior = Box<dyn Fn(&str, &Arguments) -> anyhow::Result<OperationResult> + Send + Sync>;

    struct FakeRegistry {
        calls: AtomicUsize,
        behavior: Behavior,
    }

    impl FakeRegistry {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behavior,
            })
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OperationRegistry for FakeRegistry {
        async fn execute(&self, name: &str, args: &Arguments) -> anyhow::Result<OperationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.behavior)(name, args)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        sessions: Mutex<HashMap<String, Session>>,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn load(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
            Ok(self.sessions.lock().unwrap().get(session_id).cloned())
        }

        async fn save(&self, session: &Session) -> anyhow::Result<()> {
            self.sessions
                .lock()
                .unwrap()
                .insert(session.id.clone(), session.clone());
            Ok(())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn load(&self, _session_id: &str) -> anyhow::Result<Option<Session>> {
            Err(anyhow!("disk on fire"))
        }

        async fn save(&self, _session: &Session) -> anyhow::Result<()> {
            Err(anyhow!("disk on fire"))
        }
    }

    #[derive(Default)]
    struct RecordingLogger {
        records: Mutex<Vec<CallRecord>>,
    }

    impl CallLogger for RecordingLogger {
        fn log(&self, record: &CallRecord) {
            self.records.lock().unwrap().push(record.clone());
        }
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall::new(None, name, args(arguments), crate::tool_call::Provider::OpenAi)
    }

    fn policy(max_retries: u32, strict_mode: bool) -> RetryPolicy {
        RetryPolicy {
            verify_writes: true,
            max_retries,
            retry_delay: Duration::ZERO,
            strict_mode,
        }
    }

    /// Registry that claims success but never writes anything.
    fn phantom_writer(path: PathBuf) -> Arc<FakeRegistry> {
        FakeRegistry::new(Box::new(move |_: &str, _: &Arguments| {
            Ok(OperationResult::ok("Created note").with_field("file_path", path.to_string_lossy().to_string()))
        }))
    }

    /// Registry that really writes simple notes into `dir`.
    fn note_writer(dir: PathBuf) -> Arc<FakeRegistry> {
        FakeRegistry::new(Box::new(move |_: &str, args: &Arguments| {
            let title = args.get("title").and_then(Value::as_str).unwrap_or("Untitled");
            let content = args.get("content").and_then(Value::as_str).unwrap_or("");
            let path = dir.join(format!("{}.md", title));
            std::fs::write(&path, format!("# {}\n\n{}\n", title, content))?;
            Ok(OperationResult::ok(format!("Created {}", title))
                .with_field("file_path", path.to_string_lossy().to_string()))
        }))
    }

    #[tokio::test]
    async fn test_strict_mode_executes_n_plus_one_times() {
        let dir = tempfile::tempdir().unwrap();
        let registry = phantom_writer(dir.path().join("missing.md"));
        let pipeline = ToolCallPipeline::new(registry.clone()).with_policy(policy(2, true));

        let outcome = pipeline
            .execute_call(&call("create_simple_note", json!({ "title": "missing", "content": "x" })), "m", None)
            .await;

        assert_eq!(registry.count(), 3);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.status, CallStatus::VerificationFailed);
        assert_eq!(outcome.payload["success"], false);
        assert_eq!(outcome.payload["status"], "verification_failed");
        assert_eq!(outcome.payload["verification"]["attempts"], 3);
        let error = outcome.payload["error"].as_str().unwrap();
        assert!(error.contains("after 3 attempt(s)"));
        assert!(error.contains("file_exists"));
    }

    #[tokio::test]
    async fn test_non_strict_mode_warns_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let registry = phantom_writer(dir.path().join("missing.md"));
        let pipeline = ToolCallPipeline::new(registry.clone()).with_policy(policy(1, false));

        let outcome = pipeline
            .execute_call(&call("create_simple_note", json!({ "title": "missing", "content": "x" })), "m", None)
            .await;

        assert_eq!(registry.count(), 2);
        assert_eq!(outcome.status, CallStatus::Success);
        assert_eq!(outcome.payload["success"], true);
        assert_eq!(outcome.payload["verification"]["status"], "warning");
        assert_eq!(outcome.payload["verification"]["attempts"], 2);
        assert_eq!(outcome.payload["verification"]["checks_failed"][0], "file_exists");
    }

    #[tokio::test]
    async fn test_verification_disabled_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = phantom_writer(dir.path().join("missing.md"));
        let pipeline = ToolCallPipeline::new(registry.clone()).with_policy(RetryPolicy {
            verify_writes: false,
            ..policy(3, true)
        });

        let outcome = pipeline
            .execute_call(&call("create_simple_note", json!({ "title": "missing" })), "m", None)
            .await;

        assert_eq!(registry.count(), 1);
        assert_eq!(outcome.status, CallStatus::Success);
        assert!(outcome.payload.get("verification").is_none());
    }

    #[tokio::test]
    async fn test_reported_failure_is_not_retried() {
        let registry = FakeRegistry::new(Box::new(|_: &str, _: &Arguments| Ok(OperationResult::failed("Note already exists"))));
        let pipeline = ToolCallPipeline::new(registry.clone()).with_policy(policy(2, true));

        let outcome = pipeline
            .execute_call(&call("create_simple_note", json!({ "title": "Dup" })), "m", None)
            .await;

        assert_eq!(registry.count(), 1);
        assert_eq!(outcome.status, CallStatus::Success);
        assert_eq!(outcome.payload["success"], false);
        assert_eq!(outcome.payload["error"], "Note already exists");
    }

    #[tokio::test]
    async fn test_validation_error_skips_execution() {
        let registry = FakeRegistry::new(Box::new(|_: &str, _: &Arguments| Ok(OperationResult::ok("done"))));
        let logger = Arc::new(RecordingLogger::default());
        let pipeline = ToolCallPipeline::new(registry.clone())
            .with_validator(Arc::new(SchemaValidator))
            .with_logger(logger.clone());

        let outcome = pipeline
            .execute_call(&call("create_simple_note", json!({ "content": "no title" })), "m", None)
            .await;

        assert_eq!(registry.count(), 0);
        assert_eq!(outcome.status, CallStatus::ValidationError);
        assert!(outcome.payload["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid arguments for create_simple_note"));

        let records = logger.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, CallStatus::ValidationError);
    }

    #[tokio::test]
    async fn test_execution_error_is_terminal() {
        let registry = FakeRegistry::new(Box::new(|_: &str, _: &Arguments| Err(anyhow!("permission denied"))));
        let pipeline = ToolCallPipeline::new(registry.clone()).with_policy(policy(2, true));

        let outcome = pipeline
            .execute_call(&call("create_simple_note", json!({ "title": "x" })), "m", None)
            .await;

        assert_eq!(registry.count(), 1);
        assert_eq!(outcome.status, CallStatus::ExecutionError);
        assert!(outcome.payload["error"].as_str().unwrap().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_duplicates() {
        let registry = FakeRegistry::new(Box::new(|name: &str, _: &Arguments| Ok(OperationResult::ok(name))));
        let logger = Arc::new(RecordingLogger::default());
        let pipeline = ToolCallPipeline::new(registry.clone()).with_logger(logger.clone());

        let same = call("search_vault", json!({ "query": "milk" }));
        let malformed = ParsedCall::from_raw(Some("bad"), "read_note", &json!("{oops"), crate::tool_call::Provider::OpenAi);
        let batch = vec![ParsedCall::Ready(same.clone()), malformed, ParsedCall::Ready(same)];

        let outcomes = pipeline.run_batch(&batch, "m", None).await;

        assert_eq!(registry.count(), 2);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].status, CallStatus::Success);
        assert_eq!(outcomes[1].status, CallStatus::ParseError);
        assert_eq!(outcomes[1].call_id, "bad");
        assert_eq!(outcomes[0].call_id, outcomes[2].call_id);
        assert_eq!(logger.records.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_create_note_end_to_end_updates_context() {
        let dir = tempfile::tempdir().unwrap();
        let registry = note_writer(dir.path().to_path_buf());
        let store = MemoryStore::default();
        let sink = ContextSink::new("s1", &store);
        let pipeline = ToolCallPipeline::new(registry.clone())
            .with_validator(Arc::new(SchemaValidator))
            .with_policy(policy(2, true));

        let outcome = pipeline
            .execute_call(
                &call("create_simple_note", json!({ "title": "Shopping", "content": "Buy milk" })),
                "m",
                Some(&sink),
            )
            .await;

        assert_eq!(registry.count(), 1);
        assert_eq!(outcome.status, CallStatus::Success);
        assert_eq!(outcome.payload["verification"]["status"], "passed");
        assert_eq!(outcome.payload["verification"]["attempt"], 1);

        let session = store.load("s1").await.unwrap().unwrap();
        assert_eq!(session.context.last_created_note.as_deref(), Some("Shopping"));
    }

    #[tokio::test]
    async fn test_missing_file_end_to_end_lists_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let registry = phantom_writer(dir.path().join("Shopping.md"));
        let store = MemoryStore::default();
        let sink = ContextSink::new("s1", &store);
        let pipeline = ToolCallPipeline::new(registry.clone()).with_policy(policy(2, true));

        let outcome = pipeline
            .execute_call(
                &call("create_simple_note", json!({ "title": "Shopping", "content": "Buy milk" })),
                "m",
                Some(&sink),
            )
            .await;

        assert_eq!(registry.count(), 3);
        assert_eq!(outcome.status, CallStatus::VerificationFailed);
        assert!(outcome.payload["error"].as_str().unwrap().contains("file_exists"));
        assert!(store.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_context_store_errors_are_swallowed() {
        let registry = FakeRegistry::new(Box::new(|_: &str, _: &Arguments| Ok(OperationResult::ok("found 2 notes"))));
        let store = BrokenStore;
        let sink = ContextSink::new("s1", &store);
        let pipeline = ToolCallPipeline::new(registry);

        let outcome = pipeline
            .execute_call(&call("search_vault", json!({ "query": "milk" })), "m", Some(&sink))
            .await;

        assert_eq!(outcome.status, CallStatus::Success);
    }
}
