use std::time::Duration;

use crate::error::ToolError;
use crate::tool_call::OperationResult;
use crate::verification::{VerificationOutcome, VerificationStatus};

/// Verification settings applied to every call of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub verify_writes: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub strict_mode: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            verify_writes: true,
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            strict_mode: true,
        }
    }
}

/// Retry bookkeeping for one call. `attempt` counts retries already started.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub max_retries: u32,
    pub delay: Duration,
    pub strict_mode: bool,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            // nothing to retry on when nothing is verified
            max_retries: if policy.verify_writes { policy.max_retries } else { 0 },
            delay: policy.retry_delay,
            strict_mode: policy.strict_mode,
        }
    }

    /// Executions performed so far, counting the current one.
    pub fn attempts(&self) -> u32 {
        self.attempt + 1
    }

    pub fn has_retries_left(&self) -> bool {
        self.attempt < self.max_retries
    }

    pub(crate) fn advance(&mut self) {
        if self.has_retries_left() {
            self.attempt += 1;
        }
    }
}

/// What to do with an executed call once its verification is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Retry,
    HardFail,
    Warn,
}

pub fn decide(state: &RetryState, outcome: &VerificationOutcome) -> Decision {
    match outcome.status {
        VerificationStatus::Passed | VerificationStatus::Skipped => Decision::Accept,
        VerificationStatus::Failed if state.has_retries_left() => Decision::Retry,
        VerificationStatus::Failed if state.strict_mode => Decision::HardFail,
        VerificationStatus::Failed => Decision::Warn,
    }
}

/// Result of a call that reached a terminal state without a pipeline error.
#[derive(Debug, Clone)]
pub struct Completed {
    pub result: OperationResult,
    pub payload: serde_json::Value,
}

/// Per-call state machine driven by `ToolCallPipeline::execute_call`.
#[derive(Debug)]
pub enum CallState {
    Validating,
    Executing,
    Verifying(OperationResult),
    Retrying,
    Done(Result<Completed, ToolError>),
}

impl CallState {
    pub fn name(&self) -> &'static str {
        match self {
            CallState::Validating => "validating",
            CallState::Executing => "executing",
            CallState::Verifying(_) => "verifying",
            CallState::Retrying => "retrying",
            CallState::Done(_) => "done",
        }
    }
}
