//! Result capture tool
//!
//! Every child session gets its own [`ResultCapture`]. The child's LLM calls
//! it to report its outcome; the capture validates the arguments against the
//! declared result schema and hands the first valid result to the waiting
//! runner through a one-shot channel.
//!
//! ```text
//! Pending --invalid call (attempt < 5)--> Pending
//! Pending --invalid call (attempt 5)----> Faulted    (terminal)
//! Pending --valid call------------------> Completed  (terminal)
//! Completed / Faulted --any call--------> rejected, state unchanged
//! ```

use fanout_tools::{Error, ParameterSpec, Result, Tool, ToolDefinition, ToolResult};
use serde_json::{Map, Value};
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use super::types::{ChildSessionResult, Disposition};
use crate::config::ToolSpec;

/// Invalid calls tolerated before the capture faults
pub const MAX_VALIDATION_ATTEMPTS: u32 = 5;

/// Message returned to the child after a valid call
const CONFIRMATION_MESSAGE: &str =
    "Result recorded. Your task is complete and you may end the session now.";

/// Value delivered to the runner when the capture reaches a terminal state
#[derive(Debug, Clone)]
pub struct CapturedResult {
    /// The child's result
    pub result: ChildSessionResult,
    /// `Reported` or `Faulted`
    pub disposition: Disposition,
}

/// Observable capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Waiting for a valid call
    Pending {
        /// Invalid calls so far
        failures: u32,
    },
    /// A valid result was delivered
    Completed,
    /// Validation failed too often
    Faulted,
}

enum CaptureState {
    Pending {
        sender: oneshot::Sender<CapturedResult>,
        failures: u32,
    },
    Completed,
    Faulted,
}

/// The result tool installed into one child session
pub struct ResultCapture {
    definition: ToolDefinition,
    parameters: Vec<ParameterSpec>,
    state: Mutex<CaptureState>,
}

impl ResultCapture {
    /// Create a capture for `spec` and the receiver its result arrives on.
    pub fn new(spec: &ToolSpec) -> (Self, oneshot::Receiver<CapturedResult>) {
        let (sender, receiver) = oneshot::channel();
        let capture = Self {
            definition: spec.to_definition(),
            parameters: spec.parameters.clone(),
            state: Mutex::new(CaptureState::Pending {
                sender,
                failures: 0,
            }),
        };
        (capture, receiver)
    }

    /// Current state
    pub async fn status(&self) -> CaptureStatus {
        match &*self.state.lock().await {
            CaptureState::Pending { failures, .. } => CaptureStatus::Pending {
                failures: *failures,
            },
            CaptureState::Completed => CaptureStatus::Completed,
            CaptureState::Faulted => CaptureStatus::Faulted,
        }
    }

    /// Check every declared parameter, collecting all problems at once.
    ///
    /// Returns the arguments reduced to the declared names with coerced
    /// values.
    fn validate(&self, args: &Map<String, Value>) -> std::result::Result<Map<String, Value>, String> {
        let mut missing = Vec::new();
        let mut invalid = Vec::new();
        let mut accepted = Map::new();

        for param in &self.parameters {
            match args.get(&param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        missing.push(param.name.as_str());
                    }
                }
                Some(value) => match param.param_type.coerce(value) {
                    Ok(coerced) => {
                        accepted.insert(param.name.clone(), coerced);
                    }
                    Err(reason) => invalid.push(format!("'{}' {reason}", param.name)),
                },
            }
        }

        let mut problems = Vec::new();
        if !missing.is_empty() {
            problems.push(format!(
                "missing required parameter(s): {}",
                missing.join(", ")
            ));
        }
        if !invalid.is_empty() {
            problems.push(format!("invalid value(s): {}", invalid.join("; ")));
        }

        if problems.is_empty() {
            Ok(accepted)
        } else {
            Err(problems.join(". "))
        }
    }
}

#[async_trait::async_trait]
impl Tool for ResultCapture {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    // Non-object input counts as a failed attempt instead of being rejected
    // up front.
    fn validate_input(&self, _input: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        let start = Instant::now();
        let tool_name = self.definition.name.as_str();
        let args = match input {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let mut state = self.state.lock().await;

        // Left as Completed unless a path below restores another state.
        let (sender, failures) = match std::mem::replace(&mut *state, CaptureState::Completed) {
            CaptureState::Pending { sender, failures } => (sender, failures),
            CaptureState::Completed => {
                warn!(tool = %tool_name, "Result tool called after completion");
                return Err(Error::AlreadySet(format!(
                    "`{tool_name}` was already called successfully; the first result is kept"
                )));
            }
            CaptureState::Faulted => {
                *state = CaptureState::Faulted;
                return Err(Error::Execution(format!(
                    "`{tool_name}` is no longer accepting results after repeated validation \
                     failures. End the session."
                )));
            }
        };

        let accepted = match self.validate(&args) {
            Ok(accepted) => accepted,
            Err(problems) => {
                let attempt = failures + 1;

                if attempt < MAX_VALIDATION_ATTEMPTS {
                    *state = CaptureState::Pending {
                        sender,
                        failures: attempt,
                    };
                    debug!(tool = %tool_name, attempt, problems = %problems, "Result rejected");
                    return Err(Error::Validation(format!(
                        "Result rejected ({attempt} of {MAX_VALIDATION_ATTEMPTS} attempts): \
                         {problems}. Call `{tool_name}` again with corrected arguments."
                    )));
                }

                *state = CaptureState::Faulted;
                warn!(tool = %tool_name, attempts = attempt, "Result tool faulted");
                let fault = format!(
                    "Validation failed after {MAX_VALIDATION_ATTEMPTS} attempts: {problems}"
                );
                // A closed receiver means the runner already gave up.
                let _ = sender.send(CapturedResult {
                    result: ChildSessionResult::failure(fault.clone()),
                    disposition: Disposition::Faulted,
                });
                return Err(Error::Execution(format!(
                    "{fault}. The task has been recorded as failed; stop and end the session."
                )));
            }
        };

        let payload = Value::Object(accepted).to_string();
        if sender
            .send(CapturedResult {
                result: ChildSessionResult::success(payload),
                disposition: Disposition::Reported,
            })
            .is_err()
        {
            warn!(tool = %tool_name, "Result arrived after the runner stopped waiting");
            return Err(Error::Execution(
                "the orchestrator is no longer waiting for this result".into(),
            ));
        }

        info!(tool = %tool_name, "Result captured");
        Ok(ToolResult::success(
            Value::from(CONFIRMATION_MESSAGE),
            start.elapsed().as_millis() as u64,
        ))
    }
}
