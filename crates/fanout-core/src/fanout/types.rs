use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::ResultStrategy;

/// Key under which the unit is exposed to prompt templates
pub const PARAMETER_CONTEXT_KEY: &str = "_Parameter";

/// One fan-out item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    /// Unit name (parameter name, list parameter name, or list label)
    pub name: String,
    /// Unit value
    pub value: Value,
}

impl ExecutionUnit {
    /// Create a unit
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Template context for this unit: every shared argument plus
    /// `_Parameter.Name` / `_Parameter.Value`.
    #[must_use]
    pub fn template_context(&self, shared: &serde_json::Map<String, Value>) -> Value {
        let mut context = shared.clone();
        context.insert(
            PARAMETER_CONTEXT_KEY.to_string(),
            serde_json::json!({
                "Name": self.name,
                "Value": self.value,
            }),
        );
        Value::Object(context)
    }
}

/// Terminal outcome of one child session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSessionResult {
    /// Whether the child reported a valid result
    pub success: bool,
    /// Serialised result payload
    pub result: Option<String>,
    /// Failure description
    pub error_message: Option<String>,
}

impl ChildSessionResult {
    /// Successful result
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Some(result.into()),
            error_message: None,
        }
    }

    /// Failed result
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error_message: Some(error.into()),
        }
    }

    /// Failed result carrying partial output
    pub fn partial(partial: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Some(partial.into()),
            error_message: Some(error.into()),
        }
    }
}

/// How a unit reached its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The child called the result tool with valid arguments
    Reported,
    /// The result tool gave up after repeated validation failures
    Faulted,
    /// The deadline passed without a result
    TimedOut,
    /// The child session went away without a result
    Closed,
    /// Cancellation reached the unit first
    Cancelled,
    /// Rendering, session start, tool install or prompt delivery failed
    FailedToStart,
}

/// A result tagged with the unit that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    /// Selection index
    pub index: usize,
    /// The unit
    pub unit: ExecutionUnit,
    /// Child session id, once started
    pub session_id: Option<String>,
    /// Terminal result
    #[serde(flatten)]
    pub result: ChildSessionResult,
    /// How the result came about
    pub disposition: Disposition,
    /// Time from slot acquisition to result, in milliseconds
    pub duration_ms: u64,
}

impl UnitOutcome {
    /// Whether the unit succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.success
    }

    fn label(&self) -> String {
        format!("{}[{}]", self.unit.name, self.index)
    }
}

/// Aggregated result of one fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutReport {
    /// Fan-out identifier
    pub execution_id: Uuid,
    /// Aggregation strategy used
    pub strategy: ResultStrategy,
    /// Overall success
    pub success: bool,
    /// Outcomes ordered by selection index; for a WaitForAny winner, only
    /// the winning unit
    pub outcomes: Vec<UnitOutcome>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl FanoutReport {
    /// Successful outcomes
    pub fn successes(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    /// Failed outcomes
    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// One message listing every unit's error
    #[must_use]
    pub fn combined_error(&self) -> String {
        let lines: Vec<String> = self
            .failures()
            .map(|o| {
                format!(
                    "- {}: {}",
                    o.label(),
                    o.result.error_message.as_deref().unwrap_or("failed")
                )
            })
            .collect();
        format!(
            "All {} sub-session(s) failed:\n{}",
            self.outcomes.len(),
            lines.join("\n")
        )
    }

    /// JSON payload returned to the parent through the fan-out tool
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let results: Vec<Value> = self
            .outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "name": o.unit.name,
                    "index": o.index,
                    "value": o.unit.value,
                    "success": o.result.success,
                    "result": o.result.result.as_deref().map(parse_result),
                    "error": o.result.error_message,
                })
            })
            .collect();

        serde_json::json!({
            "strategy": self.strategy,
            "success": self.success,
            "completed": self.successes().count(),
            "failed": self.failures().count(),
            "results": results,
        })
    }
}

// Results captured by the result tool are JSON objects; partial text is not.
fn parse_result(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Nesting depth of the calling session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecursionContext {
    /// Ancestors between the calling session and the root
    pub depth: u32,
    /// Configured maximum recursion level
    pub max_allowed: u32,
}
