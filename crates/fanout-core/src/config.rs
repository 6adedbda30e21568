//! Fan-out definition
//!
//! A [`FanoutConfig`] is the JSON document describing one fan-out tool: the
//! tool it exposes to the parent LLM, how requests are split into execution
//! units, the prompt each child receives, and the result tool each child must
//! call. It is loaded once per invocation and validated before any child
//! session starts.

use crate::error::{Error, Result};
use fanout_tools::{ParameterSpec, ParameterType, ToolDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default max recursion depth for nested fan-outs
pub const DEFAULT_MAX_RECURSION_LEVEL: u32 = 3;

/// Default per-child session timeout (5 minutes)
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 300_000;

/// Default name of the result tool installed into child sessions
pub const DEFAULT_RESULT_TOOL_NAME: &str = "return_result";

/// How a request is split into execution units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    /// No fan-out: a single child handles the whole request
    #[default]
    None,
    /// One child per supplied input parameter
    ParameterBased,
    /// One child per element of an array argument
    ListBased,
    /// One child per entry of a static list in the configuration
    ExternalList,
}

/// When the coordinator considers the fan-out finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStrategy {
    /// Wait for every child and report all outcomes
    #[default]
    WaitForAll,
    /// Return with the first successful child
    WaitForAny,
}

/// What happens to a child that never calls the result tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingBehavior {
    /// Report a timeout failure
    #[default]
    Fail,
    /// Report a failure carrying the child's last response text
    ReportPartial,
    /// Report a failure naming the result tool that was never called
    Error,
}

/// Scheduling and failure policy for one fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Unit selection strategy
    #[serde(default)]
    pub execution_type: ExecutionType,
    /// Max children running at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Aggregation strategy
    #[serde(default)]
    pub result_strategy: ResultStrategy,
    /// Array argument to iterate for `list_based`
    #[serde(default)]
    pub list_parameter_name: Option<String>,
    /// Static entries for `external_list`
    #[serde(default)]
    pub external_list: Vec<String>,
    /// Unit name used for `external_list` entries
    #[serde(default = "default_external_list_label")]
    pub external_list_label: String,
    /// Parameters that never spawn a unit under `parameter_based`
    #[serde(default)]
    pub excluded_parameters: Vec<String>,
    /// Per-child deadline
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Fan-out is refused once the calling session is this deep
    #[serde(default = "default_max_recursion_level")]
    pub max_recursion_level: u32,
    /// Disposition of children that never report
    #[serde(default)]
    pub dangling_behavior: DanglingBehavior,
    /// When to send the reminder (defaults to half the session timeout)
    #[serde(default)]
    pub reminder_after_ms: Option<u64>,
    /// How long in-flight children get to acknowledge cancellation
    #[serde(default = "default_cancellation_grace_ms")]
    pub cancellation_grace_ms: u64,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_external_list_label() -> String {
    "item".to_string()
}

fn default_session_timeout_ms() -> u64 {
    DEFAULT_SESSION_TIMEOUT_MS
}

fn default_max_recursion_level() -> u32 {
    DEFAULT_MAX_RECURSION_LEVEL
}

fn default_cancellation_grace_ms() -> u64 {
    2_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            execution_type: ExecutionType::default(),
            max_concurrency: default_max_concurrency(),
            result_strategy: ResultStrategy::default(),
            list_parameter_name: None,
            external_list: Vec::new(),
            external_list_label: default_external_list_label(),
            excluded_parameters: Vec::new(),
            session_timeout_ms: default_session_timeout_ms(),
            max_recursion_level: default_max_recursion_level(),
            dangling_behavior: DanglingBehavior::default(),
            reminder_after_ms: None,
            cancellation_grace_ms: default_cancellation_grace_ms(),
        }
    }
}

impl ExecutionConfig {
    /// Per-child deadline as a [`Duration`]
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Delay before the reminder message, never past the deadline
    #[must_use]
    pub fn reminder_after(&self) -> Duration {
        let ms = self
            .reminder_after_ms
            .unwrap_or(self.session_timeout_ms / 2)
            .min(self.session_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Grace window for in-flight children after cancellation
    #[must_use]
    pub fn cancellation_grace(&self) -> Duration {
        Duration::from_millis(self.cancellation_grace_ms)
    }
}

/// Name, description and parameters of a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name
    pub name: String,
    /// Description shown to the LLM
    #[serde(default)]
    pub description: String,
    /// Declared parameters, in order
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl ToolSpec {
    /// Build the registry definition for this tool
    #[must_use]
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.name, &self.description).with_parameter_specs(&self.parameters)
    }

    /// Look up a declared parameter by name
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

fn default_result_tool() -> ToolSpec {
    ToolSpec {
        name: DEFAULT_RESULT_TOOL_NAME.to_string(),
        description: "Report the outcome of your task. Call this exactly once, when you \
                      are done."
            .to_string(),
        parameters: vec![ParameterSpec::new("result", ParameterType::String)
            .with_description("The result of the task")
            .required()],
    }
}

/// Prompt templates for child sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// First message sent to every child
    pub template: String,
    /// Sent once when a child has not reported by the reminder time
    #[serde(default)]
    pub reminder_template: Option<String>,
}

/// Complete fan-out definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// The fan-out tool exposed to the parent session
    pub tool: ToolSpec,
    /// Scheduling and failure policy
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Child prompt templates
    pub prompt: PromptConfig,
    /// Result tool installed into every child
    #[serde(default = "default_result_tool")]
    pub result_tool: ToolSpec,
}

impl FanoutConfig {
    /// Parse and validate a JSON fan-out definition.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::Configuration(format!("invalid fan-out definition: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON fan-out definition from disk.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Check structural invariants.
    ///
    /// Runtime checks that depend on the request arguments (for example
    /// whether the list argument really holds an array) happen during unit
    /// selection.
    pub fn validate(&self) -> Result<()> {
        if self.tool.name.trim().is_empty() {
            return Err(Error::Configuration("tool.name must not be empty".into()));
        }
        if self.result_tool.name.trim().is_empty() {
            return Err(Error::Configuration(
                "result_tool.name must not be empty".into(),
            ));
        }
        if self.result_tool.name == self.tool.name {
            return Err(Error::Configuration(format!(
                "result_tool.name must differ from tool.name ('{}')",
                self.tool.name
            )));
        }
        if self.prompt.template.trim().is_empty() {
            return Err(Error::Configuration(
                "prompt.template must not be empty".into(),
            ));
        }

        check_unique("tool.parameters", &self.tool.parameters)?;
        check_unique("result_tool.parameters", &self.result_tool.parameters)?;

        let exec = &self.execution;
        if exec.max_concurrency == 0 {
            return Err(Error::Configuration(
                "execution.max_concurrency must be at least 1".into(),
            ));
        }
        if exec.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(Error::Configuration(format!(
                "execution.max_concurrency must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if exec.session_timeout_ms == 0 {
            return Err(Error::Configuration(
                "execution.session_timeout_ms must be greater than zero".into(),
            ));
        }
        if exec.max_recursion_level == 0 {
            return Err(Error::Configuration(
                "execution.max_recursion_level must be at least 1".into(),
            ));
        }

        match exec.execution_type {
            ExecutionType::ListBased => self.validate_list_parameter()?,
            ExecutionType::ExternalList => {
                if exec.external_list.is_empty() {
                    return Err(Error::Configuration(
                        "execution.external_list must not be empty for external_list execution"
                            .into(),
                    ));
                }
            }
            ExecutionType::ParameterBased => {
                if !self.tool.parameters.is_empty()
                    && self
                        .tool
                        .parameters
                        .iter()
                        .all(|p| exec.excluded_parameters.contains(&p.name))
                {
                    return Err(Error::Configuration(
                        "every declared parameter is excluded; parameter_based execution \
                         would spawn no sessions"
                            .into(),
                    ));
                }
            }
            ExecutionType::None => {}
        }

        Ok(())
    }

    fn validate_list_parameter(&self) -> Result<()> {
        match self.execution.list_parameter_name.as_deref() {
            Some(name) => {
                if self.tool.parameters.is_empty() {
                    // Undeclared schema: the argument is checked at selection time.
                    return Ok(());
                }
                let param = self.tool.parameter(name).ok_or_else(|| {
                    Error::Configuration(format!(
                        "list_parameter_name '{name}' does not match a declared parameter"
                    ))
                })?;
                if is_list_parameter(param) {
                    Ok(())
                } else {
                    Err(Error::Configuration(format!(
                        "list parameter '{name}' must be declared as an array"
                    )))
                }
            }
            None => {
                if self.detect_list_parameter().is_some() {
                    Ok(())
                } else {
                    Err(Error::Configuration(
                        "list_based execution requires list_parameter_name or a declared \
                         array parameter"
                            .into(),
                    ))
                }
            }
        }
    }

    /// Resolve the list parameter for `list_based` execution.
    ///
    /// An explicit `list_parameter_name` wins. Otherwise the first declared
    /// array parameter is used, then the first parameter whose name contains
    /// "list" regardless of its declared type.
    #[must_use]
    pub fn detect_list_parameter(&self) -> Option<&str> {
        if let Some(name) = self.execution.list_parameter_name.as_deref() {
            return Some(name);
        }
        let params = &self.tool.parameters;
        params
            .iter()
            .find(|p| p.param_type == ParameterType::Array)
            .or_else(|| params.iter().find(|p| is_list_parameter(p)))
            .map(|p| p.name.as_str())
    }
}

// Matches on name as well as type: a `file_list` declared as a string qualifies.
fn is_list_parameter(param: &ParameterSpec) -> bool {
    param.param_type == ParameterType::Array || param.name.to_lowercase().contains("list")
}

fn check_unique(field: &str, params: &[ParameterSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for param in params {
        if param.name.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "{field} contains a parameter with an empty name"
            )));
        }
        if !seen.insert(param.name.as_str()) {
            return Err(Error::Configuration(format!(
                "{field} declares '{}' more than once",
                param.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> serde_json::Value {
        json!({
            "tool": {
                "name": "review_files",
                "description": "Review each file in parallel",
                "parameters": [
                    {"name": "files", "type": "array", "required": true},
                    {"name": "focus", "type": "string"}
                ]
            },
            "execution": {
                "execution_type": "list_based",
                "list_parameter_name": "files",
                "max_concurrency": 2
            },
            "prompt": {"template": "Review {{_Parameter.Value}} focusing on {{focus}}"}
        })
    }

    fn parse(value: serde_json::Value) -> Result<FanoutConfig> {
        FanoutConfig::from_json_str(&value.to_string())
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse(base()).unwrap();
        assert_eq!(config.execution.max_concurrency, 2);
        assert_eq!(config.execution.result_strategy, ResultStrategy::WaitForAll);
        assert_eq!(config.execution.max_recursion_level, DEFAULT_MAX_RECURSION_LEVEL);
        assert_eq!(config.execution.dangling_behavior, DanglingBehavior::Fail);
        assert_eq!(config.result_tool.name, DEFAULT_RESULT_TOOL_NAME);
        assert!(config.result_tool.parameters[0].required);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut raw = base();
        raw["execution"]["max_concurrency"] = json!(0);
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn test_concurrency_above_permit_limit_rejected() {
        let mut raw = base();
        raw["execution"]["max_concurrency"] = json!(u64::MAX);
        let err = parse(raw).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("must not exceed"));

        let mut raw = base();
        raw["execution"]["max_concurrency"] = json!(Semaphore::MAX_PERMITS);
        assert!(parse(raw).is_ok());
    }

    #[test]
    fn test_list_parameter_must_exist() {
        let mut raw = base();
        raw["execution"]["list_parameter_name"] = json!("paths");
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("does not match a declared parameter"));
    }

    #[test]
    fn test_list_parameter_must_be_array() {
        let mut raw = base();
        raw["execution"]["list_parameter_name"] = json!("focus");
        assert!(parse(raw).is_err());
    }

    #[test]
    fn test_lenient_list_detection_by_name() {
        let mut raw = base();
        raw["tool"]["parameters"] = json!([
            {"name": "task_list", "type": "string"},
            {"name": "focus", "type": "string"}
        ]);
        raw["execution"]["list_parameter_name"] = json!(null);
        let config = parse(raw).unwrap();
        assert_eq!(config.detect_list_parameter(), Some("task_list"));
    }

    #[test]
    fn test_array_parameter_preferred_over_name_match() {
        let mut raw = base();
        raw["tool"]["parameters"] = json!([
            {"name": "shopping_list", "type": "string"},
            {"name": "targets", "type": "array"}
        ]);
        raw["execution"]["list_parameter_name"] = json!(null);
        let config = parse(raw).unwrap();
        assert_eq!(config.detect_list_parameter(), Some("targets"));
    }

    #[test]
    fn test_external_list_requires_entries() {
        let mut raw = base();
        raw["execution"] = json!({"execution_type": "external_list"});
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("external_list must not be empty"));
    }

    #[test]
    fn test_all_parameters_excluded() {
        let mut raw = base();
        raw["execution"] = json!({
            "execution_type": "parameter_based",
            "excluded_parameters": ["files", "focus"]
        });
        assert!(parse(raw).is_err());
    }

    #[test]
    fn test_duplicate_result_parameters() {
        let mut raw = base();
        raw["result_tool"] = json!({
            "name": "report",
            "parameters": [
                {"name": "a", "type": "string"},
                {"name": "a", "type": "number"}
            ]
        });
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_tool_names_must_differ() {
        let mut raw = base();
        raw["result_tool"] = json!({"name": "review_files"});
        assert!(parse(raw).is_err());
    }

    #[test]
    fn test_reminder_defaults_to_half_timeout() {
        let exec = ExecutionConfig {
            session_timeout_ms: 1_000,
            ..Default::default()
        };
        assert_eq!(exec.reminder_after(), Duration::from_millis(500));

        let late = ExecutionConfig {
            session_timeout_ms: 1_000,
            reminder_after_ms: Some(5_000),
            ..Default::default()
        };
        assert_eq!(late.reminder_after(), Duration::from_millis(1_000));
    }

    #[test]
    fn test_tool_definition() {
        let config = parse(base()).unwrap();
        let def = config.tool.to_definition();
        assert_eq!(def.name, "review_files");
        assert_eq!(def.parameters["properties"]["files"]["type"], "array");
    }
}
