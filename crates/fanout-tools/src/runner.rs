//! Runner - Tool dispatch for session hosts
//!
//! A host receives a [`ToolRegistry`] per session and needs to turn an LLM
//! tool call into a reply string. [`ToolRunner::dispatch`] does exactly that:
//! look the tool up, check the input, run it under a timeout and render the
//! outcome as plain text.

use crate::error::{Error, Result};
use crate::registry::{ToolRegistry, ToolResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Default per-call timeout
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Tool runner dispatching calls against one registry
#[derive(Clone)]
pub struct ToolRunner {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolRunner {
    /// Create a runner with a per-call timeout
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Create with [`DEFAULT_TOOL_TIMEOUT`]
    #[must_use]
    pub fn with_defaults(registry: Arc<ToolRegistry>) -> Self {
        Self::new(registry, DEFAULT_TOOL_TIMEOUT)
    }

    /// Execute a tool and render the reply as plain text.
    ///
    /// Every outcome, including an unknown tool name or a timeout, becomes a
    /// message for the caller.
    #[instrument(skip(self, input), fields(tool = %tool_name))]
    pub async fn dispatch(&self, tool_name: &str, input: serde_json::Value) -> String {
        match self.call(tool_name, input).await {
            Ok(result) => result.to_message(),
            Err(e) => format!("Error: {e}"),
        }
    }

    // Tool-raised errors fold into a failed ToolResult; lookup, input and
    // timeout problems stay as Err.
    async fn call(&self, tool_name: &str, input: serde_json::Value) -> Result<ToolResult> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| Error::NotFound(tool_name.to_string()))?;
        tool.validate_input(&input)?;

        let start = Instant::now();
        debug!(timeout_ms = %self.timeout.as_millis(), "Executing tool");

        let result = match timeout(self.timeout, tool.execute(input)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(error = %e, "Tool execution failed");
                ToolResult::failure(e.to_string(), start.elapsed().as_millis() as u64)
            }
            Err(_) => {
                warn!(timeout_ms = %self.timeout.as_millis(), "Tool execution timed out");
                return Err(Error::Timeout(start.elapsed().as_millis() as u64));
            }
        };

        debug!(success = %result.success, duration_ms = %result.duration_ms, "Tool execution completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Tool, ToolDefinition};
    use tokio_test::assert_err;

    struct SlowTool {
        definition: ToolDefinition,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        async fn execute(&self, input: serde_json::Value) -> Result<ToolResult> {
            tokio::time::sleep(self.delay).await;
            if input.get("fail").is_some() {
                return Err(Error::Validation("Missing required parameter: answer".into()));
            }
            Ok(ToolResult::success(serde_json::json!("done"), 0))
        }
    }

    fn runner_with(delay: Duration, limit: Duration) -> ToolRunner {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool {
            definition: ToolDefinition::new("slow", "Sleeps, then answers"),
            delay,
        }));
        ToolRunner::new(Arc::new(registry), limit)
    }

    #[tokio::test]
    async fn test_dispatch_renders_text() {
        let runner = runner_with(Duration::ZERO, DEFAULT_TOOL_TIMEOUT);
        assert_eq!(runner.dispatch("slow", serde_json::json!({})).await, "done");
        assert_eq!(
            runner.dispatch("nope", serde_json::json!({})).await,
            "Error: tool not found: nope"
        );
    }

    #[tokio::test]
    async fn test_tool_error_becomes_reply() {
        let runner = runner_with(Duration::ZERO, DEFAULT_TOOL_TIMEOUT);
        let reply = runner.dispatch("slow", serde_json::json!({"fail": 1})).await;
        assert_eq!(reply, "Error: Missing required parameter: answer");
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner = runner_with(Duration::from_millis(500), Duration::from_millis(20));
        let err = assert_err!(runner.call("slow", serde_json::json!({})).await);
        assert!(matches!(err, Error::Timeout(_)));
        assert!(runner
            .dispatch("slow", serde_json::json!({}))
            .await
            .starts_with("Error: timeout after"));
    }

    #[tokio::test]
    async fn test_rejects_non_object_input() {
        let runner = runner_with(Duration::ZERO, DEFAULT_TOOL_TIMEOUT);
        let err = assert_err!(runner.call("slow", serde_json::json!("text")).await);
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
