use async_trait::async_trait;
use fanout_tools::{Result, Tool, ToolDefinition, ToolResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::FanoutCoordinator;
use crate::config::ResultStrategy;
use crate::host::SessionId;

/// The fan-out operation as a tool callable from a parent session.
///
/// Success returns the aggregated JSON payload; anything that prevents an
/// answer (misconfiguration, recursion limit, cancellation, every unit
/// failing under `wait_for_any`) comes back as a plain-text failure the LLM
/// can read.
pub struct FanoutTool {
    definition: ToolDefinition,
    coordinator: Arc<FanoutCoordinator>,
    parent: SessionId,
    cancel: CancellationToken,
}

impl FanoutTool {
    /// Bind `coordinator` to the session the tool is installed in
    pub fn new(
        coordinator: Arc<FanoutCoordinator>,
        parent: SessionId,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            definition: coordinator.config().tool.to_definition(),
            coordinator,
            parent,
            cancel,
        }
    }
}

#[async_trait]
impl Tool for FanoutTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        let start = Instant::now();
        let args = match input {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        let report = match self.coordinator.execute(&self.parent, args, &self.cancel).await {
            Ok(report) => report,
            Err(e) => {
                warn!(tool = %self.definition.name, error = %e, "Fan-out did not complete");
                return Ok(ToolResult::failure(
                    e.tool_message(),
                    start.elapsed().as_millis() as u64,
                ));
            }
        };

        let elapsed = start.elapsed().as_millis() as u64;
        if report.strategy == ResultStrategy::WaitForAny && !report.success {
            return Ok(ToolResult::failure(report.combined_error(), elapsed));
        }
        Ok(ToolResult::success(report.to_payload(), elapsed))
    }
}
