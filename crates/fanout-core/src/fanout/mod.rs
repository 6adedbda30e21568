//! Fan-out coordination
//!
//! One fan-out tool invocation turns into many concurrently running child
//! sessions:
//!
//! - [`UnitSelector`] splits the request into execution units
//! - [`RecursionGuard`] refuses nesting past the configured maximum
//! - [`ChildSessionRunner`] drives one child session per unit
//! - [`ResultCapture`] is the result tool each child reports through
//! - [`FanoutCoordinator`] bounds concurrency and aggregates results
//! - [`FanoutTool`] exposes the coordinator to a parent session

use fanout_tools::Tool;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

mod capture;
mod execution;
mod recursion;
mod runner;
mod strategy;
mod tool;
mod types;


pub use capture::{CaptureStatus, CapturedResult, ResultCapture, MAX_VALIDATION_ATTEMPTS};
pub use recursion::RecursionGuard;
pub use runner::{ChildSessionRunner, UnitRequest};
pub use strategy::UnitSelector;
pub use tool::FanoutTool;
pub use types::{
    ChildSessionResult, Disposition, ExecutionUnit, FanoutReport, RecursionContext, UnitOutcome,
    PARAMETER_CONTEXT_KEY,
};

use crate::config::FanoutConfig;
use crate::error::Result;
use crate::event_bus::EventBus;
use crate::host::SessionHost;
use crate::render::{PlaceholderRenderer, TemplateRenderer};

/// Fan-out coordinator
///
/// Owns one fan-out definition and everything needed to run it:
/// - the session host children are started through
/// - the prompt renderer
/// - extra tools installed next to the result tool
/// - the event bus progress is published on
pub struct FanoutCoordinator {
    /// Fan-out definition
    config: Arc<FanoutConfig>,
    /// Session host
    host: Arc<dyn SessionHost>,
    /// Prompt renderer
    renderer: Arc<dyn TemplateRenderer>,
    /// Tools installed into every child besides the result tool
    extra_tools: Vec<Arc<dyn Tool>>,
    /// Progress events
    events: EventBus,
}

impl FanoutCoordinator {
    /// Create a coordinator with the placeholder renderer and a fresh event bus
    pub fn new(config: FanoutConfig, host: Arc<dyn SessionHost>) -> Self {
        Self {
            config: Arc::new(config),
            host,
            renderer: Arc::new(PlaceholderRenderer::new()),
            extra_tools: Vec::new(),
            events: EventBus::default(),
        }
    }

    /// Use a different prompt renderer
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Publish progress on `events`
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Install `tool` into every child session
    #[must_use]
    pub fn with_extra_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        info!(tool = %tool.definition().name, "Registering extra child tool");
        self.extra_tools.push(tool);
        self
    }

    /// Fan-out definition
    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// Event bus progress is published on
    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Validate the definition and select the units `args` would fan out to,
    /// without starting anything.
    pub fn plan(&self, args: &Map<String, Value>) -> Result<Vec<ExecutionUnit>> {
        self.config.validate()?;
        UnitSelector::new(&self.config).select(args)
    }
}
