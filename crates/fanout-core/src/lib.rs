//! Fanout Core - Parallel Sub-Session Orchestration
//!
//! This crate turns one tool invocation into many concurrently running child
//! sessions and gathers their structured results:
//! - Config: fan-out definitions loaded from JSON and validated up front
//! - Fanout: unit selection, recursion guard, result capture, child session
//!   runner and the coordinator tying them together
//! - Host: the session operations the embedding application provides
//! - Render: prompt templates with `{{placeholder}}` substitution
//! - Event bus: progress events for UIs and logs

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event_bus;
pub mod fanout;
pub mod host;
pub mod render;

pub use config::{
    DanglingBehavior, ExecutionConfig, ExecutionType, FanoutConfig, PromptConfig, ResultStrategy,
    ToolSpec,
};
pub use error::{Error, Result};
pub use event_bus::{EventBus, FanoutEvent};
pub use fanout::{
    ChildSessionResult, Disposition, ExecutionUnit, FanoutCoordinator, FanoutReport, FanoutTool,
    RecursionContext, RecursionGuard, ResultCapture, UnitOutcome, UnitSelector,
};
pub use host::{SessionHost, SessionId};
pub use render::{PlaceholderRenderer, TemplateRenderer};
