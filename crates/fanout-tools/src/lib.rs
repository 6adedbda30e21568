//! Fanout Tools - Tool Registry, Schemas and Dispatch
//!
//! This crate provides the tool layer the fan-out engine runs on:
//! - Registry: name-keyed tool table handed to each child session
//! - Schema: typed parameter declarations, JSON schema output and coercion
//! - Runner: dispatch by name under a timeout, rendering plain-text replies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod registry;
pub mod runner;
pub mod schema;

pub use error::{Error, Result};
pub use registry::{Tool, ToolDefinition, ToolRegistry, ToolResult};
pub use runner::{ToolRunner, DEFAULT_TOOL_TIMEOUT};
pub use schema::{ParameterSpec, ParameterType};
