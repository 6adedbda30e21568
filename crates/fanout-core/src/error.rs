//! Error types for fanout-core
//!
//! Errors here end the whole fan-out. Per-unit problems (timeouts, bad
//! result-tool calls, a session that failed to start) never surface as an
//! [`Error`]; they become a failed result for that unit instead.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The fan-out definition or the request cannot be executed as configured
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The calling session is already nested too deeply
    #[error("recursion limit reached: depth {depth} is not below the maximum of {max}")]
    RecursionLimit {
        /// Depth of the calling session
        depth: u32,
        /// Configured maximum recursion level
        max: u32,
    },

    /// The top-level cancellation token fired
    #[error("fan-out cancelled")]
    Cancelled,

    /// The prompt template could not be rendered
    #[error("template error: {0}")]
    Render(String),

    /// Tool layer error
    #[error("tool error: {0}")]
    Tool(#[from] fanout_tools::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Plain-text message returned to the calling LLM through the fan-out tool
    #[must_use]
    pub fn tool_message(&self) -> String {
        match self {
            Error::Configuration(msg) => {
                format!("Fan-out is misconfigured and did not run: {msg}")
            }
            Error::RecursionLimit { depth, max } => format!(
                "Fan-out refused: this session is nested {depth} level(s) deep and the \
                 maximum recursion level is {max}. Complete the task without spawning \
                 further sub-sessions."
            ),
            Error::Cancelled => "Fan-out was cancelled before it completed.".to_string(),
            other => format!("Fan-out failed: {other}"),
        }
    }

    /// Whether the error was raised before any child session could start
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::RecursionLimit { .. })
    }
}
