//! Session host collaborator
//!
//! The engine never talks to an LLM directly. Starting a child session,
//! installing its tools, sending it messages and walking the parent chain all
//! go through a [`SessionHost`] supplied by the embedding application.

use async_trait::async_trait;
use fanout_tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque session identifier assigned by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a session id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Host-side session operations used by the fan-out engine.
///
/// Implementations are expected to return quickly; long-running LLM work
/// happens inside the child session, not inside these calls.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Start a child session under `parent` and return its id
    async fn start_session(&self, parent: &SessionId) -> anyhow::Result<SessionId>;

    /// Make `tools` callable from inside `session`.
    ///
    /// Called before the first message is sent; the session must be able to
    /// call every tool in the registry once this returns.
    async fn install_tools(&self, session: &SessionId, tools: ToolRegistry) -> anyhow::Result<()>;

    /// Send a user message into `session`
    async fn send_message(&self, session: &SessionId, text: &str) -> anyhow::Result<()>;

    /// Parent of `session`, or `None` for a root session
    async fn parent_id(&self, session: &SessionId) -> anyhow::Result<Option<SessionId>>;

    /// Tear down `session`. Called once per child after its outcome is known.
    async fn close_session(&self, _session: &SessionId) -> anyhow::Result<()> {
        Ok(())
    }

    /// Last assistant text produced by `session`, if the host tracks it
    async fn last_response(&self, _session: &SessionId) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}
