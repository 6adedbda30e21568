use std::sync::Arc;
use tracing::{debug, warn};

use super::types::RecursionContext;
use crate::error::{Error, Result};
use crate::host::{SessionHost, SessionId};

/// Longest parent chain walked before giving up; bounds cyclic chains
pub(crate) const MAX_PARENT_WALK: u32 = 64;

/// Measures session nesting and refuses fan-out past the configured maximum
pub struct RecursionGuard {
    host: Arc<dyn SessionHost>,
}

impl RecursionGuard {
    /// Create a guard walking parent chains through `host`
    pub fn new(host: Arc<dyn SessionHost>) -> Self {
        Self { host }
    }

    /// Number of ancestors between `session` and the root.
    ///
    /// A lookup error anywhere along the chain yields depth 0.
    pub async fn current_depth(&self, session: &SessionId) -> u32 {
        let mut depth = 0;
        let mut current = session.clone();

        while depth < MAX_PARENT_WALK {
            match self.host.parent_id(&current).await {
                Ok(Some(parent)) => {
                    depth += 1;
                    current = parent;
                }
                Ok(None) => return depth,
                Err(e) => {
                    // TODO: decide whether a broken parent chain should refuse the fan-out
                    warn!(
                        session_id = %session,
                        at = %current,
                        error = %e,
                        "Parent lookup failed, treating session as root"
                    );
                    return 0;
                }
            }
        }

        warn!(session_id = %session, limit = MAX_PARENT_WALK, "Parent chain walk hit its limit");
        depth
    }

    /// Refuse with one aggregate error when `depth >= max`
    pub fn check_allowed(depth: u32, max: u32) -> Result<RecursionContext> {
        if depth >= max {
            return Err(Error::RecursionLimit { depth, max });
        }
        Ok(RecursionContext {
            depth,
            max_allowed: max,
        })
    }

    /// Measure `session` and check it against `max`
    pub async fn gate(&self, session: &SessionId, max: u32) -> Result<RecursionContext> {
        let depth = self.current_depth(session).await;
        debug!(session_id = %session, depth, max, "Recursion depth measured");
        Self::check_allowed(depth, max)
    }
}
