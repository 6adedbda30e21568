//! Scripted session host shared by the end-to-end fan-out tests.

#![allow(dead_code)]

use async_trait::async_trait;
use fanout_core::{FanoutConfig, SessionHost, SessionId};
use fanout_tools::{ToolRegistry, ToolRunner};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One thing a scripted child does after receiving its prompt
#[derive(Debug, Clone)]
pub enum Step {
    /// Think for a while
    Wait(Duration),
    /// Call a tool installed in the session
    Call(String, Value),
}

/// Call the result tool
pub fn report(args: Value) -> Step {
    Step::Call("return_result".to_string(), args)
}

/// Wait `ms` milliseconds
pub fn wait(ms: u64) -> Step {
    Step::Wait(Duration::from_millis(ms))
}

type Script = dyn Fn(&str) -> Vec<Step> + Send + Sync;

#[derive(Default)]
struct SessionState {
    tools: Option<ToolRegistry>,
    prompts: Vec<String>,
}

/// Session host whose children follow a script chosen from their prompt.
///
/// Tracks how many children are open at once and records every prompt and
/// every tool reply.
pub struct ScriptedHost {
    script: Box<Script>,
    parents: Mutex<HashMap<String, String>>,
    sessions: Mutex<HashMap<String, SessionState>>,
    replies: Arc<Mutex<Vec<(String, String)>>>,
    closed: Mutex<Vec<String>>,
    close_delay: Mutex<Option<Duration>>,
    next_id: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedHost {
    pub fn new(script: impl Fn(&str) -> Vec<Step> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            parents: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            replies: Arc::new(Mutex::new(Vec::new())),
            closed: Mutex::new(Vec::new()),
            close_delay: Mutex::new(None),
            next_id: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    /// Pre-existing ancestry, e.g. `chain(&["lvl2", "lvl1", "root"])`
    pub fn chain(&self, sessions: &[&str]) {
        let mut parents = self.parents.lock().unwrap();
        for pair in sessions.windows(2) {
            parents.insert(pair[0].to_string(), pair[1].to_string());
        }
    }

    /// Make every `close_session` call hang for `delay` first
    pub fn stall_close(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = Some(delay);
    }

    pub fn started(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    /// First prompt of every child, in start order
    pub fn prompts(&self) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap();
        let mut ids: Vec<&String> = sessions.keys().collect();
        ids.sort_by_key(|id| id.trim_start_matches("child-").parse::<usize>().unwrap_or(0));
        ids.into_iter()
            .filter_map(|id| sessions[id].prompts.first().cloned())
            .collect()
    }

    /// Every tool reply text sent back to children
    pub fn replies(&self) -> Vec<String> {
        self.replies
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Tool names installed into `session`
    pub fn installed_tools(&self, session: &str) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(session)
            .and_then(|s| s.tools.as_ref())
            .map(|t| t.list_names().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionHost for ScriptedHost {
    async fn start_session(&self, parent: &SessionId) -> anyhow::Result<SessionId> {
        let id = format!("child-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.parents
            .lock()
            .unwrap()
            .insert(id.clone(), parent.to_string());
        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), SessionState::default());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        Ok(SessionId::new(id))
    }

    async fn install_tools(&self, session: &SessionId, tools: ToolRegistry) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions
            .get_mut(session.as_str())
            .ok_or_else(|| anyhow::anyhow!("unknown session {session}"))?;
        state.tools = Some(tools);
        Ok(())
    }

    async fn send_message(&self, session: &SessionId, text: &str) -> anyhow::Result<()> {
        let tools = {
            let mut sessions = self.sessions.lock().unwrap();
            let state = sessions
                .get_mut(session.as_str())
                .ok_or_else(|| anyhow::anyhow!("unknown session {session}"))?;
            state.prompts.push(text.to_string());
            if state.prompts.len() > 1 {
                return Ok(());
            }
            state.tools.clone().unwrap_or_default()
        };

        let steps = (self.script)(text);
        let runner = ToolRunner::with_defaults(Arc::new(tools));
        let replies = Arc::clone(&self.replies);
        let id = session.to_string();

        tokio::spawn(async move {
            for step in steps {
                match step {
                    Step::Wait(delay) => tokio::time::sleep(delay).await,
                    Step::Call(tool, args) => {
                        let reply = runner.dispatch(&tool, args).await;
                        replies.lock().unwrap().push((id.clone(), reply));
                    }
                }
            }
        });
        Ok(())
    }

    async fn parent_id(&self, session: &SessionId) -> anyhow::Result<Option<SessionId>> {
        Ok(self
            .parents
            .lock()
            .unwrap()
            .get(session.as_str())
            .map(|p| SessionId::new(p.as_str())))
    }

    async fn close_session(&self, session: &SessionId) -> anyhow::Result<()> {
        let delay = *self.close_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.closed.lock().unwrap().push(session.to_string());
        Ok(())
    }
}

/// Parse a fan-out definition, panicking on invalid fixtures
pub fn config(value: Value) -> FanoutConfig {
    FanoutConfig::from_json_str(&value.to_string()).unwrap()
}

/// Arguments object from a JSON literal
pub fn args(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().cloned().unwrap()
}
