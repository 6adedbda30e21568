use fanout_tools::{Tool, ToolRegistry};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::capture::{CapturedResult, ResultCapture};
use super::types::{ChildSessionResult, Disposition, ExecutionUnit, UnitOutcome};
use crate::config::{DanglingBehavior, FanoutConfig};
use crate::event_bus::{EventBus, FanoutEvent};
use crate::host::{SessionHost, SessionId};
use crate::render::TemplateRenderer;

/// One unit to run, as handed over by the coordinator
#[derive(Debug, Clone)]
pub struct UnitRequest {
    /// Fan-out identifier
    pub execution_id: Uuid,
    /// Selection index
    pub index: usize,
    /// The unit
    pub unit: ExecutionUnit,
    /// Session that invoked the fan-out
    pub parent: SessionId,
    /// Request arguments shared by every unit
    pub shared: Arc<Map<String, Value>>,
}

/// Drives one child session from prompt to terminal result.
///
/// The runner never returns an error: every failure mode is folded into the
/// returned [`UnitOutcome`].
#[derive(Clone)]
pub struct ChildSessionRunner {
    host: Arc<dyn SessionHost>,
    renderer: Arc<dyn TemplateRenderer>,
    config: Arc<FanoutConfig>,
    extra_tools: Vec<Arc<dyn Tool>>,
    events: EventBus,
}

impl ChildSessionRunner {
    /// Create a runner
    pub fn new(
        host: Arc<dyn SessionHost>,
        renderer: Arc<dyn TemplateRenderer>,
        config: Arc<FanoutConfig>,
        extra_tools: Vec<Arc<dyn Tool>>,
        events: EventBus,
    ) -> Self {
        Self {
            host,
            renderer,
            config,
            extra_tools,
            events,
        }
    }

    /// Run `request` to completion or until `cancel` fires
    pub async fn run(&self, request: UnitRequest, cancel: CancellationToken) -> UnitOutcome {
        self.run_tracked(request, cancel, &OnceLock::new()).await
    }

    /// Like [`run`](Self::run), recording the child's session id in `started`
    /// as soon as the host assigns it.
    #[instrument(
        skip(self, request, cancel, started),
        fields(execution_id = %request.execution_id, index = request.index, unit = %request.unit.name)
    )]
    pub(crate) async fn run_tracked(
        &self,
        request: UnitRequest,
        cancel: CancellationToken,
        started: &OnceLock<SessionId>,
    ) -> UnitOutcome {
        let start = Instant::now();
        let context = request.unit.template_context(&request.shared);

        let (result, disposition, session) = match self
            .drive(&request, &context, &cancel, started)
            .await
        {
            Ok((result, disposition, session)) => (result, disposition, Some(session)),
            Err((message, session)) => {
                warn!(error = %message, "Child session failed to start");
                (
                    ChildSessionResult::failure(message),
                    Disposition::FailedToStart,
                    session,
                )
            }
        };

        self.finish(request, session, result, disposition, start).await
    }

    /// Outcome for a run that panicked part-way. Closes the session recorded
    /// in `started`, if the host had assigned one.
    pub(crate) async fn recover_panic(
        &self,
        request: UnitRequest,
        started: &OnceLock<SessionId>,
        start: Instant,
    ) -> UnitOutcome {
        let session = started.get().cloned();
        warn!(
            execution_id = %request.execution_id,
            index = request.index,
            session_id = ?session,
            "Child runner panicked"
        );
        self.finish(
            request,
            session,
            ChildSessionResult::failure("child runner panicked"),
            Disposition::Faulted,
            start,
        )
        .await
    }

    async fn finish(
        &self,
        request: UnitRequest,
        session: Option<SessionId>,
        result: ChildSessionResult,
        disposition: Disposition,
        start: Instant,
    ) -> UnitOutcome {
        if let Some(session) = &session {
            if let Err(e) = self.host.close_session(session).await {
                warn!(session_id = %session, error = %e, "Failed to close child session");
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            success = result.success,
            disposition = ?disposition,
            duration_ms,
            "Child session finished"
        );

        self.events.publish(FanoutEvent::UnitCompleted {
            execution_id: request.execution_id,
            index: request.index,
            unit: request.unit.name.clone(),
            success: result.success,
            duration_ms,
        });

        UnitOutcome {
            index: request.index,
            unit: request.unit,
            session_id: session.map(|s| s.0),
            result,
            disposition,
            duration_ms,
        }
    }

    /// Setup and wait. A setup failure is returned as an error message
    /// together with the session, when one was already started.
    async fn drive(
        &self,
        request: &UnitRequest,
        context: &Value,
        cancel: &CancellationToken,
        started: &OnceLock<SessionId>,
    ) -> std::result::Result<(ChildSessionResult, Disposition, SessionId), (String, Option<SessionId>)>
    {
        let prompt = self
            .renderer
            .render(&self.config.prompt.template, context)
            .map_err(|e| (format!("failed to render prompt: {e}"), None))?;

        let session = self
            .host
            .start_session(&request.parent)
            .await
            .map_err(|e| (format!("failed to start child session: {e}"), None))?;

        debug!(session_id = %session, "Child session started");
        let _ = started.set(session.clone());
        self.events.publish(FanoutEvent::UnitStarted {
            execution_id: request.execution_id,
            index: request.index,
            unit: request.unit.name.clone(),
            session_id: session.0.clone(),
        });

        // Tools go in before the first message so the child can report at once.
        let (capture, receiver) = ResultCapture::new(&self.config.result_tool);
        let mut tools = ToolRegistry::new();
        for tool in &self.extra_tools {
            tools.register(Arc::clone(tool));
        }
        tools.register(Arc::new(capture));

        if let Err(e) = self.host.install_tools(&session, tools).await {
            return Err((format!("failed to install tools: {e}"), Some(session)));
        }
        if let Err(e) = self.host.send_message(&session, &prompt).await {
            return Err((format!("failed to send prompt: {e}"), Some(session)));
        }

        let (result, disposition) = self
            .await_result(request, context, &session, receiver, cancel)
            .await;
        Ok((result, disposition, session))
    }

    async fn await_result(
        &self,
        request: &UnitRequest,
        context: &Value,
        session: &SessionId,
        mut receiver: tokio::sync::oneshot::Receiver<CapturedResult>,
        cancel: &CancellationToken,
    ) -> (ChildSessionResult, Disposition) {
        let exec = &self.config.execution;
        let timeout = exec.session_timeout();
        let deadline = tokio::time::Instant::now() + timeout;

        let reminder = tokio::time::sleep(exec.reminder_after());
        tokio::pin!(reminder);
        let mut reminder_pending =
            self.config.prompt.reminder_template.is_some() && exec.reminder_after() < timeout;

        loop {
            tokio::select! {
                biased;

                received = &mut receiver => {
                    return match received {
                        Ok(captured) => (captured.result, captured.disposition),
                        Err(_) => {
                            let reason = "child session ended without reporting a result".to_string();
                            (self.dangling(session, reason).await, Disposition::Closed)
                        }
                    };
                }

                () = cancel.cancelled() => {
                    debug!(session_id = %session, "Child session cancelled");
                    return (
                        ChildSessionResult::failure("cancelled before reporting a result"),
                        Disposition::Cancelled,
                    );
                }

                () = tokio::time::sleep_until(deadline) => {
                    warn!(session_id = %session, timeout_ms = exec.session_timeout_ms, "Child session timed out");
                    let reason = format!(
                        "timed out after {} ms without reporting a result",
                        exec.session_timeout_ms
                    );
                    return (self.dangling(session, reason).await, Disposition::TimedOut);
                }

                () = &mut reminder, if reminder_pending => {
                    reminder_pending = false;
                    self.send_reminder(request, context, session).await;
                }
            }
        }
    }

    async fn send_reminder(&self, request: &UnitRequest, context: &Value, session: &SessionId) {
        let Some(template) = &self.config.prompt.reminder_template else {
            return;
        };

        let text = match self.renderer.render(template, context) {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %session, error = %e, "Failed to render reminder");
                return;
            }
        };

        match self.host.send_message(session, &text).await {
            Ok(()) => {
                debug!(session_id = %session, "Reminder sent");
                self.events.publish(FanoutEvent::ReminderSent {
                    execution_id: request.execution_id,
                    index: request.index,
                });
            }
            Err(e) => warn!(session_id = %session, error = %e, "Failed to send reminder"),
        }
    }

    /// Result for a session that never reported
    async fn dangling(&self, session: &SessionId, reason: String) -> ChildSessionResult {
        match self.config.execution.dangling_behavior {
            DanglingBehavior::Fail => ChildSessionResult::failure(reason),
            DanglingBehavior::ReportPartial => match self.host.last_response(session).await {
                Ok(Some(text)) if !text.is_empty() => ChildSessionResult::partial(text, reason),
                Ok(_) => ChildSessionResult::failure(reason),
                Err(e) => {
                    warn!(session_id = %session, error = %e, "Failed to fetch last response");
                    ChildSessionResult::failure(reason)
                }
            },
            DanglingBehavior::Error => ChildSessionResult::failure(format!(
                "{reason}: the result tool `{}` was never called",
                self.config.result_tool.name
            )),
        }
    }
}
