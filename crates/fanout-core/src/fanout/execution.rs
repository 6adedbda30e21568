use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::recursion::RecursionGuard;
use super::runner::{ChildSessionRunner, UnitRequest};
use super::types::{ChildSessionResult, Disposition, ExecutionUnit, FanoutReport, UnitOutcome};
use super::FanoutCoordinator;
use crate::config::ResultStrategy;
use crate::error::{Error, Result};
use crate::event_bus::FanoutEvent;
use crate::host::SessionId;

impl FanoutCoordinator {
    /// Fan `args` out into child sessions under `parent` and aggregate their
    /// results.
    ///
    /// Configuration and recursion problems are returned before any child is
    /// started. Per-unit failures are part of the report. Cancelling
    /// `cancel` ends the fan-out with [`Error::Cancelled`].
    pub async fn execute(
        &self,
        parent: &SessionId,
        args: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<FanoutReport> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let start = Instant::now();
        let units = self.plan(&args)?;
        let recursion = RecursionGuard::new(Arc::clone(&self.host))
            .gate(parent, self.config.execution.max_recursion_level)
            .await?;

        let execution_id = Uuid::new_v4();
        let strategy = self.config.execution.result_strategy;
        let unit_count = units.len();

        info!(
            %execution_id,
            tool = %self.config.tool.name,
            parent = %parent,
            units = unit_count,
            depth = recursion.depth,
            strategy = ?strategy,
            max_concurrency = self.config.execution.max_concurrency,
            "Starting fan-out"
        );
        self.events.publish(FanoutEvent::FanoutStarted {
            execution_id,
            unit_count,
            started_at: chrono::Utc::now(),
        });

        let fanout_token = cancel.child_token();
        let permits = self.config.execution.max_concurrency.min(unit_count);
        let semaphore = Arc::new(Semaphore::new(permits));
        let runner = ChildSessionRunner::new(
            Arc::clone(&self.host),
            Arc::clone(&self.renderer),
            Arc::clone(&self.config),
            self.extra_tools.clone(),
            self.events.clone(),
        );
        let shared = Arc::new(args);

        // Units whose outcome has not been collected yet
        let mut pending = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for (index, unit) in units.into_iter().enumerate() {
            pending.insert(index, unit.clone());
            let request = UnitRequest {
                execution_id,
                index,
                unit,
                parent: parent.clone(),
                shared: Arc::clone(&shared),
            };
            let runner = runner.clone();
            let semaphore = Arc::clone(&semaphore);
            let token = fanout_token.clone();

            tasks.spawn(async move {
                // The permit lives until the runner has closed its session.
                let _permit = tokio::select! {
                    biased;
                    () = token.cancelled() => return not_started(request),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return not_started(request),
                    },
                };

                let started = OnceLock::new();
                let begun = Instant::now();
                let fallback = request.clone();
                match AssertUnwindSafe(runner.run_tracked(request, token, &started))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => runner.recover_panic(fallback, &started, begun).await,
                }
            });
        }

        let mut outcomes = Vec::with_capacity(unit_count);
        let mut winner = None;
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }

                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(%execution_id, error = %e, "Child task ended without an outcome");
                            continue;
                        }
                    };
                    pending.remove(&outcome.index);

                    debug!(
                        %execution_id,
                        index = outcome.index,
                        success = outcome.is_success(),
                        "Unit finished"
                    );

                    if strategy == ResultStrategy::WaitForAny && outcome.is_success() {
                        winner = Some(outcome);
                        break;
                    }
                    outcomes.push(outcome);
                }
            }
        }

        if cancelled {
            return Err(self.abandon(execution_id, tasks).await);
        }

        let (success, outcomes) = match winner {
            Some(winner) => {
                // Stragglers see the token, close their sessions and drop
                // their permits on their own.
                fanout_token.cancel();
                let stragglers = tasks.len();
                tasks.detach_all();
                debug!(%execution_id, stragglers, "Winner found, remaining units detached");
                (true, vec![winner])
            }
            None => {
                outcomes.extend(pending.into_iter().map(|(index, unit)| lost(index, unit)));
                outcomes.sort_by_key(|o| o.index);
                let success = !outcomes.is_empty() && outcomes.iter().all(UnitOutcome::is_success);
                (success, outcomes)
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            %execution_id,
            success,
            reported = outcomes.len(),
            duration_ms,
            "Fan-out completed"
        );
        self.events.publish(FanoutEvent::FanoutCompleted {
            execution_id,
            success,
            duration_ms,
        });

        Ok(FanoutReport {
            execution_id,
            strategy,
            success,
            outcomes,
            duration_ms,
        })
    }

    /// Give in-flight children the grace window, then detach the rest.
    async fn abandon(&self, execution_id: Uuid, mut tasks: JoinSet<UnitOutcome>) -> Error {
        let grace = self.config.execution.cancellation_grace();
        warn!(%execution_id, in_flight = tasks.len(), grace_ms = grace.as_millis() as u64, "Fan-out cancelled");

        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(%execution_id, abandoned = tasks.len(), "Grace window elapsed, detaching children");
            tasks.detach_all();
        }

        self.events.publish(FanoutEvent::FanoutCancelled { execution_id });
        Error::Cancelled
    }
}

fn not_started(request: UnitRequest) -> UnitOutcome {
    UnitOutcome {
        index: request.index,
        unit: request.unit,
        session_id: None,
        result: ChildSessionResult::failure("cancelled before a slot became free"),
        disposition: Disposition::Cancelled,
        duration_ms: 0,
    }
}

/// Outcome for a unit whose task ended without returning one
fn lost(index: usize, unit: ExecutionUnit) -> UnitOutcome {
    UnitOutcome {
        index,
        unit,
        session_id: None,
        result: ChildSessionResult::failure("child task ended without producing an outcome"),
        disposition: Disposition::Faulted,
        duration_ms: 0,
    }
}
