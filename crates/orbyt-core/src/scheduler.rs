// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Workflow scheduling.
//!
//! The runner drives the DAG with a single coordinator task: step tasks
//! execute concurrently (bounded by the enforced concurrency ceiling)
//! and report completion envelopes over a channel; only the coordinator
//! mutates [`ExecutionState`]. A step is dispatched only once its
//! dependency counter reaches zero, so a dependent's resolution
//! snapshot always contains every dependency's output.

use crate::adapter::AdapterRegistry;
use crate::compile::CompiledWorkflow;
use crate::context::InternalExecutionContext;
use crate::error::{ErrorKind, Result};
use crate::events::{EventBus, EventError, RunStatus, WorkflowEvent};
use crate::executor::{StepExecutor, StepOutcome};
use crate::limits::{enforce_timeout_limit, TimeoutLevel};
use crate::state::{ExecutionState, SkipReason, StepFailure, StepStatus};
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Final report of one run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub duration_ms: u64,
    pub successful_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    /// Outputs of succeeded steps.
    pub outputs: HashMap<String, Value>,
    /// Failure records of failed steps.
    pub failures: HashMap<String, StepFailure>,
    /// Workflow-level error when the run did not complete.
    pub error: Option<EventError>,
    pub error_kind: Option<ErrorKind>,
}

impl RunReport {
    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success | RunStatus::Partial => 0,
            RunStatus::Failed => self.error_kind.map(|kind| kind.exit_code()).unwrap_or(4),
        }
    }
}

/// What ended the drive loop.
struct DriveOutcome {
    abort: Option<(ErrorKind, String)>,
}

/// Drives one compiled workflow to completion.
pub struct WorkflowRunner {
    compiled: Arc<CompiledWorkflow>,
    registry: Arc<AdapterRegistry>,
    bus: Arc<EventBus>,
    internal: Arc<InternalExecutionContext>,
    secrets: Arc<HashMap<String, String>>,
    cancellation: CancellationToken,
}

impl WorkflowRunner {
    pub fn new(
        compiled: CompiledWorkflow,
        registry: Arc<AdapterRegistry>,
        bus: Arc<EventBus>,
        internal: InternalExecutionContext,
    ) -> Self {
        Self {
            compiled: Arc::new(compiled),
            registry,
            bus,
            internal: Arc::new(internal),
            secrets: Arc::new(HashMap::new()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Provides the secrets mapping exposed to `${secrets.*}`.
    pub fn with_secrets(mut self, secrets: HashMap<String, String>) -> Self {
        self.secrets = Arc::new(secrets);
        self
    }

    /// External stop signal; cancelling it aborts the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Executes the workflow and returns the final report.
    pub async fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        let plan = &self.compiled.plan;
        let state = Arc::new(ExecutionState::new(
            self.internal.identity.run_id.clone(),
            plan.name.clone(),
            &plan.steps,
            &self.compiled.dag,
        ));

        info!(
            workflow = %plan.name,
            run_id = %state.run_id,
            total_steps = plan.steps.len(),
            dry_run = self.internal.runtime.dry_run,
            "Starting workflow run"
        );
        self.bus.emit(&WorkflowEvent::WorkflowStarted {
            workflow_name: plan.name.clone(),
            total_steps: plan.steps.len(),
            timestamp: Utc::now(),
        });

        let deadline_ms =
            enforce_timeout_limit(plan.timeout_ms, &self.internal.limits, TimeoutLevel::Workflow)
                .value;
        let workflow_cancel = self.cancellation.child_token();

        let drive = self.drive(state.clone(), workflow_cancel.clone());
        tokio::pin!(drive);

        let outcome = tokio::select! {
            outcome = &mut drive => outcome,
            _ = tokio::time::sleep(Duration::from_millis(deadline_ms)) => {
                warn!(workflow = %plan.name, deadline_ms, "Workflow timed out");
                self.bus.emit(&WorkflowEvent::WorkflowFailed {
                    workflow_name: plan.name.clone(),
                    error: EventError {
                        message: format!("workflow exceeded its {deadline_ms}ms timeout"),
                        code: Some(ErrorKind::WorkflowTimeout.as_str().to_string()),
                    },
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                });
                workflow_cancel.cancel();
                // Let running steps observe cancellation and settle.
                let _ = (&mut drive).await;
                return Ok(self.report(
                    &state,
                    started,
                    RunStatus::Failed,
                    Some((
                        ErrorKind::WorkflowTimeout,
                        format!("workflow exceeded its {deadline_ms}ms timeout"),
                    )),
                ));
            }
        };

        let duration = started.elapsed().as_millis() as u64;
        let (successful, failed, skipped) = state.counts();

        match outcome.abort {
            Some((kind, message)) => {
                self.bus.emit(&WorkflowEvent::WorkflowFailed {
                    workflow_name: plan.name.clone(),
                    error: EventError {
                        message: message.clone(),
                        code: Some(kind.as_str().to_string()),
                    },
                    duration_ms: duration,
                    timestamp: Utc::now(),
                });
                Ok(self.report(&state, started, RunStatus::Failed, Some((kind, message))))
            }
            None => {
                let status = if failed > 0 {
                    RunStatus::Partial
                } else {
                    RunStatus::Success
                };
                info!(
                    workflow = %plan.name,
                    ?status,
                    successful,
                    failed,
                    skipped,
                    duration_ms = duration,
                    "Workflow run finished"
                );
                self.bus.emit(&WorkflowEvent::WorkflowCompleted {
                    workflow_name: plan.name.clone(),
                    status,
                    duration_ms: duration,
                    successful_steps: successful,
                    failed_steps: failed,
                    skipped_steps: skipped,
                    timestamp: Utc::now(),
                });
                Ok(self.report(&state, started, status, None))
            }
        }
    }

    /// Coordinator loop: dispatches ready steps up to the concurrency
    /// ceiling and applies completion envelopes.
    async fn drive(
        &self,
        state: Arc<ExecutionState>,
        workflow_cancel: CancellationToken,
    ) -> DriveOutcome {
        let plan = &self.compiled.plan;
        let concurrency = self.internal.runtime.concurrency.max(1);
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, StepOutcome)>();

        let mut ready: VecDeque<String> = VecDeque::new();
        for id in self.compiled.dag.entry_points() {
            if state.transition(id, StepStatus::Ready).is_ok() {
                ready.push_back(id.to_string());
            }
        }

        let mut running = 0usize;
        let mut abort: Option<(ErrorKind, String)> = None;
        // Downstream cone of the failure that triggered the abort, for
        // skip-reason attribution.
        let mut failed_cone: HashSet<String> = HashSet::new();

        loop {
            while running < concurrency && !state.is_aborting() {
                let Some(id) = ready.pop_front() else { break };
                let Some(step) = self.compiled.step(&id).cloned() else {
                    // Defensive: the plan and DAG are built together.
                    abort.get_or_insert((
                        ErrorKind::InternalError,
                        format!("ready step `{id}` is not in the plan"),
                    ));
                    state.set_aborting();
                    break;
                };
                if let Err(reason) = state.transition(&id, StepStatus::Running) {
                    abort.get_or_insert((ErrorKind::InternalError, reason));
                    state.set_aborting();
                    break;
                }
                debug!(step_id = %id, "Dispatching step");
                let executor = StepExecutor {
                    registry: self.registry.clone(),
                    bus: self.bus.clone(),
                    internal: self.internal.clone(),
                    compiled: self.compiled.clone(),
                    state: state.clone(),
                    secrets: self.secrets.clone(),
                    cancellation: workflow_cancel.clone(),
                    dry_run: self.internal.runtime.dry_run,
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let outcome = executor.execute(&step).await;
                    let _ = tx.send((step.id.clone(), outcome));
                });
                running += 1;
            }

            if running == 0 {
                break;
            }

            let Some((id, outcome)) = rx.recv().await else { break };
            running -= 1;
            self.apply_outcome(
                &state,
                &workflow_cancel,
                &mut ready,
                &mut abort,
                &mut failed_cone,
                &id,
                outcome,
            );
        }

        // Steps that never started: mark them skipped so every step is
        // terminal in the report.
        if state.is_aborting() {
            let mut never_started: Vec<&str> = plan
                .steps
                .iter()
                .map(|s| s.id.as_str())
                .filter(|id| {
                    matches!(
                        state.status(id),
                        Some(StepStatus::Pending) | Some(StepStatus::Ready)
                    )
                })
                .collect();
            never_started.sort_unstable();
            for id in never_started {
                let reason = if failed_cone.contains(id) {
                    SkipReason::UpstreamFailed
                } else {
                    SkipReason::UpstreamCancelled
                };
                if state.mark_skipped(id, reason).is_ok() {
                    let step_name = self
                        .compiled
                        .step(id)
                        .map(|s| s.display_name().to_string())
                        .unwrap_or_else(|| id.to_string());
                    self.bus.emit(&WorkflowEvent::StepSkipped {
                        step_id: id.to_string(),
                        step_name,
                        reason,
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        DriveOutcome { abort }
    }

    /// Applies one completion envelope under the coordinator.
    #[allow(clippy::too_many_arguments)]
    fn apply_outcome(
        &self,
        state: &Arc<ExecutionState>,
        workflow_cancel: &CancellationToken,
        ready: &mut VecDeque<String>,
        abort: &mut Option<(ErrorKind, String)>,
        failed_cone: &mut HashSet<String>,
        id: &str,
        outcome: StepOutcome,
    ) {
        match outcome {
            StepOutcome::Succeeded {
                output, attempts, ..
            } => {
                state.record_attempt(id, attempts);
                if let Err(reason) = state.mark_succeeded(id, output) {
                    abort.get_or_insert((ErrorKind::InternalError, reason));
                    state.set_aborting();
                    return;
                }
                self.release_dependents(state, ready, id);
            }
            StepOutcome::SkippedCondition => {
                if let Err(reason) = state.mark_skipped(id, SkipReason::ConditionFalse) {
                    abort.get_or_insert((ErrorKind::InternalError, reason));
                    state.set_aborting();
                    return;
                }
                // A condition-skip satisfies dependents; its output slot
                // stays null.
                self.release_dependents(state, ready, id);
            }
            StepOutcome::Failed {
                failure, attempts, ..
            } => {
                state.record_attempt(id, attempts);
                let kind = failure.kind;
                let message = failure.message.clone();
                if let Err(reason) = state.mark_failed(id, failure) {
                    abort.get_or_insert((ErrorKind::InternalError, reason));
                    state.set_aborting();
                    return;
                }
                let step_absorbs = self
                    .compiled
                    .step(id)
                    .map(|s| s.continue_on_error)
                    .unwrap_or(false);
                let absorbed = (step_absorbs || self.compiled.plan.continue_on_error)
                    && !matches!(
                        kind,
                        ErrorKind::Cancelled
                            | ErrorKind::WorkflowTimeout
                            | ErrorKind::InternalError
                    );
                if absorbed {
                    debug!(step_id = %id, "Failure absorbed by continueOnError");
                    // Dependents still run; any reference to this step's
                    // output fails resolution in the dependent.
                    self.release_dependents(state, ready, id);
                } else {
                    if abort.is_none() && kind != ErrorKind::Cancelled {
                        *abort = Some((kind, format!("step `{id}` failed: {message}")));
                        failed_cone.extend(self.compiled.dag.transitive_dependents(id));
                    } else if abort.is_none() {
                        *abort = Some((ErrorKind::Cancelled, "run was cancelled".to_string()));
                    }
                    state.set_aborting();
                    workflow_cancel.cancel();
                    ready.clear();
                }
            }
        }
    }

    /// Releases each dependent's counter; newly unblocked steps become
    /// ready in lexicographic order.
    fn release_dependents(
        &self,
        state: &Arc<ExecutionState>,
        ready: &mut VecDeque<String>,
        id: &str,
    ) {
        let mut dependents = self.compiled.dag.dependents(id);
        dependents.sort_unstable();
        for dependent in dependents {
            if state.status(dependent) != Some(StepStatus::Pending) {
                continue;
            }
            if state.release_dependency(dependent) == 0
                && !state.is_aborting()
                && state.transition(dependent, StepStatus::Ready).is_ok()
            {
                ready.push_back(dependent.to_string());
            }
        }
    }

    fn report(
        &self,
        state: &ExecutionState,
        started: Instant,
        status: RunStatus,
        error: Option<(ErrorKind, String)>,
    ) -> RunReport {
        let (successful, failed, skipped) = state.counts();
        let mut outputs = HashMap::new();
        let mut failures = HashMap::new();
        for step in &self.compiled.plan.steps {
            match state.status(&step.id) {
                Some(StepStatus::Succeeded) => {
                    if let Some(output) = state.output(&step.id) {
                        outputs.insert(step.id.clone(), output);
                    }
                }
                Some(StepStatus::Failed) => {
                    if let Some(failure) = state.failure(&step.id) {
                        failures.insert(step.id.clone(), failure);
                    }
                }
                _ => {}
            }
        }
        let (error_kind, event_error) = match error {
            Some((kind, message)) => (
                Some(kind),
                Some(EventError {
                    message,
                    code: Some(kind.as_str().to_string()),
                }),
            ),
            None => (None, None),
        };
        RunReport {
            run_id: state.run_id.clone(),
            workflow_name: state.workflow_name.clone(),
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            successful_steps: successful,
            failed_steps: failed,
            skipped_steps: skipped,
            outputs,
            failures,
            error: event_error,
            error_kind,
        }
    }
}

// Drive-loop unit tests live in tests/engine_scenarios.rs, where a stub
// adapter exercises the full pipeline end to end.

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("workflow", &self.compiled.plan.name)
            .field("dry_run", &self.internal.runtime.dry_run)
            .finish_non_exhaustive()
    }
}
