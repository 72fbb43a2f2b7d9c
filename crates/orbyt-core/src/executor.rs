// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Single-step execution.
//!
//! One [`StepExecutor::execute`] call drives a step's full lifecycle:
//! `when` gating, limit enforcement, input resolution, adapter dispatch
//! under a deadline, the retry loop, and output projection. The
//! scheduler owns dependency gating; by the time a step reaches this
//! module its `remainingDeps` counter is zero.

use crate::adapter::{AdapterContext, AdapterRegistry, SecretMask};
use crate::compile::CompiledWorkflow;
use crate::context::InternalExecutionContext;
use crate::error::ErrorKind;
use crate::events::{EventBus, EventError, WorkflowEvent};
use crate::limits::{enforce_retry_limit, enforce_timeout_limit, TimeoutLevel};
use crate::plan::{BackoffStrategy, PlannedStep, RetryPolicy};
use crate::resolver::{evaluate_when, lookup_path, resolve_value, ResolutionScope, ResolveError};
use crate::state::{ExecutionState, StepFailure};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Grace period between cooperative cancellation and abandoning an
/// attempt.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Terminal outcome of one step, reported back to the scheduler.
#[derive(Debug, Clone)]
pub(crate) enum StepOutcome {
    Succeeded {
        output: Value,
        attempts: u32,
        duration_ms: u64,
    },
    SkippedCondition,
    Failed {
        failure: StepFailure,
        attempts: u32,
        duration_ms: u64,
    },
}

/// Attempt-level failure classification.
enum AttemptError {
    /// Eligible for the retry loop.
    Retriable(StepFailure),
    /// Deterministic or cooperative-abort failures; retrying is useless.
    Fatal(StepFailure),
}

/// Executes single steps against the adapter registry.
pub(crate) struct StepExecutor {
    pub registry: Arc<AdapterRegistry>,
    pub bus: Arc<EventBus>,
    pub internal: Arc<InternalExecutionContext>,
    pub compiled: Arc<CompiledWorkflow>,
    pub state: Arc<ExecutionState>,
    pub secrets: Arc<HashMap<String, String>>,
    pub cancellation: CancellationToken,
    pub dry_run: bool,
}

impl StepExecutor {
    /// Runs one step to a terminal outcome. Step-scoped events are
    /// emitted from here; the scheduler applies the outcome to shared
    /// state.
    pub async fn execute(&self, step: &PlannedStep) -> StepOutcome {
        let started = Instant::now();
        let scope = self.scope_for(step);

        // Condition check happens before the step is considered started:
        // a falsy `when` produces step.skipped with no step.started.
        match &step.when {
            Some(expression) => match evaluate_when(expression, &scope) {
                Ok(true) => {}
                Ok(false) => {
                    info!(step_id = %step.id, "Skipping step, condition is falsy");
                    self.bus.emit(&WorkflowEvent::StepSkipped {
                        step_id: step.id.clone(),
                        step_name: step.display_name().to_string(),
                        reason: crate::state::SkipReason::ConditionFalse,
                        timestamp: Utc::now(),
                    });
                    return StepOutcome::SkippedCondition;
                }
                Err(error) => {
                    self.emit_started(step);
                    let failure = failure_from_resolve(error);
                    self.emit_failed(step, &failure, started.elapsed());
                    return StepOutcome::Failed {
                        failure,
                        attempts: 0,
                        duration_ms: duration_ms(started),
                    };
                }
            },
            None => {}
        }

        self.emit_started(step);

        if self.dry_run {
            let output = json!({"dryRun": true});
            self.emit_completed(step, &output, Duration::ZERO);
            return StepOutcome::Succeeded {
                output,
                attempts: 1,
                duration_ms: 0,
            };
        }

        let limits = &self.internal.limits;
        let timeout_ms = enforce_timeout_limit(step.timeout_ms, limits, TimeoutLevel::Step).value;
        let max_retries = enforce_retry_limit(step.retry.as_ref().map(|r| r.max), limits).value;
        let retry = step.retry.clone().unwrap_or(RetryPolicy {
            max: max_retries,
            backoff: BackoffStrategy::Exponential,
            delay_ms: 1_000,
        });

        let mut attempt: u32 = 1;
        loop {
            match self.dispatch_attempt(step, timeout_ms, &scope).await {
                Ok(output) => {
                    self.emit_completed(step, &output, started.elapsed());
                    return StepOutcome::Succeeded {
                        output,
                        attempts: attempt,
                        duration_ms: duration_ms(started),
                    };
                }
                Err(AttemptError::Fatal(failure)) => {
                    self.emit_failed(step, &failure, started.elapsed());
                    return StepOutcome::Failed {
                        failure,
                        attempts: attempt,
                        duration_ms: duration_ms(started),
                    };
                }
                Err(AttemptError::Retriable(failure)) => {
                    let retries_used = attempt - 1;
                    if retries_used >= max_retries {
                        self.emit_failed(step, &failure, started.elapsed());
                        return StepOutcome::Failed {
                            failure,
                            attempts: attempt,
                            duration_ms: duration_ms(started),
                        };
                    }
                    let delay = retry.delay_after(attempt);
                    attempt += 1;
                    warn!(
                        step_id = %step.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.message,
                        "Step failed, retrying"
                    );
                    self.bus.emit(&WorkflowEvent::StepRetrying {
                        step_id: step.id.clone(),
                        step_name: step.display_name().to_string(),
                        attempt,
                        max_attempts: max_retries + 1,
                        next_delay_ms: delay.as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancellation.cancelled() => {
                            let failure =
                                StepFailure::new(ErrorKind::Cancelled, "run was cancelled");
                            self.emit_failed(step, &failure, started.elapsed());
                            return StepOutcome::Failed {
                                failure,
                                attempts: attempt,
                                duration_ms: duration_ms(started),
                            };
                        }
                    }
                }
            }
        }
    }

    /// One adapter attempt: resolve inputs, dispatch under the deadline,
    /// normalize the result.
    async fn dispatch_attempt(
        &self,
        step: &PlannedStep,
        timeout_ms: u64,
        scope: &ResolutionScope,
    ) -> Result<Value, AttemptError> {
        let adapter = self
            .registry
            .resolve(&step.action)
            .map_err(|error| {
                let kind = match &error {
                    crate::adapter::DispatchError::UnknownAdapter(_) => ErrorKind::UnknownAdapter,
                    crate::adapter::DispatchError::UnknownAction { .. } => ErrorKind::UnknownAction,
                };
                AttemptError::Fatal(StepFailure::new(kind, error.to_string()))
            })?;

        let mut input = HashMap::with_capacity(step.input.len());
        for (key, raw) in &step.input {
            let resolved = resolve_value(raw, scope)
                .map_err(|error| AttemptError::Fatal(failure_from_resolve(error)))?;
            input.insert(key.clone(), resolved);
        }

        let attempt_token = self.cancellation.child_token();
        let ctx = AdapterContext::new(
            self.internal.identity.run_id.clone(),
            step.id.clone(),
            scope.env.clone(),
            timeout_ms,
            self.internal.security.sandbox,
            self.internal.limits.max_resources,
            self.internal.runtime.priority,
            attempt_token.clone(),
            SecretMask::new(self.secrets.values().cloned()),
        );

        let action = step.action.clone();
        let task_ctx = ctx.clone();
        let mut handle =
            tokio::spawn(async move { adapter.execute(&action, input, &task_ctx).await });

        let result = tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => result,
                Err(join_error) => {
                    return Err(AttemptError::Fatal(StepFailure::new(
                        ErrorKind::InternalError,
                        format!("adapter task failed: {join_error}"),
                    )));
                }
            },
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                // Cooperative cancellation first, forceful abandonment
                // after the grace period.
                attempt_token.cancel();
                match tokio::time::timeout(CANCEL_GRACE, &mut handle).await {
                    Ok(_) => {}
                    Err(_) => handle.abort(),
                }
                debug!(step_id = %step.id, timeout_ms, "Step attempt timed out");
                return Err(AttemptError::Retriable(StepFailure::new(
                    ErrorKind::StepTimeout,
                    format!("step exceeded its {timeout_ms}ms timeout"),
                )));
            }
            _ = self.cancellation.cancelled() => {
                attempt_token.cancel();
                match tokio::time::timeout(CANCEL_GRACE, &mut handle).await {
                    Ok(_) => {}
                    Err(_) => handle.abort(),
                }
                return Err(AttemptError::Fatal(StepFailure::new(
                    ErrorKind::Cancelled,
                    "run was cancelled",
                )));
            }
        };

        for line in ctx.take_logs() {
            debug!(step_id = %step.id, "{line}");
        }
        for warning in &result.warnings {
            warn!(step_id = %step.id, "{warning}");
        }

        if result.success {
            self.project_outputs(step, result.data)
                .map_err(AttemptError::Fatal)
        } else {
            let error = result.error.unwrap_or_else(|| {
                crate::adapter::AdapterError::new("adapter reported failure without detail")
            });
            let kind = match error.code.as_deref() {
                Some("InputValidation") => ErrorKind::InputValidation,
                _ => ErrorKind::AdapterFailure,
            };
            let mut failure = StepFailure::new(kind, error.message);
            failure.details = error.details;
            Err(AttemptError::Retriable(failure))
        }
    }

    /// Applies the step's `outputs` projection to the adapter payload.
    fn project_outputs(&self, step: &PlannedStep, data: Value) -> Result<Value, StepFailure> {
        if step.outputs.is_empty() {
            return Ok(data);
        }
        let mut projected = serde_json::Map::with_capacity(step.outputs.len());
        for (name, path) in &step.outputs {
            match lookup_path(&data, path) {
                Some(value) => {
                    projected.insert(name.clone(), value);
                }
                None => {
                    return Err(StepFailure::new(
                        ErrorKind::VariableUnresolved,
                        format!("output `{name}` path `{path}` not found in adapter result"),
                    ));
                }
            }
        }
        Ok(Value::Object(projected))
    }

    /// Resolution scope for a step: process environment read-through,
    /// shadowed by workflow then step `env`, plus a snapshot of terminal
    /// step outputs.
    fn scope_for(&self, step: &PlannedStep) -> ResolutionScope {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(self.compiled.plan.env.clone());
        env.extend(step.env.clone());
        ResolutionScope {
            vars: self.compiled.plan.vars.clone(),
            env,
            secrets: (*self.secrets).clone(),
            outputs: self.state.output_snapshot(),
            workflow_name: self.compiled.plan.name.clone(),
            run_id: self.internal.identity.run_id.clone(),
        }
    }

    fn emit_started(&self, step: &PlannedStep) {
        info!(step_id = %step.id, action = %step.action, "Executing step");
        self.bus.emit(&WorkflowEvent::StepStarted {
            step_id: step.id.clone(),
            step_name: step.display_name().to_string(),
            adapter: step.adapter_kind.to_string(),
            action: step.action.clone(),
            capabilities: self.registry.capabilities_for(&step.action),
            timestamp: Utc::now(),
        });
    }

    fn emit_completed(&self, step: &PlannedStep, output: &Value, elapsed: Duration) {
        info!(
            step_id = %step.id,
            duration_ms = elapsed.as_millis() as u64,
            "Step completed"
        );
        let mask = SecretMask::new(self.secrets.values().cloned());
        self.bus.emit(&WorkflowEvent::StepCompleted {
            step_id: step.id.clone(),
            step_name: step.display_name().to_string(),
            duration_ms: elapsed.as_millis() as u64,
            output: Some(mask.mask_value(output)),
            timestamp: Utc::now(),
        });
    }

    fn emit_failed(&self, step: &PlannedStep, failure: &StepFailure, elapsed: Duration) {
        warn!(step_id = %step.id, error = %failure.message, "Step failed");
        self.bus.emit(&WorkflowEvent::StepFailed {
            step_id: step.id.clone(),
            step_name: step.display_name().to_string(),
            error: EventError {
                message: failure.message.clone(),
                code: Some(failure.kind.as_str().to_string()),
            },
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });
    }
}

fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn failure_from_resolve(error: ResolveError) -> StepFailure {
    let kind = match &error {
        ResolveError::UnknownRoot(_) => ErrorKind::UnknownReferenceRoot,
        ResolveError::DepthExceeded => ErrorKind::ReferenceDepthExceeded,
        ResolveError::Unresolved(_)
        | ResolveError::UnresolvedStepOutput(_)
        | ResolveError::Malformed(_) => ErrorKind::VariableUnresolved,
    };
    StepFailure::new(kind, error.to_string())
}
