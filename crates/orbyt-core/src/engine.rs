// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Engine facade.
//!
//! Owns the adapter registry, the event bus, the lifecycle manager and
//! the tier policy, and wires them into runs. There are no hidden
//! globals: construct an [`Engine`], register adapters, execute
//! workflows.

use crate::adapter::{Adapter, AdapterRegistry};
use crate::compile::{compile_yaml, CompiledWorkflow};
use crate::context::ContextBuilder;
use crate::diagnostics::{codes, Diagnostic, DiagnosticList};
use crate::error::{ErrorKind, Result};
use crate::events::{EventBus, WorkflowEvent};
use crate::lifecycle::LifecycleManager;
use crate::limits::{Tier, TierLimits, TimeoutLevel};
use crate::plan::AdapterKind;
use crate::scheduler::{RunReport, WorkflowRunner};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-run options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides merged over the document's `vars`.
    pub vars: HashMap<String, Value>,
    pub dry_run: bool,
    /// External stop signal.
    pub cancellation: Option<CancellationToken>,
}

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    registry: AdapterRegistry,
    tier: Option<Tier>,
    secrets: HashMap<String, String>,
}

impl EngineBuilder {
    pub fn adapter(mut self, kind: AdapterKind, adapter: Arc<dyn Adapter>) -> Self {
        self.registry.register(kind, adapter);
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    pub fn secrets(mut self, secrets: HashMap<String, String>) -> Self {
        self.secrets.extend(secrets);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            registry: Arc::new(self.registry),
            bus: Arc::new(EventBus::new()),
            lifecycle: LifecycleManager::new(),
            tier: self.tier.unwrap_or(Tier::Free),
            secrets: self.secrets,
        }
    }
}

/// The workflow engine.
pub struct Engine {
    registry: Arc<AdapterRegistry>,
    bus: Arc<EventBus>,
    lifecycle: LifecycleManager,
    tier: Tier,
    secrets: HashMap<String, String>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn limits(&self) -> TierLimits {
        TierLimits::for_tier(self.tier)
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(subscriber);
    }

    pub fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    /// Starts registered components in order.
    pub async fn start(&self) -> Result<()> {
        self.lifecycle.start().await
    }

    /// Stops registered components with a deadline.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        self.lifecycle.graceful_shutdown(deadline).await
    }

    /// Compiles a YAML document and annotates it with tier-limit
    /// warnings for this engine's tier.
    pub fn compile(&self, yaml: &str) -> std::result::Result<CompiledWorkflow, DiagnosticList> {
        let mut compiled = compile_yaml(yaml)?;
        let warnings = collect_limit_warnings(&compiled, &self.limits());
        compiled.warnings.extend(warnings);
        Ok(compiled)
    }

    /// Executes a compiled workflow.
    pub async fn execute(
        &self,
        mut compiled: CompiledWorkflow,
        options: RunOptions,
    ) -> Result<RunReport> {
        compiled.plan.vars.extend(options.vars.clone());
        let internal = ContextBuilder::new(self.tier)
            .dry_run(options.dry_run)
            .build();
        let mut runner = WorkflowRunner::new(
            compiled,
            self.registry.clone(),
            self.bus.clone(),
            internal,
        )
        .with_secrets(self.secrets.clone());
        if let Some(token) = options.cancellation.clone() {
            runner = runner.with_cancellation(token);
        }
        runner.run().await
    }

    /// Executes the full plan/schedule path without invoking any
    /// adapter.
    pub async fn execute_dry_run(&self, compiled: CompiledWorkflow) -> Result<RunReport> {
        self.execute(
            compiled,
            RunOptions {
                dry_run: true,
                ..RunOptions::default()
            },
        )
        .await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tier", &self.tier)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Warns about every user-declared value the tier policy will clamp at
/// dispatch time. Non-fatal.
fn collect_limit_warnings(compiled: &CompiledWorkflow, limits: &TierLimits) -> DiagnosticList {
    let mut warnings = DiagnosticList::new();

    if let Some(requested) = compiled.plan.timeout_ms {
        let enforced =
            crate::limits::enforce_timeout_limit(Some(requested), limits, TimeoutLevel::Workflow);
        if enforced.clamped {
            warnings.push(
                Diagnostic::warning(
                    codes::LIMIT_EXCEEDED,
                    format!(
                        "workflow timeout {requested}ms clamped to {}ms for tier {:?}",
                        enforced.value, limits.tier
                    ),
                )
                .with_path("timeout")
                .with_context("kind", Value::String(ErrorKind::LimitExceeded.as_str().into())),
            );
        }
    }

    for (index, step) in compiled.plan.steps.iter().enumerate() {
        if let Some(retry) = &step.retry {
            let enforced = crate::limits::enforce_retry_limit(Some(retry.max), limits);
            if enforced.clamped {
                warnings.push(
                    Diagnostic::warning(
                        codes::LIMIT_EXCEEDED,
                        format!(
                            "retry.max {} clamped to {} for tier {:?}",
                            retry.max, enforced.value, limits.tier
                        ),
                    )
                    .with_path(format!("steps[{index}].retry.max"))
                    .with_context("kind", Value::String(ErrorKind::LimitExceeded.as_str().into())),
                );
            }
        }
        if let Some(requested) = step.timeout_ms {
            let enforced =
                crate::limits::enforce_timeout_limit(Some(requested), limits, TimeoutLevel::Step);
            if enforced.clamped {
                warnings.push(
                    Diagnostic::warning(
                        codes::LIMIT_EXCEEDED,
                        format!(
                            "step timeout {requested}ms clamped to {}ms for tier {:?}",
                            enforced.value, limits.tier
                        ),
                    )
                    .with_path(format!("steps[{index}].timeout"))
                    .with_context("kind", Value::String(ErrorKind::LimitExceeded.as_str().into())),
                );
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_attaches_tier_warnings() {
        let engine = Engine::builder().tier(Tier::Free).build();
        let compiled = engine
            .compile(
                r#"
name: clamped
timeout: 2h
steps:
  - id: a
    uses: noop.run
    retry:
      max: 10
    timeout: 30m
"#,
            )
            .unwrap();
        let limit_warnings: Vec<_> = compiled
            .warnings
            .iter()
            .filter(|d| d.code == codes::LIMIT_EXCEEDED)
            .collect();
        assert_eq!(limit_warnings.len(), 3);
        for warning in limit_warnings {
            assert_eq!(
                warning.context.get("kind"),
                Some(&Value::String(ErrorKind::LimitExceeded.as_str().into()))
            );
        }
    }

    #[test]
    fn test_builder_defaults_to_most_restrictive_tier() {
        let engine = Engine::builder().build();
        assert_eq!(engine.tier(), Tier::Free);
    }
}
