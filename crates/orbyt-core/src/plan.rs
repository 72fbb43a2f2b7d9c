// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Step normalization: raw document definitions become [`PlannedStep`]
//! records ready for graph construction and scheduling.

use crate::diagnostics::{codes, Diagnostic, DiagnosticList};
use crate::document::{StepDefinition, WorkflowDocument};
use crate::error::ErrorKind;
use crate::limits::{parse_duration_ms, ABSOLUTE_RETRY_MAX};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Adapter families the engine routes to.
///
/// The first token of a step's `uses` action selects the kind; any
/// unrecognized token routes to [`AdapterKind::Plugin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Http,
    Shell,
    Cli,
    Fs,
    Db,
    Queue,
    Secrets,
    Webhook,
    Plugin,
}

impl AdapterKind {
    /// Resolves the adapter kind from a dotted action string.
    pub fn from_action(action: &str) -> Self {
        match action.split('.').next().unwrap_or_default() {
            "http" => AdapterKind::Http,
            "shell" => AdapterKind::Shell,
            "cli" => AdapterKind::Cli,
            "fs" => AdapterKind::Fs,
            "db" => AdapterKind::Db,
            "queue" => AdapterKind::Queue,
            "secrets" => AdapterKind::Secrets,
            "webhook" => AdapterKind::Webhook,
            _ => AdapterKind::Plugin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Http => "http",
            AdapterKind::Shell => "shell",
            AdapterKind::Cli => "cli",
            AdapterKind::Fs => "fs",
            AdapterKind::Db => "db",
            AdapterKind::Queue => "queue",
            AdapterKind::Secrets => "secrets",
            AdapterKind::Webhook => "webhook",
            AdapterKind::Plugin => "plugin",
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    #[default]
    Exponential,
}

/// Per-step retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure, `0..=10`.
    pub max: u32,
    pub backoff: BackoffStrategy,
    pub delay_ms: u64,
}

impl RetryPolicy {
    /// Delay before the attempt following `failed_attempt` (1-based).
    ///
    /// Linear: `delay × n`; exponential: `delay × 2^(n−1)`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let attempt = failed_attempt.max(1);
        let millis = match self.backoff {
            BackoffStrategy::Linear => self.delay_ms.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                let shift = (attempt - 1).min(63);
                self.delay_ms.saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX))
            }
        };
        Duration::from_millis(millis)
    }
}

/// A normalized, validated step ready for scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub id: String,
    pub name: Option<String>,
    /// Dotted action string, e.g. `http.request.get`.
    pub action: String,
    pub adapter_kind: AdapterKind,
    pub input: HashMap<String, Value>,
    pub needs: Vec<String>,
    pub when: Option<String>,
    pub continue_on_error: bool,
    /// Declared retry policy; `None` lets the limit policy supply the
    /// default at dispatch time.
    pub retry: Option<RetryPolicy>,
    pub timeout_ms: Option<u64>,
    pub env: HashMap<String, String>,
    /// User-facing output name → path inside the adapter result.
    pub outputs: HashMap<String, String>,
}

impl PlannedStep {
    /// Display name: explicit `name` or the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A compiled workflow plan: ordered steps plus workflow-level defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub description: Option<String>,
    pub continue_on_error: bool,
    pub timeout_ms: Option<u64>,
    pub env: HashMap<String, String>,
    pub vars: HashMap<String, Value>,
    pub steps: Vec<PlannedStep>,
}

/// Required input keys per adapter family. `shell` accepts either key.
fn required_inputs(kind: AdapterKind) -> &'static [&'static [&'static str]] {
    const HTTP: &[&[&str]] = &[&["url"]];
    const SHELL: &[&[&str]] = &[&["command", "script"]];
    const CLI: &[&[&str]] = &[&["command"]];
    match kind {
        AdapterKind::Http => HTTP,
        AdapterKind::Shell => SHELL,
        AdapterKind::Cli => CLI,
        _ => &[],
    }
}

/// Normalizes a validated document into a [`Workflow`] plan.
///
/// All problems are aggregated; warnings (clamped retry counts) do not
/// fail normalization.
pub fn normalize(document: &WorkflowDocument) -> Result<(Workflow, DiagnosticList), DiagnosticList> {
    let mut diagnostics = DiagnosticList::new();
    let mut warnings = DiagnosticList::new();
    let mut steps = Vec::with_capacity(document.steps.len());

    for (index, definition) in document.steps.iter().enumerate() {
        match normalize_step(definition, index, &mut warnings) {
            Ok(step) => steps.push(step),
            Err(errors) => diagnostics.extend(errors),
        }
    }

    let timeout_ms = match &document.timeout {
        Some(raw) => match parse_duration_ms(raw) {
            Some(ms) => Some(ms),
            None => {
                diagnostics.push(duration_error(raw, "timeout"));
                None
            }
        },
        None => None,
    };

    if diagnostics.has_errors() {
        return Err(diagnostics);
    }

    Ok((
        Workflow {
            name: document.name.clone(),
            description: document.description.clone(),
            continue_on_error: document.continue_on_error,
            timeout_ms,
            env: document.env.clone(),
            vars: document.vars.clone(),
            steps,
        },
        warnings,
    ))
}

fn normalize_step(
    definition: &StepDefinition,
    index: usize,
    warnings: &mut DiagnosticList,
) -> Result<PlannedStep, DiagnosticList> {
    let mut diagnostics = DiagnosticList::new();
    let base = format!("steps[{index}]");

    let id = definition.id.trim().to_string();
    if id.is_empty() {
        diagnostics.push(
            Diagnostic::error(codes::PLAN_EMPTY_STEP_ID, "step id must not be empty")
                .with_path(format!("{base}.id")),
        );
    }

    let action = definition.uses.trim().to_string();
    if action.is_empty() || action.split('.').any(|token| token.is_empty()) {
        diagnostics.push(
            Diagnostic::error(
                codes::PLAN_INVALID_ACTION,
                format!("`{action}` is not a valid dotted action"),
            )
            .with_path(format!("{base}.uses"))
            .with_hint("actions look like `http.request.get` or `shell.run`"),
        );
    }
    let adapter_kind = AdapterKind::from_action(&action);

    for alternatives in required_inputs(adapter_kind) {
        if !alternatives.iter().any(|key| definition.with.contains_key(*key)) {
            let expected = alternatives.join("` or `");
            diagnostics.push(
                Diagnostic::error(
                    codes::PLAN_MISSING_INPUT,
                    format!("`{}` steps require input `{expected}`", adapter_kind),
                )
                .with_path(format!("{base}.with")),
            );
        }
    }

    let retry = match &definition.retry {
        Some(raw) => {
            let mut max = raw.max;
            if max > ABSOLUTE_RETRY_MAX {
                warnings.push(
                    Diagnostic::warning(
                        codes::LIMIT_EXCEEDED,
                        format!("retry.max {max} exceeds the absolute bound {ABSOLUTE_RETRY_MAX}"),
                    )
                    .with_path(format!("{base}.retry.max"))
                    .with_context(
                        "kind",
                        Value::String(ErrorKind::LimitExceeded.as_str().into()),
                    ),
                );
                max = ABSOLUTE_RETRY_MAX;
            }
            let backoff = match raw.backoff.as_deref() {
                Some("linear") => BackoffStrategy::Linear,
                Some("exponential") | None => BackoffStrategy::Exponential,
                Some(other) => {
                    diagnostics.push(
                        Diagnostic::error(
                            codes::PLAN_INVALID_RETRY,
                            format!("unknown backoff strategy `{other}`"),
                        )
                        .with_path(format!("{base}.retry.backoff")),
                    );
                    BackoffStrategy::Exponential
                }
            };
            Some(RetryPolicy {
                max,
                backoff,
                delay_ms: raw.delay.unwrap_or(1_000),
            })
        }
        None => None,
    };

    let timeout_ms = match &definition.timeout {
        Some(raw) => match parse_duration_ms(raw) {
            Some(ms) => Some(ms),
            None => {
                diagnostics.push(duration_error(raw, &format!("{base}.timeout")));
                None
            }
        },
        None => None,
    };

    if diagnostics.has_errors() {
        return Err(diagnostics);
    }

    Ok(PlannedStep {
        id,
        name: definition.name.clone(),
        action,
        adapter_kind,
        input: definition.with.clone(),
        needs: definition.needs.iter().map(|n| n.trim().to_string()).collect(),
        when: definition.when.clone(),
        continue_on_error: definition.continue_on_error.unwrap_or(false),
        retry,
        timeout_ms,
        env: definition.env.clone(),
        outputs: definition.outputs.clone(),
    })
}

fn duration_error(raw: &str, path: &str) -> Diagnostic {
    Diagnostic::error(
        codes::PLAN_INVALID_DURATION,
        format!("`{raw}` is not a valid duration"),
    )
    .with_path(path.to_string())
    .with_hint("durations look like `250ms`, `30s`, `5m`, `2h`, `1d`")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::WorkflowDocument;

    fn document(yaml: &str) -> WorkflowDocument {
        WorkflowDocument::from_yaml(yaml).expect("valid document")
    }

    #[test]
    fn test_adapter_kind_resolution() {
        assert_eq!(AdapterKind::from_action("http.request.get"), AdapterKind::Http);
        assert_eq!(AdapterKind::from_action("queue.publish"), AdapterKind::Queue);
        assert_eq!(AdapterKind::from_action("notify.slack"), AdapterKind::Plugin);
    }

    #[test]
    fn test_normalize_defaults() {
        let doc = document(
            r#"
name: defaults
steps:
  - id: a
    uses: noop.run
"#,
        );
        let (workflow, warnings) = normalize(&doc).unwrap();
        let step = &workflow.steps[0];
        assert!(!step.continue_on_error);
        assert!(step.needs.is_empty());
        assert!(step.input.is_empty());
        assert!(step.retry.is_none());
        assert!(warnings.is_empty());
        assert_eq!(step.adapter_kind, AdapterKind::Plugin);
    }

    #[test]
    fn test_required_input_table() {
        let doc = document(
            r#"
name: bad
steps:
  - id: fetch
    uses: http.request.get
  - id: sh
    uses: shell.run
    with:
      script: "echo hi"
  - id: tool
    uses: cli.run
"#,
        );
        let err = normalize(&doc).unwrap_err();
        let paths: Vec<_> = err.iter().filter_map(|d| d.path.as_deref()).collect();
        assert!(paths.contains(&"steps[0].with"));
        assert!(paths.contains(&"steps[2].with"));
        // shell step satisfied via `script`
        assert!(!paths.contains(&"steps[1].with"));
    }

    #[test]
    fn test_duration_conversion() {
        let doc = document(
            r#"
name: timed
timeout: 15m
steps:
  - id: a
    uses: noop.run
    timeout: 30s
"#,
        );
        let (workflow, _) = normalize(&doc).unwrap();
        assert_eq!(workflow.timeout_ms, Some(900_000));
        assert_eq!(workflow.steps[0].timeout_ms, Some(30_000));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let doc = document(
            r#"
name: timed
steps:
  - id: a
    uses: noop.run
    timeout: fast
"#,
        );
        let err = normalize(&doc).unwrap_err();
        assert!(err.iter().any(|d| d.code == codes::PLAN_INVALID_DURATION));
    }

    #[test]
    fn test_retry_normalization_and_clamp_warning() {
        let doc = document(
            r#"
name: retries
steps:
  - id: a
    uses: noop.run
    retry:
      max: 99
      backoff: linear
      delay: 50
"#,
        );
        let (workflow, warnings) = normalize(&doc).unwrap();
        let retry = workflow.steps[0].retry.clone().unwrap();
        assert_eq!(retry.max, ABSOLUTE_RETRY_MAX);
        assert_eq!(retry.backoff, BackoffStrategy::Linear);
        assert_eq!(retry.delay_ms, 50);
        let warning = warnings
            .iter()
            .find(|d| d.code == codes::LIMIT_EXCEEDED)
            .unwrap();
        assert_eq!(
            warning.context.get("kind"),
            Some(&Value::String(ErrorKind::LimitExceeded.as_str().into()))
        );
    }

    #[test]
    fn test_backoff_delay_math() {
        let linear = RetryPolicy {
            max: 3,
            backoff: BackoffStrategy::Linear,
            delay_ms: 100,
        };
        assert_eq!(linear.delay_after(1), Duration::from_millis(100));
        assert_eq!(linear.delay_after(3), Duration::from_millis(300));

        let exponential = RetryPolicy {
            max: 3,
            backoff: BackoffStrategy::Exponential,
            delay_ms: 10,
        };
        assert_eq!(exponential.delay_after(1), Duration::from_millis(10));
        assert_eq!(exponential.delay_after(2), Duration::from_millis(20));
        assert_eq!(exponential.delay_after(3), Duration::from_millis(40));
    }

    #[test]
    fn test_plan_roundtrip_is_stable() {
        let doc = document(
            r#"
name: roundtrip
steps:
  - id: a
    uses: http.request.get
    with:
      url: https://example.com
    outputs:
      body: data.body
"#,
        );
        let (workflow, _) = normalize(&doc).unwrap();
        let serialized = serde_json::to_string(&workflow).unwrap();
        let restored: Workflow = serde_json::from_str(&serialized).unwrap();
        assert_eq!(workflow, restored);
    }
}
