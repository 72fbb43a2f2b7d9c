// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Per-run mutable execution state.
//!
//! Owned by the scheduler coordinator; step tasks never write here
//! directly. They report completion envelopes over a channel and the
//! coordinator applies the transition. Reads from other tasks go
//! through point-in-time snapshots.

use crate::dag::WorkflowDag;
use crate::error::ErrorKind;
use crate::plan::PlannedStep;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle status of one step.
///
/// Legal transitions: `Pending → Ready → Running → {Succeeded, Failed,
/// Skipped}`, plus `Pending/Ready → Skipped` for steps that are never
/// started because of an upstream decision. A step skipped by a falsy
/// `when` still satisfies its dependents' gating; its output slot stays
/// null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped)
    }

    fn can_become(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Ready, Running)
                | (Ready, Skipped)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Skipped)
        )
    }
}

/// Why a step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ConditionFalse,
    UpstreamFailed,
    UpstreamCancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ConditionFalse => "condition_false",
            SkipReason::UpstreamFailed => "upstream_failed",
            SkipReason::UpstreamCancelled => "upstream_cancelled",
        }
    }
}

/// Failure record for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl StepFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }
}

/// Mutable state for one workflow run.
#[derive(Debug)]
pub struct ExecutionState {
    pub run_id: String,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
    status: DashMap<String, StepStatus>,
    skip_reason: DashMap<String, SkipReason>,
    output: DashMap<String, Value>,
    error: DashMap<String, StepFailure>,
    attempt: DashMap<String, u32>,
    remaining_deps: DashMap<String, usize>,
    aborting: AtomicBool,
}

impl ExecutionState {
    /// Initializes state for a plan: every step `Pending` with its
    /// dependency counter at `|needs|`.
    pub fn new(
        run_id: impl Into<String>,
        workflow_name: impl Into<String>,
        steps: &[PlannedStep],
        dag: &WorkflowDag,
    ) -> Self {
        let status = DashMap::new();
        let remaining_deps = DashMap::new();
        for step in steps {
            status.insert(step.id.clone(), StepStatus::Pending);
            remaining_deps.insert(step.id.clone(), dag.in_degree(&step.id));
        }
        Self {
            run_id: run_id.into(),
            workflow_name: workflow_name.into(),
            started_at: Utc::now(),
            status,
            skip_reason: DashMap::new(),
            output: DashMap::new(),
            error: DashMap::new(),
            attempt: DashMap::new(),
            remaining_deps,
            aborting: AtomicBool::new(false),
        }
    }

    pub fn status(&self, id: &str) -> Option<StepStatus> {
        self.status.get(id).map(|s| *s)
    }

    pub fn skip_reason(&self, id: &str) -> Option<SkipReason> {
        self.skip_reason.get(id).map(|r| *r)
    }

    pub fn failure(&self, id: &str) -> Option<StepFailure> {
        self.error.get(id).map(|f| f.clone())
    }

    pub fn output(&self, id: &str) -> Option<Value> {
        self.output.get(id).map(|v| v.clone())
    }

    pub fn attempt(&self, id: &str) -> u32 {
        self.attempt.get(id).map(|a| *a).unwrap_or(0)
    }

    pub fn record_attempt(&self, id: &str, attempt: u32) {
        self.attempt.insert(id.to_string(), attempt);
    }

    /// Applies a status transition, rejecting illegal ones.
    pub fn transition(&self, id: &str, next: StepStatus) -> Result<(), String> {
        let Some(mut entry) = self.status.get_mut(id) else {
            return Err(format!("unknown step `{id}`"));
        };
        if !entry.can_become(next) {
            return Err(format!("illegal transition {:?} → {:?} for `{id}`", *entry, next));
        }
        *entry = next;
        Ok(())
    }

    pub fn mark_succeeded(&self, id: &str, output: Value) -> Result<(), String> {
        self.transition(id, StepStatus::Succeeded)?;
        self.output.insert(id.to_string(), output);
        Ok(())
    }

    pub fn mark_failed(&self, id: &str, failure: StepFailure) -> Result<(), String> {
        self.transition(id, StepStatus::Failed)?;
        self.error.insert(id.to_string(), failure);
        Ok(())
    }

    /// Marks a step skipped. Its output slot is set to null so the step
    /// still appears in resolution snapshots as terminal-with-no-output.
    pub fn mark_skipped(&self, id: &str, reason: SkipReason) -> Result<(), String> {
        self.transition(id, StepStatus::Skipped)?;
        self.skip_reason.insert(id.to_string(), reason);
        self.output.insert(id.to_string(), Value::Null);
        Ok(())
    }

    /// Decrements a dependency counter, returning the new value.
    pub fn release_dependency(&self, id: &str) -> usize {
        match self.remaining_deps.get_mut(id) {
            Some(mut entry) => {
                *entry = entry.saturating_sub(1);
                *entry
            }
            None => 0,
        }
    }

    pub fn remaining_deps(&self, id: &str) -> usize {
        self.remaining_deps.get(id).map(|d| *d).unwrap_or(0)
    }

    pub fn set_aborting(&self) {
        self.aborting.store(true, Ordering::SeqCst);
    }

    pub fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::SeqCst)
    }

    /// Point-in-time copy of terminal outputs for the resolver.
    pub fn output_snapshot(&self) -> HashMap<String, Value> {
        self.output
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Counts of (succeeded, failed, skipped) steps.
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for entry in self.status.iter() {
            match *entry.value() {
                StepStatus::Succeeded => succeeded += 1,
                StepStatus::Failed => failed += 1,
                StepStatus::Skipped => skipped += 1,
                _ => {}
            }
        }
        (succeeded, failed, skipped)
    }

    /// True when every step is terminal.
    pub fn all_terminal(&self) -> bool {
        self.status.iter().all(|entry| entry.value().is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::AdapterKind;
    use serde_json::json;

    fn steps() -> Vec<PlannedStep> {
        let make = |id: &str, needs: &[&str]| PlannedStep {
            id: id.to_string(),
            name: None,
            action: "noop.run".to_string(),
            adapter_kind: AdapterKind::Plugin,
            input: HashMap::new(),
            needs: needs.iter().map(|n| n.to_string()).collect(),
            when: None,
            continue_on_error: false,
            retry: None,
            timeout_ms: None,
            env: HashMap::new(),
            outputs: HashMap::new(),
        };
        vec![make("a", &[]), make("b", &["a"])]
    }

    fn state() -> ExecutionState {
        let steps = steps();
        let dag = WorkflowDag::build(&steps).unwrap();
        ExecutionState::new("run_1", "test", &steps, &dag)
    }

    #[test]
    fn test_initial_state() {
        let state = state();
        assert_eq!(state.status("a"), Some(StepStatus::Pending));
        assert_eq!(state.remaining_deps("a"), 0);
        assert_eq!(state.remaining_deps("b"), 1);
        assert!(!state.is_aborting());
    }

    #[test]
    fn test_legal_transition_chain() {
        let state = state();
        state.transition("a", StepStatus::Ready).unwrap();
        state.transition("a", StepStatus::Running).unwrap();
        state.mark_succeeded("a", json!({"ok": true})).unwrap();
        assert_eq!(state.status("a"), Some(StepStatus::Succeeded));
        assert_eq!(state.output("a"), Some(json!({"ok": true})));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let state = state();
        assert!(state.transition("a", StepStatus::Running).is_err());
        state.transition("a", StepStatus::Ready).unwrap();
        state.transition("a", StepStatus::Running).unwrap();
        state.mark_succeeded("a", Value::Null).unwrap();
        // Terminal states are final.
        assert!(state.transition("a", StepStatus::Running).is_err());
        assert!(state.mark_failed("a", StepFailure::new(ErrorKind::AdapterFailure, "x")).is_err());
    }

    #[test]
    fn test_pending_to_skipped_for_downstream() {
        let state = state();
        state.mark_skipped("b", SkipReason::UpstreamFailed).unwrap();
        assert_eq!(state.status("b"), Some(StepStatus::Skipped));
        assert_eq!(state.skip_reason("b"), Some(SkipReason::UpstreamFailed));
        assert_eq!(state.output("b"), Some(Value::Null));
    }

    #[test]
    fn test_release_dependency() {
        let state = state();
        assert_eq!(state.release_dependency("b"), 0);
        assert_eq!(state.release_dependency("b"), 0);
    }

    #[test]
    fn test_snapshot_contains_terminal_outputs_only() {
        let state = state();
        state.transition("a", StepStatus::Ready).unwrap();
        state.transition("a", StepStatus::Running).unwrap();
        state.mark_succeeded("a", json!(1)).unwrap();
        let snapshot = state.output_snapshot();
        assert_eq!(snapshot.get("a"), Some(&json!(1)));
        assert!(!snapshot.contains_key("b"));
    }

    #[test]
    fn test_counts_and_all_terminal() {
        let state = state();
        assert!(!state.all_terminal());
        state.transition("a", StepStatus::Ready).unwrap();
        state.transition("a", StepStatus::Running).unwrap();
        state.mark_succeeded("a", Value::Null).unwrap();
        state.mark_skipped("b", SkipReason::UpstreamCancelled).unwrap();
        assert!(state.all_terminal());
        assert_eq!(state.counts(), (1, 0, 1));
    }
}
