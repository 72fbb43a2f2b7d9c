// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Typed lifecycle events and the event bus.
//!
//! Emission is synchronous with respect to the state transition that
//! caused it: an `emit` returns only after every subscriber has seen
//! the event, so a step's completion event is observed before any
//! dependent's start event. Subscribers must not block.

use crate::adapter::Capabilities;
use crate::state::SkipReason;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Terminal status of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

/// Error payload embedded in failure events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// The discriminated union of workflow lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    #[serde(rename = "workflow.started", rename_all = "camelCase")]
    WorkflowStarted {
        workflow_name: String,
        total_steps: usize,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "workflow.completed", rename_all = "camelCase")]
    WorkflowCompleted {
        workflow_name: String,
        status: RunStatus,
        #[serde(rename = "duration_ms")]
        duration_ms: u64,
        successful_steps: usize,
        failed_steps: usize,
        skipped_steps: usize,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "workflow.failed", rename_all = "camelCase")]
    WorkflowFailed {
        workflow_name: String,
        error: EventError,
        #[serde(rename = "duration_ms")]
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "step.started", rename_all = "camelCase")]
    StepStarted {
        step_id: String,
        step_name: String,
        adapter: String,
        action: String,
        /// Capability metadata of the serving adapter, as registered.
        /// Annotation only; scheduling never branches on it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capabilities: Option<Capabilities>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "step.completed", rename_all = "camelCase")]
    StepCompleted {
        step_id: String,
        step_name: String,
        #[serde(rename = "duration_ms")]
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "step.failed", rename_all = "camelCase")]
    StepFailed {
        step_id: String,
        step_name: String,
        error: EventError,
        #[serde(rename = "duration_ms")]
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "step.retrying", rename_all = "camelCase")]
    StepRetrying {
        step_id: String,
        step_name: String,
        attempt: u32,
        max_attempts: u32,
        #[serde(rename = "nextDelay_ms")]
        next_delay_ms: u64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "step.skipped", rename_all = "camelCase")]
    StepSkipped {
        step_id: String,
        step_name: String,
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    /// The serialized discriminant, e.g. `step.started`.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "workflow.started",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow.completed",
            WorkflowEvent::WorkflowFailed { .. } => "workflow.failed",
            WorkflowEvent::StepStarted { .. } => "step.started",
            WorkflowEvent::StepCompleted { .. } => "step.completed",
            WorkflowEvent::StepFailed { .. } => "step.failed",
            WorkflowEvent::StepRetrying { .. } => "step.retrying",
            WorkflowEvent::StepSkipped { .. } => "step.skipped",
        }
    }

    /// The step id, for step-scoped events.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::StepStarted { step_id, .. }
            | WorkflowEvent::StepCompleted { step_id, .. }
            | WorkflowEvent::StepFailed { step_id, .. }
            | WorkflowEvent::StepRetrying { step_id, .. }
            | WorkflowEvent::StepSkipped { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}

/// Subscriber callback.
pub type Subscriber = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Ordered, synchronous event bus.
///
/// The subscriber list is copy-on-write: emission iterates a snapshot
/// without holding the lock, mutation replaces the list under it.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Arc<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Subscribers receive events in
    /// registration order.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        let mut guard = self.subscribers.write();
        let mut next = (**guard).clone();
        next.push(Arc::new(subscriber));
        *guard = Arc::new(next);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Delivers an event to every subscriber. A panicking subscriber is
    /// logged and does not affect execution.
    pub fn emit(&self, event: &WorkflowEvent) {
        let snapshot = self.subscribers.read().clone();
        for subscriber in snapshot.iter() {
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                tracing::warn!(event = event.kind(), "Event subscriber panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn started_event() -> WorkflowEvent {
        WorkflowEvent::WorkflowStarted {
            workflow_name: "pipeline".to_string(),
            total_steps: 3,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_serialized_event_names() {
        let value = serde_json::to_value(started_event()).unwrap();
        assert_eq!(value["type"], "workflow.started");
        assert_eq!(value["workflowName"], "pipeline");
        assert_eq!(value["totalSteps"], 3);
    }

    #[test]
    fn test_step_started_carries_capability_annotation() {
        let event = WorkflowEvent::StepStarted {
            step_id: "a".to_string(),
            step_name: "a".to_string(),
            adapter: "http".to_string(),
            action: "http.request.get".to_string(),
            capabilities: Some(Capabilities {
                concurrent: true,
                ..Capabilities::default()
            }),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "step.started");
        assert_eq!(value["capabilities"]["concurrent"], true);

        let unannotated = WorkflowEvent::StepStarted {
            step_id: "a".to_string(),
            step_name: "a".to_string(),
            adapter: "notify".to_string(),
            action: "notify.slack".to_string(),
            capabilities: None,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&unannotated).unwrap();
        // The annotation is additive: absent adapters leave the
        // serialized form untouched.
        assert!(value.get("capabilities").is_none());
    }

    #[test]
    fn test_serialized_duration_field() {
        let event = WorkflowEvent::StepCompleted {
            step_id: "a".to_string(),
            step_name: "a".to_string(),
            duration_ms: 12,
            output: None,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "step.completed");
        assert_eq!(value["duration_ms"], 12);
        assert_eq!(value["stepId"], "a");
        assert!(value.get("output").is_none());
    }

    #[test]
    fn test_retrying_delay_field() {
        let event = WorkflowEvent::StepRetrying {
            step_id: "a".to_string(),
            step_name: "a".to_string(),
            attempt: 2,
            max_attempts: 3,
            next_delay_ms: 20,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["nextDelay_ms"], 20);
        assert_eq!(value["maxAttempts"], 3);
    }

    #[test]
    fn test_skip_reason_serialization() {
        let event = WorkflowEvent::StepSkipped {
            step_id: "a".to_string(),
            step_name: "a".to_string(),
            reason: SkipReason::ConditionFalse,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["reason"], "condition_false");
    }

    #[test]
    fn test_subscribers_receive_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(move |_| order.lock().push(label));
        }
        bus.emit(&started_event());
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_delivery() {
        let bus = EventBus::new();
        let delivered = Arc::new(Mutex::new(0));
        bus.subscribe(|_| panic!("bad subscriber"));
        {
            let delivered = delivered.clone();
            bus.subscribe(move |_| *delivered.lock() += 1);
        }
        bus.emit(&started_event());
        assert_eq!(*delivered.lock(), 1);
    }

    #[test]
    fn test_event_roundtrip() {
        let event = WorkflowEvent::WorkflowCompleted {
            workflow_name: "pipeline".to_string(),
            status: RunStatus::Partial,
            duration_ms: 100,
            successful_steps: 2,
            failed_steps: 1,
            skipped_steps: 0,
            timestamp: Utc::now(),
        };
        let text = serde_json::to_string(&event).unwrap();
        let restored: WorkflowEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(event, restored);
    }
}
