// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Core workflow execution engine.
//!
//! A workflow is a DAG of steps declared in a YAML or JSON document.
//! This crate compiles the document (schema validation, normalization,
//! graph construction, cycle detection, topological layering), then
//! schedules it: concurrent execution with dependency gating, per-step
//! retry and timeouts, conditional skipping, `continueOnError`
//! semantics, lazy `${...}` variable resolution, tier-enforced limits
//! and a typed lifecycle event stream.
//!
//! Side effects go through [`adapter::Adapter`] implementations
//! registered on the [`engine::Engine`]; the engine itself performs
//! none.

pub mod adapter;
pub mod compile;
pub mod context;
pub mod dag;
pub mod diagnostics;
pub mod document;
pub mod engine;
pub mod error;
pub mod events;
mod executor;
pub mod lifecycle;
pub mod limits;
pub mod plan;
pub mod resolver;
pub mod scheduler;
pub mod state;

pub use adapter::{
    Adapter, AdapterContext, AdapterError, AdapterRegistry, AdapterResult, Capabilities,
    CostHint, DispatchError, ResourceAccess, SecretMask,
};
pub use compile::{compile_json, compile_value, compile_yaml, CompiledWorkflow};
pub use context::{ContextBuilder, InternalExecutionContext};
pub use dag::WorkflowDag;
pub use diagnostics::{Diagnostic, DiagnosticList, Severity};
pub use document::{StepDefinition, WorkflowDocument};
pub use engine::{Engine, EngineBuilder, RunOptions};
pub use error::{EngineError, ErrorKind, Result};
pub use events::{EventBus, EventError, RunStatus, WorkflowEvent};
pub use lifecycle::{Component, LifecycleManager, LifecycleState};
pub use limits::{
    ExecutionMode, Priority, ResourceLimits, SandboxLevel, Tier, TierLimits,
};
pub use plan::{AdapterKind, BackoffStrategy, PlannedStep, RetryPolicy, Workflow};
pub use resolver::{ResolutionScope, ResolveError};
pub use scheduler::{RunReport, WorkflowRunner};
pub use state::{ExecutionState, SkipReason, StepFailure, StepStatus};
