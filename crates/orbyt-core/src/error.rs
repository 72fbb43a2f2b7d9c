// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Engine error kinds and process exit-code mapping.

use crate::diagnostics::DiagnosticList;
use serde::{Deserialize, Serialize};

/// Stable error kinds surfaced to callers and serialized into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    SchemaValidation,
    DuplicateStepId,
    MissingDependency,
    SelfDependency,
    CycleDetected,
    UnknownAdapter,
    UnknownAction,
    InputValidation,
    VariableUnresolved,
    UnknownReferenceRoot,
    ReferenceDepthExceeded,
    StepTimeout,
    WorkflowTimeout,
    AdapterFailure,
    Cancelled,
    CancelledDueToUpstream,
    LimitExceeded,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SchemaValidation => "SchemaValidation",
            ErrorKind::DuplicateStepId => "DuplicateStepId",
            ErrorKind::MissingDependency => "MissingDependency",
            ErrorKind::SelfDependency => "SelfDependency",
            ErrorKind::CycleDetected => "CycleDetected",
            ErrorKind::UnknownAdapter => "UnknownAdapter",
            ErrorKind::UnknownAction => "UnknownAction",
            ErrorKind::InputValidation => "InputValidation",
            ErrorKind::VariableUnresolved => "VariableUnresolved",
            ErrorKind::UnknownReferenceRoot => "UnknownReferenceRoot",
            ErrorKind::ReferenceDepthExceeded => "ReferenceDepthExceeded",
            ErrorKind::StepTimeout => "StepTimeout",
            ErrorKind::WorkflowTimeout => "WorkflowTimeout",
            ErrorKind::AdapterFailure => "AdapterFailure",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::CancelledDueToUpstream => "CancelledDueToUpstream",
            ErrorKind::LimitExceeded => "LimitExceeded",
            ErrorKind::InternalError => "InternalError",
        }
    }

    /// Process exit code for runs that fail with this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::SchemaValidation
            | ErrorKind::DuplicateStepId
            | ErrorKind::MissingDependency
            | ErrorKind::SelfDependency
            | ErrorKind::CycleDetected
            | ErrorKind::UnknownAdapter
            | ErrorKind::UnknownAction
            | ErrorKind::InputValidation => 2,
            ErrorKind::StepTimeout | ErrorKind::WorkflowTimeout => 124,
            ErrorKind::InternalError => 5,
            // LimitExceeded normally travels as a warning attached to
            // diagnostics and events; if it ever surfaces as a run
            // failure it is a runtime error like any other.
            ErrorKind::VariableUnresolved
            | ErrorKind::UnknownReferenceRoot
            | ErrorKind::ReferenceDepthExceeded
            | ErrorKind::AdapterFailure
            | ErrorKind::Cancelled
            | ErrorKind::CancelledDueToUpstream
            | ErrorKind::LimitExceeded => 4,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level engine error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Compile-time failure carrying the full diagnostic list.
    #[error("workflow failed to compile:\n{0}")]
    Compile(DiagnosticList),

    /// Runtime failure of the workflow as a whole.
    #[error("{message}")]
    Runtime { kind: ErrorKind, message: String },

    /// Programming defect; always aborts the run.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn runtime(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Runtime {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Compile(_) => ErrorKind::SchemaValidation,
            EngineError::Runtime { kind, .. } => *kind,
            EngineError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Compile(_) => 2,
            EngineError::Runtime { kind, .. } => kind.exit_code(),
            EngineError::Internal(_) => 5,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
