// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Workflow compilation: document → schema validation → normalization →
//! graph construction → cycle detection → topological layering → static
//! reference validation.
//!
//! Compilation is all-or-nothing: every diagnostic the pipeline can
//! produce is aggregated and surfaced together; nothing partial leaks
//! out.

use crate::dag::WorkflowDag;
use crate::diagnostics::{codes, Diagnostic, DiagnosticList};
use crate::document::WorkflowDocument;
use crate::plan::{normalize, Workflow};
use crate::resolver::validate_step_references;
use serde_json::Value;

/// A fully compiled workflow, ready for scheduling.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub plan: Workflow,
    pub dag: WorkflowDag,
    /// Kahn layers: steps within a layer are parallel-eligible.
    pub layers: Vec<Vec<String>>,
    /// Non-fatal diagnostics (e.g. clamped limits) collected during
    /// compilation.
    pub warnings: DiagnosticList,
}

impl CompiledWorkflow {
    pub fn step(&self, id: &str) -> Option<&crate::plan::PlannedStep> {
        self.plan.steps.iter().find(|s| s.id == id)
    }

    /// Flattened topological order.
    pub fn execution_order(&self) -> Vec<String> {
        self.layers.iter().flatten().cloned().collect()
    }
}

/// Compiles a YAML document.
pub fn compile_yaml(input: &str) -> Result<CompiledWorkflow, DiagnosticList> {
    compile_document(&WorkflowDocument::from_yaml(input)?)
}

/// Compiles a JSON document.
pub fn compile_json(input: &str) -> Result<CompiledWorkflow, DiagnosticList> {
    compile_document(&WorkflowDocument::from_json(input)?)
}

/// Compiles a raw document value.
pub fn compile_value(value: Value) -> Result<CompiledWorkflow, DiagnosticList> {
    compile_document(&WorkflowDocument::from_value(value)?)
}

/// Compiles a schema-validated document into an executable plan.
pub fn compile_document(document: &WorkflowDocument) -> Result<CompiledWorkflow, DiagnosticList> {
    let (plan, warnings) = normalize(document)?;
    compile_plan(plan, warnings)
}

/// Compiles an already-normalized plan. Recompiling a compiled plan is
/// idempotent.
pub fn compile_plan(
    plan: Workflow,
    warnings: DiagnosticList,
) -> Result<CompiledWorkflow, DiagnosticList> {
    let mut diagnostics = DiagnosticList::new();

    let reference_errors = validate_step_references(&plan.steps);
    diagnostics.extend(reference_errors);

    let dag = match WorkflowDag::build(&plan.steps) {
        Ok(dag) => dag,
        Err(graph_errors) => {
            diagnostics.extend(graph_errors);
            return Err(diagnostics);
        }
    };

    if let Some(cycle) = dag.detect_cycle() {
        diagnostics.push(
            Diagnostic::error(
                codes::GRAPH_CYCLE,
                format!("dependency cycle detected: {}", cycle.join(" → ")),
            )
            .with_hint("remove one of the `needs` edges to break the cycle"),
        );
        return Err(diagnostics);
    }

    let layers = match dag.layers() {
        Ok(layers) => layers,
        Err(diagnostic) => {
            diagnostics.push(diagnostic);
            return Err(diagnostics);
        }
    };

    if diagnostics.has_errors() {
        return Err(diagnostics);
    }

    Ok(CompiledWorkflow {
        plan,
        dag,
        layers,
        warnings,
    })
}
