// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Variable reference resolution.
//!
//! `${...}` references are expanded lazily, at the moment a step is
//! dispatched, against a point-in-time [`ResolutionScope`]. A value that
//! is a single pure reference keeps the referenced value's native type;
//! a reference embedded in a larger string is stringified (primitives
//! as-is, containers as compact JSON).

use crate::diagnostics::{codes, suggest, Diagnostic, DiagnosticList};
use crate::plan::PlannedStep;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("reference regex"));

/// Maximum container recursion depth during resolution.
pub const MAX_DEPTH: usize = 32;

/// Resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown reference root `{0}`")]
    UnknownRoot(String),
    #[error("reference `{0}` does not resolve to a value")]
    Unresolved(String),
    #[error("step `{0}` has not produced output")]
    UnresolvedStepOutput(String),
    #[error("reference depth exceeded ({MAX_DEPTH})")]
    DepthExceeded,
    #[error("malformed reference `{0}`")]
    Malformed(String),
}

/// Point-in-time view the resolver reads from.
#[derive(Debug, Clone, Default)]
pub struct ResolutionScope {
    pub vars: HashMap<String, Value>,
    pub env: HashMap<String, String>,
    pub secrets: HashMap<String, String>,
    /// Output per terminal step; a skipped step is present with `Null`.
    pub outputs: HashMap<String, Value>,
    pub workflow_name: String,
    pub run_id: String,
}

/// Expands every `${...}` reference in `value`.
pub fn resolve_value(value: &Value, scope: &ResolutionScope) -> Result<Value, ResolveError> {
    resolve_at_depth(value, scope, 0)
}

fn resolve_at_depth(
    value: &Value,
    scope: &ResolutionScope,
    depth: usize,
) -> Result<Value, ResolveError> {
    if depth > MAX_DEPTH {
        return Err(ResolveError::DepthExceeded);
    }
    match value {
        Value::String(text) => resolve_string(text, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_at_depth(item, scope, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, entry) in map {
                resolved.insert(key.clone(), resolve_at_depth(entry, scope, depth + 1)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(text: &str, scope: &ResolutionScope) -> Result<Value, ResolveError> {
    // Pure single reference: preserve the native type.
    if let Some(captures) = REFERENCE_RE.captures(text) {
        let whole = captures.get(0).expect("capture 0");
        if whole.start() == 0 && whole.end() == text.len() {
            return resolve_reference(&captures[1], scope);
        }
    } else {
        return Ok(Value::String(text.to_string()));
    }

    let mut rendered = String::with_capacity(text.len());
    let mut last = 0;
    for captures in REFERENCE_RE.captures_iter(text) {
        let whole = captures.get(0).expect("capture 0");
        rendered.push_str(&text[last..whole.start()]);
        let resolved = resolve_reference(&captures[1], scope)?;
        rendered.push_str(&stringify(&resolved));
        last = whole.end();
    }
    rendered.push_str(&text[last..]);
    Ok(Value::String(rendered))
}

/// Canonical interpolation rule: primitives render as-is, containers as
/// compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Resolves one dotted reference path against the scope.
pub fn resolve_reference(path: &str, scope: &ResolutionScope) -> Result<Value, ResolveError> {
    let trimmed = path.trim();
    let mut segments = trimmed.split('.');
    let root = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ResolveError::Malformed(trimmed.to_string()))?;
    let rest: Vec<&str> = segments.collect();

    match root {
        "vars" => {
            let name = rest.first().ok_or_else(|| malformed(trimmed))?;
            let value = scope
                .vars
                .get(*name)
                .ok_or_else(|| ResolveError::Unresolved(trimmed.to_string()))?;
            walk(value, &rest[1..], trimmed)
        }
        "env" => {
            let name = rest.first().ok_or_else(|| malformed(trimmed))?;
            scope
                .env
                .get(*name)
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| ResolveError::Unresolved(trimmed.to_string()))
        }
        "secrets" => {
            let name = rest.first().ok_or_else(|| malformed(trimmed))?;
            scope
                .secrets
                .get(*name)
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| ResolveError::Unresolved(trimmed.to_string()))
        }
        "steps" => {
            let step_id = rest.first().ok_or_else(|| malformed(trimmed))?;
            if rest.get(1) != Some(&"output") {
                return Err(malformed(trimmed));
            }
            let output = scope
                .outputs
                .get(*step_id)
                .ok_or_else(|| ResolveError::UnresolvedStepOutput(step_id.to_string()))?;
            walk(output, &rest[2..], trimmed)
        }
        "workflow" => match rest.as_slice() {
            ["name"] => Ok(Value::String(scope.workflow_name.clone())),
            ["runId"] => Ok(Value::String(scope.run_id.clone())),
            _ => Err(malformed(trimmed)),
        },
        other => Err(ResolveError::UnknownRoot(other.to_string())),
    }
}

fn malformed(path: &str) -> ResolveError {
    ResolveError::Malformed(path.to_string())
}

/// Generic path walk over nested containers; numeric segments index
/// arrays.
fn walk(value: &Value, segments: &[&str], full_path: &str) -> Result<Value, ResolveError> {
    if segments.len() > MAX_DEPTH {
        return Err(ResolveError::DepthExceeded);
    }
    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Object(map) => map
                .get(*segment)
                .ok_or_else(|| ResolveError::Unresolved(full_path.to_string()))?,
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index))
                .ok_or_else(|| ResolveError::Unresolved(full_path.to_string()))?,
            _ => return Err(ResolveError::Unresolved(full_path.to_string())),
        };
    }
    Ok(current.clone())
}

/// Walks a dotted path inside a value: objects by key, arrays by
/// numeric index. Used for output projection.
pub fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    walk(value, &segments, path).ok()
}

/// Evaluates a `when` expression to a boolean.
///
/// The expression is resolved first; the result is falsy when it is
/// `null`, `false`, `0`, the empty string, `"false"` or `"0"`.
pub fn evaluate_when(expression: &str, scope: &ResolutionScope) -> Result<bool, ResolveError> {
    let resolved = resolve_string(expression, scope)?;
    Ok(truthy(&resolved))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Compile-time pass: every `${steps.<id>...}` reference in a step's
/// input must name a declared step. Data-flow acyclicity is the graph's
/// concern, not this pass's.
pub fn validate_step_references(steps: &[PlannedStep]) -> DiagnosticList {
    let declared: Vec<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    let mut diagnostics = DiagnosticList::new();

    for (index, step) in steps.iter().enumerate() {
        for (key, value) in &step.input {
            collect_step_refs(value, &mut |referenced| {
                if !declared.contains(&referenced) {
                    let mut diagnostic = Diagnostic::error(
                        codes::REF_UNKNOWN_STEP,
                        format!(
                            "step `{}` references output of undeclared step `{referenced}`",
                            step.id
                        ),
                    )
                    .with_path(format!("steps[{index}].with.{key}"));
                    if let Some(candidate) = suggest(referenced, declared.iter().copied()) {
                        diagnostic = diagnostic.with_hint(format!("did you mean `{candidate}`?"));
                    }
                    diagnostics.push(diagnostic);
                }
            });
        }
    }
    diagnostics
}

fn collect_step_refs(value: &Value, found: &mut impl FnMut(&str)) {
    match value {
        Value::String(text) => {
            for captures in REFERENCE_RE.captures_iter(text) {
                let path = captures[1].trim();
                let mut segments = path.split('.');
                if segments.next() == Some("steps") {
                    if let Some(step_id) = segments.next() {
                        found(step_id);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_step_refs(item, found);
            }
        }
        Value::Object(map) => {
            for entry in map.values() {
                collect_step_refs(entry, found);
            }
        }
        _ => {}
    }
}
