// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Structured diagnostics for compile and runtime failures.
//!
//! Every user-facing failure is reported as a [`Diagnostic`] carrying a
//! stable code, a severity, an optional document path and an optional
//! hint. Multi-error reporting aggregates diagnostics into a
//! [`DiagnosticList`] so compilation can surface every problem at once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable diagnostic codes.
///
/// Codes are grouped by subsystem: `SCH` (schema), `PLN` (normalization),
/// `GRF` (graph), `REF` (references), `LIM` (limits), `ADP` (adapters),
/// `RUN` (runtime), `INT` (internal).
pub mod codes {
    pub const SCHEMA_INVALID_TYPE: &str = "ORBYT-SCH-001";
    pub const SCHEMA_MISSING_FIELD: &str = "ORBYT-SCH-002";
    pub const SCHEMA_UNKNOWN_KEY: &str = "ORBYT-SCH-003";
    pub const SCHEMA_EMPTY_STEPS: &str = "ORBYT-SCH-004";

    pub const PLAN_EMPTY_STEP_ID: &str = "ORBYT-PLN-001";
    pub const PLAN_INVALID_ACTION: &str = "ORBYT-PLN-002";
    pub const PLAN_MISSING_INPUT: &str = "ORBYT-PLN-003";
    pub const PLAN_INVALID_RETRY: &str = "ORBYT-PLN-004";
    pub const PLAN_INVALID_DURATION: &str = "ORBYT-PLN-005";

    pub const GRAPH_DUPLICATE_ID: &str = "ORBYT-GRF-001";
    pub const GRAPH_SELF_DEPENDENCY: &str = "ORBYT-GRF-002";
    pub const GRAPH_MISSING_DEPENDENCY: &str = "ORBYT-GRF-003";
    pub const GRAPH_CYCLE: &str = "ORBYT-GRF-004";
    pub const GRAPH_INCOMPLETE_ORDER: &str = "ORBYT-GRF-005";

    pub const REF_UNKNOWN_ROOT: &str = "ORBYT-REF-001";
    pub const REF_UNKNOWN_STEP: &str = "ORBYT-REF-002";
    pub const REF_UNRESOLVED: &str = "ORBYT-REF-003";
    pub const REF_DEPTH_EXCEEDED: &str = "ORBYT-REF-004";

    pub const LIMIT_EXCEEDED: &str = "ORBYT-LIM-001";

    pub const ADAPTER_UNKNOWN: &str = "ORBYT-ADP-001";
    pub const ADAPTER_UNKNOWN_ACTION: &str = "ORBYT-ADP-002";
    pub const ADAPTER_INPUT: &str = "ORBYT-ADP-003";
    pub const ADAPTER_FAILURE: &str = "ORBYT-ADP-004";

    pub const RUN_STEP_TIMEOUT: &str = "ORBYT-RUN-001";
    pub const RUN_WORKFLOW_TIMEOUT: &str = "ORBYT-RUN-002";
    pub const RUN_CANCELLED: &str = "ORBYT-RUN-003";
    pub const RUN_UPSTREAM_CANCELLED: &str = "ORBYT-RUN-004";

    pub const INTERNAL: &str = "ORBYT-INT-001";
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A single structured error record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable code, e.g. `ORBYT-SCH-001`.
    pub code: String,
    /// Severity class.
    pub severity: Severity,
    /// Dot/bracket path to the offending location, e.g. `steps[2].retry.max`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Actionable hint, e.g. a typo suggestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Additional machine-readable context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl Diagnostic {
    /// Creates an error-severity diagnostic.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity: Severity::Error,
            path: None,
            message: message.into(),
            hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Creates a warning-severity diagnostic.
    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message)
        }
    }

    /// Attaches a document path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attaches a hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attaches a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Subsystem label derived from the code, e.g. `Schema` for `ORBYT-SCH-001`.
    pub fn category(&self) -> &'static str {
        match self.code.split('-').nth(1) {
            Some("SCH") => "Schema",
            Some("PLN") => "Plan",
            Some("GRF") => "Graph",
            Some("REF") => "Reference",
            Some("LIM") => "Limits",
            Some("ADP") => "Adapter",
            Some("RUN") => "Runtime",
            Some("INT") => "Internal",
            _ => "Engine",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.severity, self.category(), self.code)?;
        if let Some(path) = &self.path {
            write!(f, " at {}", path)?;
        }
        write!(f, "\n{}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n→ Hint: {}", hint)?;
        }
        Ok(())
    }
}

/// Separator rendered between aggregated diagnostics.
pub const DIAGNOSTIC_SEPARATOR: &str = "────────────────────────────────────────";

/// An aggregated, ordered collection of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticList {
    entries: Vec<Diagnostic>,
}

impl DiagnosticList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: DiagnosticList) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if any entry has error severity.
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }
}

impl fmt::Display for DiagnosticList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "\n{}\n", DIAGNOSTIC_SEPARATOR)?;
            }
            write!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

impl From<Diagnostic> for DiagnosticList {
    fn from(diagnostic: Diagnostic) -> Self {
        Self {
            entries: vec![diagnostic],
        }
    }
}

impl IntoIterator for DiagnosticList {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Normalized similarity between two strings: `1 − dist / max_len`.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let dist = strsim::levenshtein(a, b);
    1.0 - dist as f64 / max_len as f64
}

/// Returns the closest candidate to `input` when similarity ≥ 0.6.
///
/// Comparison is case-insensitive; the returned string is the candidate
/// in its original casing.
pub fn suggest<'a, I>(input: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = input.to_lowercase();
    candidates
        .into_iter()
        .map(|candidate| (candidate, similarity(&needle, &candidate.to_lowercase())))
        .filter(|(_, score)| *score >= 0.6)
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(candidate, _)| candidate)
}

/// Returns up to `n` candidates with similarity ≥ 0.5, best first.
pub fn suggest_top_n<'a, I>(input: &str, candidates: I, n: usize) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = input.to_lowercase();
    let mut scored: Vec<(&str, f64)> = candidates
        .into_iter()
        .map(|candidate| (candidate, similarity(&needle, &candidate.to_lowercase())))
        .filter(|(_, score)| *score >= 0.5)
        .collect();
    scored.sort_by(|(_, a), (_, b)| b.total_cmp(a));
    scored.into_iter().take(n).map(|(c, _)| c).collect()
}
