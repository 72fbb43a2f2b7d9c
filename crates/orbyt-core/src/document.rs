// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Raw workflow document model and schema validation.
//!
//! A workflow arrives as YAML or JSON. The document is first checked at
//! the value level so every shape problem can be reported with a
//! path-qualified diagnostic (`steps[2].retry.max`), then deserialized
//! into [`WorkflowDocument`] for normalization.

use crate::diagnostics::{codes, suggest, Diagnostic, DiagnosticList};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Keys accepted at the document root.
const ROOT_KEYS: &[&str] = &[
    "name",
    "description",
    "continueOnError",
    "timeout",
    "env",
    "vars",
    "steps",
];

/// Keys accepted on a step definition.
const STEP_KEYS: &[&str] = &[
    "id",
    "name",
    "uses",
    "with",
    "needs",
    "when",
    "continueOnError",
    "retry",
    "timeout",
    "env",
    "outputs",
];

/// Keys accepted on a retry block.
const RETRY_KEYS: &[&str] = &["max", "backoff", "delay"];

/// Accepted backoff strategies.
const BACKOFF_VALUES: &[&str] = &["linear", "exponential"];

/// A parsed workflow document, prior to normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub vars: HashMap<String, Value>,
    pub steps: Vec<StepDefinition>,
}

/// A raw step definition as written in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub uses: String,
    #[serde(default, rename = "with")]
    pub with: HashMap<String, Value>,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub continue_on_error: Option<bool>,
    #[serde(default)]
    pub retry: Option<RetryDefinition>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}

/// A raw retry block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDefinition {
    pub max: u32,
    #[serde(default)]
    pub backoff: Option<String>,
    #[serde(default)]
    pub delay: Option<u64>,
}

impl WorkflowDocument {
    /// Parses a YAML document, schema-validating before deserialization.
    pub fn from_yaml(input: &str) -> Result<Self, DiagnosticList> {
        let value: Value = serde_yaml::from_str(input).map_err(|e| {
            DiagnosticList::from(
                Diagnostic::error(codes::SCHEMA_INVALID_TYPE, format!("invalid YAML: {e}")),
            )
        })?;
        Self::from_value(value)
    }

    /// Parses a JSON document, schema-validating before deserialization.
    pub fn from_json(input: &str) -> Result<Self, DiagnosticList> {
        let value: Value = serde_json::from_str(input).map_err(|e| {
            DiagnosticList::from(
                Diagnostic::error(codes::SCHEMA_INVALID_TYPE, format!("invalid JSON: {e}")),
            )
        })?;
        Self::from_value(value)
    }

    /// Validates a raw value against the document schema, then
    /// deserializes it. All schema problems are reported together.
    pub fn from_value(value: Value) -> Result<Self, DiagnosticList> {
        let diagnostics = validate_schema(&value);
        if diagnostics.has_errors() {
            return Err(diagnostics);
        }
        serde_json::from_value(value).map_err(|e| {
            DiagnosticList::from(
                Diagnostic::error(codes::SCHEMA_INVALID_TYPE, format!("malformed document: {e}")),
            )
        })
    }
}

/// Validates document shape, returning every problem found.
pub fn validate_schema(value: &Value) -> DiagnosticList {
    let mut diagnostics = DiagnosticList::new();

    let Some(root) = value.as_object() else {
        diagnostics.push(
            Diagnostic::error(codes::SCHEMA_INVALID_TYPE, "workflow document must be a mapping")
                .with_path("."),
        );
        return diagnostics;
    };

    for key in root.keys() {
        if !ROOT_KEYS.contains(&key.as_str()) {
            let mut diagnostic =
                Diagnostic::error(codes::SCHEMA_UNKNOWN_KEY, format!("unknown key `{key}`"))
                    .with_path(key.clone());
            if let Some(candidate) = suggest(key, ROOT_KEYS.iter().copied()) {
                diagnostic = diagnostic.with_hint(format!("did you mean `{candidate}`?"));
            }
            diagnostics.push(diagnostic);
        }
    }

    match root.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        Some(Value::String(_)) => diagnostics.push(
            Diagnostic::error(codes::SCHEMA_MISSING_FIELD, "`name` must not be empty")
                .with_path("name"),
        ),
        Some(_) => diagnostics.push(type_error("name", "a string")),
        None => diagnostics.push(
            Diagnostic::error(codes::SCHEMA_MISSING_FIELD, "missing required key `name`")
                .with_path("name"),
        ),
    }

    check_optional_string(root, "description", &mut diagnostics);
    check_optional_bool(root, "continueOnError", &mut diagnostics);
    check_optional_string(root, "timeout", &mut diagnostics);
    check_string_map(root, "env", &mut diagnostics);
    if let Some(vars) = root.get("vars") {
        if !vars.is_object() {
            diagnostics.push(type_error("vars", "a mapping"));
        }
    }

    match root.get("steps") {
        // Zero steps is valid: the run completes immediately.
        Some(Value::Array(steps)) => {
            for (index, step) in steps.iter().enumerate() {
                validate_step(step, index, &mut diagnostics);
            }
        }
        Some(_) => diagnostics.push(type_error("steps", "an array")),
        None => diagnostics.push(
            Diagnostic::error(codes::SCHEMA_MISSING_FIELD, "missing required key `steps`")
                .with_path("steps"),
        ),
    }

    diagnostics
}

fn validate_step(step: &Value, index: usize, diagnostics: &mut DiagnosticList) {
    let base = format!("steps[{index}]");
    let Some(map) = step.as_object() else {
        diagnostics.push(
            Diagnostic::error(codes::SCHEMA_INVALID_TYPE, "step must be a mapping")
                .with_path(base),
        );
        return;
    };

    for key in map.keys() {
        if !STEP_KEYS.contains(&key.as_str()) {
            let mut diagnostic =
                Diagnostic::error(codes::SCHEMA_UNKNOWN_KEY, format!("unknown key `{key}`"))
                    .with_path(format!("{base}.{key}"));
            if let Some(candidate) = suggest(key, STEP_KEYS.iter().copied()) {
                diagnostic = diagnostic.with_hint(format!("did you mean `{candidate}`?"));
            }
            diagnostics.push(diagnostic);
        }
    }

    match map.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => {}
        Some(Value::String(_)) => diagnostics.push(
            Diagnostic::error(codes::SCHEMA_MISSING_FIELD, "`id` must not be empty")
                .with_path(format!("{base}.id")),
        ),
        Some(_) => diagnostics.push(type_error_at(&base, "id", "a string")),
        None => diagnostics.push(
            Diagnostic::error(codes::SCHEMA_MISSING_FIELD, "missing required key `id`")
                .with_path(format!("{base}.id")),
        ),
    }

    match map.get("uses") {
        Some(Value::String(_)) => {}
        Some(_) => diagnostics.push(type_error_at(&base, "uses", "a string")),
        None => diagnostics.push(
            Diagnostic::error(codes::SCHEMA_MISSING_FIELD, "missing required key `uses`")
                .with_path(format!("{base}.uses")),
        ),
    }

    if let Some(with) = map.get("with") {
        if !with.is_object() {
            diagnostics.push(type_error_at(&base, "with", "a mapping"));
        }
    }

    match map.get("needs") {
        Some(Value::Array(needs)) => {
            for (i, need) in needs.iter().enumerate() {
                if !need.is_string() {
                    diagnostics.push(
                        Diagnostic::error(codes::SCHEMA_INVALID_TYPE, "`needs` entries must be strings")
                            .with_path(format!("{base}.needs[{i}]")),
                    );
                }
            }
        }
        Some(_) => diagnostics.push(type_error_at(&base, "needs", "an array of step ids")),
        None => {}
    }

    if let Some(when) = map.get("when") {
        if !when.is_string() {
            diagnostics.push(type_error_at(&base, "when", "a string expression"));
        }
    }
    if let Some(flag) = map.get("continueOnError") {
        if !flag.is_boolean() {
            diagnostics.push(type_error_at(&base, "continueOnError", "a boolean"));
        }
    }
    if let Some(timeout) = map.get("timeout") {
        if !timeout.is_string() {
            diagnostics.push(type_error_at(&base, "timeout", "a duration string"));
        }
    }
    if let Some(env) = map.get("env") {
        validate_string_map(env, &format!("{base}.env"), diagnostics);
    }
    if let Some(outputs) = map.get("outputs") {
        validate_string_map(outputs, &format!("{base}.outputs"), diagnostics);
    }
    if let Some(retry) = map.get("retry") {
        validate_retry(retry, &base, diagnostics);
    }
}

fn validate_retry(retry: &Value, base: &str, diagnostics: &mut DiagnosticList) {
    let path = format!("{base}.retry");
    let Some(map) = retry.as_object() else {
        diagnostics.push(
            Diagnostic::error(codes::SCHEMA_INVALID_TYPE, "`retry` must be a mapping")
                .with_path(path),
        );
        return;
    };

    for key in map.keys() {
        if !RETRY_KEYS.contains(&key.as_str()) {
            let mut diagnostic =
                Diagnostic::error(codes::SCHEMA_UNKNOWN_KEY, format!("unknown key `{key}`"))
                    .with_path(format!("{path}.{key}"));
            if let Some(candidate) = suggest(key, RETRY_KEYS.iter().copied()) {
                diagnostic = diagnostic.with_hint(format!("did you mean `{candidate}`?"));
            }
            diagnostics.push(diagnostic);
        }
    }

    match map.get("max") {
        Some(value) if value.as_u64().is_some() => {}
        Some(_) => diagnostics.push(
            Diagnostic::error(codes::SCHEMA_INVALID_TYPE, "`max` must be a non-negative integer")
                .with_path(format!("{path}.max")),
        ),
        None => diagnostics.push(
            Diagnostic::error(codes::SCHEMA_MISSING_FIELD, "missing required key `max`")
                .with_path(format!("{path}.max")),
        ),
    }

    if let Some(backoff) = map.get("backoff") {
        match backoff.as_str() {
            Some(value) if BACKOFF_VALUES.contains(&value) => {}
            Some(value) => {
                let mut diagnostic = Diagnostic::error(
                    codes::SCHEMA_INVALID_TYPE,
                    format!("`backoff` must be one of linear, exponential (got `{value}`)"),
                )
                .with_path(format!("{path}.backoff"));
                if let Some(candidate) = suggest(value, BACKOFF_VALUES.iter().copied()) {
                    diagnostic = diagnostic.with_hint(format!("did you mean `{candidate}`?"));
                }
                diagnostics.push(diagnostic);
            }
            None => diagnostics.push(
                Diagnostic::error(codes::SCHEMA_INVALID_TYPE, "`backoff` must be a string")
                    .with_path(format!("{path}.backoff")),
            ),
        }
    }

    if let Some(delay) = map.get("delay") {
        if delay.as_u64().is_none() {
            diagnostics.push(
                Diagnostic::error(
                    codes::SCHEMA_INVALID_TYPE,
                    "`delay` must be a non-negative integer (milliseconds)",
                )
                .with_path(format!("{path}.delay")),
            );
        }
    }
}

fn check_optional_string(
    root: &serde_json::Map<String, Value>,
    key: &str,
    diagnostics: &mut DiagnosticList,
) {
    if let Some(value) = root.get(key) {
        if !value.is_string() {
            diagnostics.push(type_error(key, "a string"));
        }
    }
}

fn check_optional_bool(
    root: &serde_json::Map<String, Value>,
    key: &str,
    diagnostics: &mut DiagnosticList,
) {
    if let Some(value) = root.get(key) {
        if !value.is_boolean() {
            diagnostics.push(type_error(key, "a boolean"));
        }
    }
}

fn check_string_map(
    root: &serde_json::Map<String, Value>,
    key: &str,
    diagnostics: &mut DiagnosticList,
) {
    if let Some(value) = root.get(key) {
        validate_string_map(value, key, diagnostics);
    }
}

fn validate_string_map(value: &Value, path: &str, diagnostics: &mut DiagnosticList) {
    match value.as_object() {
        Some(map) => {
            for (key, entry) in map {
                if !entry.is_string() {
                    diagnostics.push(
                        Diagnostic::error(codes::SCHEMA_INVALID_TYPE, "value must be a string")
                            .with_path(format!("{path}.{key}")),
                    );
                }
            }
        }
        None => diagnostics.push(
            Diagnostic::error(codes::SCHEMA_INVALID_TYPE, "must be a mapping of strings")
                .with_path(path.to_string()),
        ),
    }
}

fn type_error(key: &str, expected: &str) -> Diagnostic {
    Diagnostic::error(codes::SCHEMA_INVALID_TYPE, format!("`{key}` must be {expected}"))
        .with_path(key.to_string())
}

fn type_error_at(base: &str, key: &str, expected: &str) -> Diagnostic {
    Diagnostic::error(codes::SCHEMA_INVALID_TYPE, format!("`{key}` must be {expected}"))
        .with_path(format!("{base}.{key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_document_parses() {
        let doc = WorkflowDocument::from_yaml(
            r#"
name: fetch
steps:
  - id: a
    uses: http.request.get
    with:
      url: https://example.com
"#,
        )
        .unwrap();
        assert_eq!(doc.name, "fetch");
        assert_eq!(doc.steps.len(), 1);
        assert_eq!(doc.steps[0].uses, "http.request.get");
        assert!(!doc.continue_on_error);
    }

    #[test]
    fn test_missing_steps_rejected() {
        let err = WorkflowDocument::from_yaml("name: empty\n").unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("missing required key `steps`"));
    }

    #[test]
    fn test_unknown_root_key_gets_suggestion() {
        let diagnostics = validate_schema(&json!({
            "name": "x",
            "stepss": [],
        }));
        let entry = diagnostics
            .iter()
            .find(|d| d.code == codes::SCHEMA_UNKNOWN_KEY)
            .expect("unknown key diagnostic");
        assert_eq!(entry.hint.as_deref(), Some("did you mean `steps`?"));
    }

    #[test]
    fn test_step_paths_are_indexed() {
        let diagnostics = validate_schema(&json!({
            "name": "x",
            "steps": [
                {"id": "a", "uses": "noop"},
                {"id": "b", "uses": 42},
            ],
        }));
        let entry = diagnostics
            .iter()
            .find(|d| d.path.as_deref() == Some("steps[1].uses"))
            .expect("path-qualified diagnostic");
        assert!(entry.message.contains("`uses` must be a string"));
    }

    #[test]
    fn test_retry_shape_checked() {
        let diagnostics = validate_schema(&json!({
            "name": "x",
            "steps": [{
                "id": "a",
                "uses": "noop",
                "retry": {"max": "three", "backoff": "expo"},
            }],
        }));
        assert!(diagnostics
            .iter()
            .any(|d| d.path.as_deref() == Some("steps[0].retry.max")));
        let backoff = diagnostics
            .iter()
            .find(|d| d.path.as_deref() == Some("steps[0].retry.backoff"))
            .unwrap();
        assert_eq!(backoff.hint.as_deref(), Some("did you mean `exponential`?"));
    }

    #[test]
    fn test_multiple_errors_reported_together() {
        let diagnostics = validate_schema(&json!({
            "steps": [{"uses": 1}],
            "timeout": 15,
        }));
        assert!(diagnostics.len() >= 3);
    }

    #[test]
    fn test_zero_steps_is_valid() {
        let doc = WorkflowDocument::from_yaml("name: empty\nsteps: []\n").unwrap();
        assert!(doc.steps.is_empty());
    }

    #[test]
    fn test_json_document_parses() {
        let doc = WorkflowDocument::from_json(
            r#"{"name":"j","steps":[{"id":"a","uses":"shell.run","with":{"command":"true"}}]}"#,
        )
        .unwrap();
        assert_eq!(doc.steps[0].id, "a");
    }
}
