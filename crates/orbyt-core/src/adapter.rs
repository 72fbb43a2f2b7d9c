// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Adapter contract and registry.
//!
//! Adapters are the only way the engine performs side effects. They
//! validate their own inputs, never panic across the boundary, and
//! report every user-domain failure as an [`AdapterResult`] with
//! `success = false`. Cancellation arrives through
//! [`AdapterContext::cancellation`]; a well-behaved adapter aborts work
//! when the token fires.

use crate::limits::{Priority, ResourceLimits, SandboxLevel};
use crate::plan::AdapterKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Failure payload of an adapter result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Normalized outcome of one adapter invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResult {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AdapterError>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Symbolic side-effect tags, e.g. `fs:write`, `net:request`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<String>,
}

impl AdapterResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            duration_ms: 0,
            logs: Vec::new(),
            warnings: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn fail(error: AdapterError) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error),
            duration_ms: 0,
            logs: Vec::new(),
            warnings: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn with_effect(mut self, effect: impl Into<String>) -> Self {
        self.effects.push(effect.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Which ambient resources an adapter touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAccess {
    pub filesystem: bool,
    pub network: bool,
}

/// Relative invocation cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostHint {
    #[default]
    Low,
    Medium,
    High,
}

/// Static adapter capability metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub concurrent: bool,
    pub cacheable: bool,
    pub idempotent: bool,
    pub resources: ResourceAccess,
    pub cost: CostHint,
}

/// Masks known secret values in logs and event payloads.
#[derive(Debug, Clone, Default)]
pub struct SecretMask {
    values: Vec<String>,
}

impl SecretMask {
    pub fn new(values: impl IntoIterator<Item = String>) -> Self {
        Self {
            values: values.into_iter().filter(|v| !v.is_empty()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replaces each secret occurrence with `***`.
    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for value in &self.values {
            if masked.contains(value.as_str()) {
                masked = masked.replace(value.as_str(), "***");
            }
        }
        masked
    }

    /// Recursively masks every string in a JSON value.
    pub fn mask_value(&self, value: &Value) -> Value {
        if self.is_empty() {
            return value.clone();
        }
        match value {
            Value::String(s) => Value::String(self.mask(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.mask_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.mask_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Per-invocation context handed to an adapter.
///
/// Everything in here is already limit-enforced; adapters never see
/// user-requested values.
#[derive(Clone)]
pub struct AdapterContext {
    pub run_id: String,
    pub step_id: String,
    pub env: HashMap<String, String>,
    /// Enforced wall-clock budget for this attempt, in milliseconds.
    pub deadline_ms: u64,
    pub sandbox: SandboxLevel,
    pub resources: ResourceLimits,
    pub priority: Priority,
    /// Fires when the attempt must abort (timeout or workflow abort).
    pub cancellation: CancellationToken,
    mask: SecretMask,
    logs: Arc<Mutex<Vec<String>>>,
}

impl AdapterContext {
    pub fn new(
        run_id: impl Into<String>,
        step_id: impl Into<String>,
        env: HashMap<String, String>,
        deadline_ms: u64,
        sandbox: SandboxLevel,
        resources: ResourceLimits,
        priority: Priority,
        cancellation: CancellationToken,
        mask: SecretMask,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
            env,
            deadline_ms,
            sandbox,
            resources,
            priority,
            cancellation,
            mask,
            logs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Records an adapter log line, secret-masked, and mirrors it to
    /// tracing at debug level.
    pub fn log(&self, message: impl AsRef<str>) {
        let masked = self.mask.mask(message.as_ref());
        tracing::debug!(step_id = %self.step_id, "{masked}");
        self.logs.lock().push(masked);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn mask(&self) -> &SecretMask {
        &self.mask
    }

    /// Drains log lines recorded through [`Self::log`].
    pub fn take_logs(&self) -> Vec<String> {
        std::mem::take(&mut *self.logs.lock())
    }
}

impl std::fmt::Debug for AdapterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterContext")
            .field("run_id", &self.run_id)
            .field("step_id", &self.step_id)
            .field("deadline_ms", &self.deadline_ms)
            .field("sandbox", &self.sandbox)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for dyn Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter").field("name", &self.name()).finish()
    }
}

/// The uniform contract every adapter implements.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Glob patterns for supported actions, e.g. `http.request.*`.
    fn supported_actions(&self) -> Vec<String>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Executes one action. User-domain failures come back as a failed
    /// [`AdapterResult`]; only programming defects may panic.
    async fn execute(
        &self,
        action: &str,
        input: HashMap<String, Value>,
        ctx: &AdapterContext,
    ) -> AdapterResult;
}

/// Matches `action` against a glob pattern, returning the length of the
/// literal prefix on success (longer is more specific).
fn glob_match(pattern: &str, action: &str) -> Option<usize> {
    if pattern == "*" {
        return Some(0);
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        if action == prefix || action.starts_with(&format!("{prefix}.")) {
            return Some(prefix.len());
        }
        return None;
    }
    (pattern == action).then_some(pattern.len())
}

/// Dispatch failure from the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no adapter registered for kind `{0}`")]
    UnknownAdapter(String),
    #[error("adapter `{adapter}` does not support action `{action}`")]
    UnknownAction { adapter: String, action: String },
}

/// Registry of adapters keyed by kind. Read-only once the engine starts.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<AdapterKind, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter for a kind, replacing any previous one.
    pub fn register(&mut self, kind: AdapterKind, adapter: Arc<dyn Adapter>) {
        tracing::debug!(kind = %kind, adapter = adapter.name(), "Registered adapter");
        self.adapters.insert(kind, adapter);
    }

    pub fn get(&self, kind: AdapterKind) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Exact-name lookup across registered adapters.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters
            .values()
            .find(|adapter| adapter.name() == name)
            .cloned()
    }

    pub fn kinds(&self) -> Vec<AdapterKind> {
        self.adapters.keys().copied().collect()
    }

    /// Capability metadata of the adapter that would serve `action`.
    ///
    /// Consumed by the step runtime to annotate lifecycle events; the
    /// scheduler never makes placement decisions from it.
    pub fn capabilities_for(&self, action: &str) -> Option<Capabilities> {
        self.resolve(action).ok().map(|adapter| adapter.capabilities())
    }

    /// Resolves the adapter for an action: kind from the first token,
    /// then the action must match one of the adapter's glob patterns
    /// (the longest-prefix match wins; here it only confirms support).
    pub fn resolve(&self, action: &str) -> Result<Arc<dyn Adapter>, DispatchError> {
        let kind = AdapterKind::from_action(action);
        let adapter = self
            .get(kind)
            .ok_or_else(|| DispatchError::UnknownAdapter(kind.to_string()))?;
        let best = adapter
            .supported_actions()
            .iter()
            .filter_map(|pattern| glob_match(pattern, action))
            .max();
        match best {
            Some(_) => Ok(adapter),
            None => Err(DispatchError::UnknownAction {
                adapter: adapter.name().to_string(),
                action: action.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.adapters.values().map(|a| a.name()).collect();
        f.debug_struct("AdapterRegistry").field("adapters", &names).finish()
    }
}

/// Fails fast when a required string input is missing or mistyped.
pub fn require_string<'a>(
    input: &'a HashMap<String, Value>,
    key: &str,
) -> Result<&'a str, AdapterError> {
    match input.get(key) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(AdapterError::new(format!("input `{key}` must be a string"))
            .with_code("InputValidation")),
        None => Err(AdapterError::new(format!("missing required input `{key}`"))
            .with_code("InputValidation")),
    }
}

/// Optional string input.
pub fn optional_string<'a>(input: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// Optional unsigned integer input.
pub fn optional_u64(input: &HashMap<String, Value>, key: &str) -> Option<u64> {
    input.get(key).and_then(Value::as_u64)
}

/// Optional boolean input, with a default.
pub fn bool_input(input: &HashMap<String, Value>, key: &str, default: bool) -> bool {
    input.get(key).and_then(Value::as_bool).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoAdapter;

    #[async_trait]
    impl Adapter for EchoAdapter {
        fn name(&self) -> &str {
            "echo"
        }

        fn supported_actions(&self) -> Vec<String> {
            vec!["http.request.*".to_string(), "http.ping".to_string()]
        }

        async fn execute(
            &self,
            action: &str,
            input: HashMap<String, Value>,
            _ctx: &AdapterContext,
        ) -> AdapterResult {
            AdapterResult::ok(json!({"action": action, "input": input}))
        }
    }

    fn context() -> AdapterContext {
        AdapterContext::new(
            "run_1",
            "step_1",
            HashMap::new(),
            1_000,
            SandboxLevel::Strict,
            ResourceLimits {
                cpu_millis: 1_000,
                memory_mb: 512,
                disk_mb: 1_024,
            },
            Priority::Normal,
            CancellationToken::new(),
            SecretMask::new(["s3cret".to_string()]),
        )
    }

    #[test]
    fn test_glob_match_prefix_and_exact() {
        assert_eq!(glob_match("http.request.*", "http.request.get"), Some(12));
        assert_eq!(glob_match("http.request.*", "http.request"), Some(12));
        assert_eq!(glob_match("http.request.*", "http.ping"), None);
        assert_eq!(glob_match("http.ping", "http.ping"), Some(9));
        assert_eq!(glob_match("*", "anything.at.all"), Some(0));
    }

    #[test]
    fn test_registry_resolution() {
        let mut registry = AdapterRegistry::new();
        registry.register(AdapterKind::Http, Arc::new(EchoAdapter));

        assert!(registry.resolve("http.request.get").is_ok());
        assert!(registry.resolve("http.ping").is_ok());
        assert_eq!(
            registry.resolve("http.stream.open").unwrap_err(),
            DispatchError::UnknownAction {
                adapter: "echo".to_string(),
                action: "http.stream.open".to_string(),
            }
        );
        assert_eq!(
            registry.resolve("queue.publish").unwrap_err(),
            DispatchError::UnknownAdapter("queue".to_string())
        );
    }

    #[test]
    fn test_registry_lookup_by_name() {
        let mut registry = AdapterRegistry::new();
        registry.register(AdapterKind::Http, Arc::new(EchoAdapter));
        assert!(registry.get_by_name("echo").is_some());
        assert!(registry.get_by_name("nope").is_none());
    }

    #[test]
    fn test_capabilities_surfaced_per_action() {
        let mut registry = AdapterRegistry::new();
        registry.register(AdapterKind::Http, Arc::new(EchoAdapter));
        assert_eq!(
            registry.capabilities_for("http.request.get"),
            Some(Capabilities::default())
        );
        assert_eq!(registry.capabilities_for("queue.publish"), None);
    }

    #[test]
    fn test_secret_masking_in_logs() {
        let ctx = context();
        ctx.log("token is s3cret value");
        let logs = ctx.take_logs();
        assert_eq!(logs, vec!["token is *** value"]);
    }

    #[test]
    fn test_mask_value_recursive() {
        let mask = SecretMask::new(["s3cret".to_string()]);
        let masked = mask.mask_value(&json!({
            "auth": "Bearer s3cret",
            "nested": ["s3cret", 42],
        }));
        assert_eq!(masked, json!({"auth": "Bearer ***", "nested": ["***", 42]}));
    }

    #[test]
    fn test_required_input_helpers() {
        let input = HashMap::from([("url".to_string(), json!("https://x"))]);
        assert_eq!(require_string(&input, "url").unwrap(), "https://x");
        let err = require_string(&input, "body").unwrap_err();
        assert_eq!(err.code.as_deref(), Some("InputValidation"));
    }

    #[tokio::test]
    async fn test_adapter_execute_roundtrip() {
        let adapter = EchoAdapter;
        let result = adapter
            .execute("http.request.get", HashMap::new(), &context())
            .await;
        assert!(result.success);
        assert_eq!(result.data["action"], json!("http.request.get"));
    }
}
