// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Secrets adapter.
//!
//! `secrets.{get,list}` against a static provider map. Returned values
//! are tagged with a `secrets:read` effect; the engine's secret mask
//! redacts them from logs and events.

use async_trait::async_trait;
use orbyt_core::adapter::{
    require_string, Adapter, AdapterContext, AdapterError, AdapterResult, Capabilities, CostHint,
    ResourceAccess,
};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Static secrets provider.
#[derive(Debug, Default)]
pub struct SecretsAdapter {
    values: RwLock<HashMap<String, String>>,
}

impl SecretsAdapter {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// Loads every `ORBYT_SECRET_<NAME>` environment variable as secret
    /// `<name>` (lowercased).
    pub fn from_env() -> Self {
        let values = std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix("ORBYT_SECRET_")
                    .map(|name| (name.to_lowercase(), value))
            })
            .collect();
        Self::new(values)
    }
}

#[async_trait]
impl Adapter for SecretsAdapter {
    fn name(&self) -> &str {
        "secrets"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec!["secrets.get".to_string(), "secrets.list".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            concurrent: true,
            cacheable: false,
            idempotent: true,
            resources: ResourceAccess::default(),
            cost: CostHint::Low,
        }
    }

    async fn execute(
        &self,
        action: &str,
        input: HashMap<String, Value>,
        ctx: &AdapterContext,
    ) -> AdapterResult {
        match action.rsplit('.').next().unwrap_or_default() {
            "get" => {
                let name = match require_string(&input, "name") {
                    Ok(name) => name.to_string(),
                    Err(error) => return AdapterResult::fail(error),
                };
                ctx.log(format!("secrets get {name}"));
                match self.values.read().get(&name) {
                    Some(value) => AdapterResult::ok(json!({"name": name, "value": value}))
                        .with_effect("secrets:read"),
                    None => AdapterResult::fail(
                        AdapterError::new(format!("secret `{name}` is not configured"))
                            .with_code("NotFound"),
                    ),
                }
            }
            "list" => {
                let mut names: Vec<String> = self.values.read().keys().cloned().collect();
                names.sort_unstable();
                AdapterResult::ok(json!({"names": names})).with_effect("secrets:read")
            }
            other => AdapterResult::fail(
                AdapterError::new(format!("unsupported secrets operation `{other}`"))
                    .with_code("UnknownAction"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbyt_core::adapter::SecretMask;
    use orbyt_core::{Priority, ResourceLimits, SandboxLevel};
    use tokio_util::sync::CancellationToken;

    fn context() -> AdapterContext {
        AdapterContext::new(
            "run_test",
            "step_test",
            HashMap::new(),
            5_000,
            SandboxLevel::Strict,
            ResourceLimits {
                cpu_millis: 1_000,
                memory_mb: 512,
                disk_mb: 1_024,
            },
            Priority::Normal,
            CancellationToken::new(),
            SecretMask::new(["hunter2".to_string()]),
        )
    }

    #[tokio::test]
    async fn test_get_known_secret() {
        let adapter =
            SecretsAdapter::new(HashMap::from([("db_password".to_string(), "hunter2".to_string())]));
        let input = HashMap::from([("name".to_string(), json!("db_password"))]);
        let result = adapter.execute("secrets.get", input, &context()).await;
        assert!(result.success);
        assert_eq!(result.data["value"], "hunter2");
        assert!(result.effects.contains(&"secrets:read".to_string()));
    }

    #[tokio::test]
    async fn test_get_unknown_secret_fails() {
        let adapter = SecretsAdapter::new(HashMap::new());
        let input = HashMap::from([("name".to_string(), json!("missing"))]);
        let result = adapter.execute("secrets.get", input, &context()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code.as_deref(), Some("NotFound"));
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let adapter = SecretsAdapter::new(HashMap::from([
            ("zeta".to_string(), "1".to_string()),
            ("alpha".to_string(), "2".to_string()),
        ]));
        let result = adapter
            .execute("secrets.list", HashMap::new(), &context())
            .await;
        assert_eq!(result.data["names"], json!(["alpha", "zeta"]));
    }
}
