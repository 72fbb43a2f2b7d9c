// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! No-op adapter for plugin actions in tests and dry runs.

use async_trait::async_trait;
use orbyt_core::adapter::{Adapter, AdapterContext, AdapterResult, Capabilities};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Succeeds for every `noop.*` action, echoing the resolved input.
#[derive(Debug, Default)]
pub struct NoopAdapter;

impl NoopAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Adapter for NoopAdapter {
    fn name(&self) -> &str {
        "noop"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec!["noop.*".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            concurrent: true,
            cacheable: true,
            idempotent: true,
            ..Capabilities::default()
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use orbyt_core::adapter::SecretMask;
    use orbyt_core::{Priority, ResourceLimits, SandboxLevel};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_noop_echoes_input() {
        let ctx = AdapterContext::new(
            "run_test",
            "step_test",
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
            SecretMask::default(),
        );
        let input = HashMap::from([("key".to_string(), json!("value"))]);
        let result = NoopAdapter::new().execute("noop.run", input, &ctx).await;
        assert!(result.success);
        assert_eq!(result.data["input"]["key"], "value");
    }
}
