// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! CLI adapter.
//!
//! `cli.run` executes a program directly (no shell interpolation) with
//! an optional argument vector, working directory and environment.

use crate::shell::run_child;
use async_trait::async_trait;
use orbyt_core::adapter::{
    bool_input, optional_string, require_string, Adapter, AdapterContext, AdapterError,
    AdapterResult, Capabilities, CostHint, ResourceAccess,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;

/// Direct process invocation adapter.
#[derive(Debug, Default)]
pub struct CliAdapter;

impl CliAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Adapter for CliAdapter {
    fn name(&self) -> &str {
        "cli"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec!["cli.run".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            concurrent: true,
            cacheable: false,
            idempotent: false,
            resources: ResourceAccess {
                filesystem: true,
                network: true,
            },
            cost: CostHint::High,
        }
    }

    async fn execute(
        &self,
        _action: &str,
        input: HashMap<String, Value>,
        ctx: &AdapterContext,
    ) -> AdapterResult {
        let program = match require_string(&input, "command") {
            Ok(program) => program.to_string(),
            Err(error) => return AdapterResult::fail(error),
        };

        let mut command = Command::new(&program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(Value::Array(args)) = input.get("args") {
            for arg in args {
                match arg {
                    Value::String(arg) => {
                        command.arg(arg);
                    }
                    other => {
                        command.arg(other.to_string());
                    }
                }
            }
        }
        if let Some(cwd) = optional_string(&input, "cwd") {
            command.current_dir(cwd);
        }
        for (name, value) in &ctx.env {
            command.env(name, value);
        }
        if let Some(Value::Object(env)) = input.get("env") {
            for (name, value) in env {
                if let Some(value) = value.as_str() {
                    command.env(name, value);
                }
            }
        }

        ctx.log(format!("exec {program}"));

        let child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                return AdapterResult::fail(
                    AdapterError::new(format!("failed to spawn `{program}`: {error}"))
                        .with_code("SpawnFailed"),
                );
            }
        };

        match run_child(child, ctx).await {
            Ok((exit_code, stdout, stderr)) => {
                let data = json!({
                    "exitCode": exit_code,
                    "stdout": stdout,
                    "stderr": stderr,
                });
                if exit_code == 0 || bool_input(&input, "allowNonZeroExit", false) {
                    AdapterResult::ok(data).with_effect("proc:spawn")
                } else {
                    AdapterResult::fail(
                        AdapterError::new(format!("`{program}` exited with code {exit_code}"))
                            .with_code("NonZeroExit")
                            .with_details(data),
                    )
                }
            }
            Err(error) => AdapterResult::fail(error),
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
            SandboxLevel::Basic,
            ResourceLimits {
                cpu_millis: 1_000,
                memory_mb: 512,
                disk_mb: 1_024,
            },
            Priority::Normal,
            CancellationToken::new(),
            SecretMask::default(),
        )
    }

    #[tokio::test]
    async fn test_run_with_args() {
        let adapter = CliAdapter::new();
        let input = HashMap::from([
            ("command".to_string(), json!("echo")),
            ("args".to_string(), json!(["one", "two"])),
        ]);
        let result = adapter.execute("cli.run", input, &context()).await;
        assert!(result.success);
        assert_eq!(result.data["stdout"], "one two\n");
    }

    #[tokio::test]
    async fn test_unknown_program_fails() {
        let adapter = CliAdapter::new();
        let input = HashMap::from([(
            "command".to_string(),
            json!("definitely-not-a-real-binary-4141"),
        )]);
        let result = adapter.execute("cli.run", input, &context()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code.as_deref(), Some("SpawnFailed"));
    }

    #[tokio::test]
    async fn test_missing_command_fails_fast() {
        let adapter = CliAdapter::new();
        let result = adapter.execute("cli.run", HashMap::new(), &context()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code.as_deref(), Some("InputValidation"));
    }
}
