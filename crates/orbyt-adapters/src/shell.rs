// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Shell adapter.
//!
//! `shell.run` executes `command` through `sh -c`; `shell.script` runs a
//! multi-line `script` the same way. On cancellation the child first
//! receives SIGTERM; if it has not exited after the grace period it is
//! killed.

use async_trait::async_trait;
use orbyt_core::adapter::{
    bool_input, optional_string, Adapter, AdapterContext, AdapterError, AdapterResult,
    Capabilities, CostHint, ResourceAccess,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Grace between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Shell command adapter.
#[derive(Debug, Default)]
pub struct ShellAdapter;

impl ShellAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn send_signal(pid: Option<u32>, signal: nix::sys::signal::Signal) {
    use nix::unistd::Pid;
    if let Some(pid) = pid {
        let _ = nix::sys::signal::kill(Pid::from_raw(pid as i32), signal);
    }
}

/// Runs a spawned child to completion, collecting stdout/stderr, with
/// cooperative cancellation: SIGTERM first, SIGKILL after the grace
/// period (`kill_on_drop` reaps on other platforms).
pub(crate) async fn run_child(
    child: Child,
    ctx: &AdapterContext,
) -> Result<(i32, String, String), AdapterError> {
    #[cfg(unix)]
    let pid = child.id();
    let mut wait = Box::pin(child.wait_with_output());

    let output = tokio::select! {
        output = &mut wait => output,
        _ = ctx.cancellation.cancelled() => {
            #[cfg(unix)]
            send_signal(pid, nix::sys::signal::Signal::SIGTERM);
            match tokio::time::timeout(TERM_GRACE, &mut wait).await {
                Ok(_) => {}
                Err(_) => {
                    #[cfg(unix)]
                    send_signal(pid, nix::sys::signal::Signal::SIGKILL);
                    drop(wait);
                }
            }
            return Err(AdapterError::new("command cancelled").with_code("Cancelled"));
        }
    };

    let output =
        output.map_err(|e| AdapterError::new(format!("failed to wait on child: {e}")))?;
    Ok((
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

#[async_trait]
impl Adapter for ShellAdapter {
    fn name(&self) -> &str {
        "shell"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec!["shell.run".to_string(), "shell.script".to_string()]
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
        let program = match optional_string(&input, "command")
            .or_else(|| optional_string(&input, "script"))
        {
            Some(program) => program.to_string(),
            None => {
                return AdapterResult::fail(
                    AdapterError::new("missing required input `command` or `script`")
                        .with_code("InputValidation"),
                );
            }
        };

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&program)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

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

        ctx.log(format!("sh -c {program:?}"));

        let child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                return AdapterResult::fail(
                    AdapterError::new(format!("failed to spawn shell: {error}"))
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
                if exit_code == 0 {
                    AdapterResult::ok(data).with_effect("proc:spawn")
                } else {
                    let allow_failure = bool_input(&input, "allowNonZeroExit", false);
                    if allow_failure {
                        AdapterResult::ok(data).with_effect("proc:spawn")
                    } else {
                        AdapterResult::fail(
                            AdapterError::new(format!("command exited with code {exit_code}"))
                                .with_code("NonZeroExit")
                                .with_details(data),
                        )
                    }
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

    fn context_with(token: CancellationToken) -> AdapterContext {
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
            token,
            SecretMask::default(),
        )
    }

    fn context() -> AdapterContext {
        context_with(CancellationToken::new())
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let adapter = ShellAdapter::new();
        let input = HashMap::from([("command".to_string(), json!("echo hello"))]);
        let result = adapter.execute("shell.run", input, &context()).await;
        assert!(result.success);
        assert_eq!(result.data["exitCode"], 0);
        assert_eq!(result.data["stdout"], "hello\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let adapter = ShellAdapter::new();
        let input = HashMap::from([("command".to_string(), json!("exit 3"))]);
        let result = adapter.execute("shell.run", input, &context()).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.code.as_deref(), Some("NonZeroExit"));
        assert_eq!(error.details.unwrap()["exitCode"], 3);
    }

    #[tokio::test]
    async fn test_nonzero_exit_allowed_when_requested() {
        let adapter = ShellAdapter::new();
        let input = HashMap::from([
            ("command".to_string(), json!("exit 3")),
            ("allowNonZeroExit".to_string(), json!(true)),
        ]);
        let result = adapter.execute("shell.run", input, &context()).await;
        assert!(result.success);
        assert_eq!(result.data["exitCode"], 3);
    }

    #[tokio::test]
    async fn test_script_with_stderr() {
        let adapter = ShellAdapter::new();
        let input = HashMap::from([(
            "script".to_string(),
            json!("echo out\necho err >&2"),
        )]);
        let result = adapter.execute("shell.script", input, &context()).await;
        assert!(result.success);
        assert_eq!(result.data["stdout"], "out\n");
        assert_eq!(result.data["stderr"], "err\n");
    }

    #[tokio::test]
    async fn test_missing_command_fails_fast() {
        let adapter = ShellAdapter::new();
        let result = adapter.execute("shell.run", HashMap::new(), &context()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code.as_deref(), Some("InputValidation"));
    }

    #[tokio::test]
    async fn test_cancellation_terminates_child() {
        let token = CancellationToken::new();
        let ctx = context_with(token.clone());
        let adapter = ShellAdapter::new();
        let input = HashMap::from([("command".to_string(), json!("sleep 30"))]);

        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let result = adapter.execute("shell.run", input, &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code.as_deref(), Some("Cancelled"));
    }
}
