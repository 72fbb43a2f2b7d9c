// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Internal execution context.
//!
//! Synthesized by the engine at run start and attached to the run. The
//! workflow document cannot override anything in here; serialized field
//! names carry a leading underscore to mark them engine-owned.

use crate::limits::{ExecutionMode, Priority, SandboxLevel, Tier, TierLimits};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Generates an engine id: `<prefix>_<epoch_ms>_<random-suffix>`.
pub fn generate_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{prefix}_{}_{suffix}", Utc::now().timestamp_millis())
}

/// Run identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub execution_id: String,
    pub run_id: String,
    pub trace_id: String,
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
}

/// Who the run belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ownership {
    pub user_id: String,
    pub workspace_id: String,
    pub tier: Tier,
    pub region: String,
}

/// Enforced isolation posture for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    pub sandbox: SandboxLevel,
    pub permissions: Vec<String>,
}

/// Runtime parameters the scheduler settled on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    pub dry_run: bool,
    pub concurrency: usize,
    pub priority: Priority,
}

/// How the run was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub origin: String,
    pub mode: ExecutionMode,
}

/// The non-user-overridable bundle attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalExecutionContext {
    #[serde(rename = "_identity")]
    pub identity: Identity,
    #[serde(rename = "_ownership")]
    pub ownership: Ownership,
    #[serde(rename = "_limits")]
    pub limits: TierLimits,
    #[serde(rename = "_security")]
    pub security: Security,
    #[serde(rename = "_runtime")]
    pub runtime: Runtime,
    #[serde(rename = "_request")]
    pub request: Request,
}

/// Builder for [`InternalExecutionContext`].
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    tier: Tier,
    user_id: String,
    workspace_id: String,
    region: String,
    origin: String,
    mode: Option<ExecutionMode>,
    sandbox: Option<SandboxLevel>,
    priority: Option<Priority>,
    concurrency: Option<usize>,
    dry_run: bool,
}

impl ContextBuilder {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            user_id: "local".to_string(),
            workspace_id: "default".to_string(),
            region: "local".to_string(),
            origin: "cli".to_string(),
            mode: None,
            sandbox: None,
            priority: None,
            concurrency: None,
            dry_run: false,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = workspace_id.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn sandbox(mut self, sandbox: SandboxLevel) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Synthesizes the context, clamping every requested value through
    /// the limit policy.
    pub fn build(self) -> InternalExecutionContext {
        let limits = TierLimits::for_tier(self.tier);
        let sandbox = crate::limits::enforce_sandbox_level(self.sandbox, &limits).value;
        let mode = crate::limits::enforce_execution_mode(self.mode, &limits).value;
        let priority = crate::limits::enforce_priority(self.priority, &limits).value;
        let concurrency = crate::limits::enforce_concurrency(self.concurrency, &limits).value;

        InternalExecutionContext {
            identity: Identity {
                execution_id: generate_id("exec"),
                run_id: generate_id("run"),
                trace_id: generate_id("trace"),
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                started_at: Utc::now(),
            },
            ownership: Ownership {
                user_id: self.user_id,
                workspace_id: self.workspace_id,
                tier: self.tier,
                region: self.region,
            },
            limits,
            security: Security {
                sandbox,
                permissions: Vec::new(),
            },
            runtime: Runtime {
                dry_run: self.dry_run,
                concurrency,
                priority,
            },
            request: Request {
                origin: self.origin,
                mode,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_format() {
        let id = generate_id("run");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "run");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generate_id("exec");
        let b = generate_id("exec");
        assert_ne!(a, b);
    }

    #[test]
    fn test_build_applies_tier_policy() {
        let ctx = ContextBuilder::new(Tier::Free)
            .sandbox(SandboxLevel::None)
            .priority(Priority::High)
            .concurrency(100)
            .build();
        assert_eq!(ctx.security.sandbox, SandboxLevel::Strict);
        assert_eq!(ctx.runtime.priority, Priority::Normal);
        assert_eq!(ctx.runtime.concurrency, 2);
        assert_eq!(ctx.ownership.tier, Tier::Free);
    }

    #[test]
    fn test_serialized_field_names_are_engine_owned() {
        let ctx = ContextBuilder::new(Tier::Pro).build();
        let value = serde_json::to_value(&ctx).unwrap();
        assert!(value.get("_identity").is_some());
        assert!(value.get("_limits").is_some());
        assert!(value.get("identity").is_none());
    }
}
