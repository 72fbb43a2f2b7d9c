// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Tier limit policy.
//!
//! Pure, total clamp functions that take a user-requested value and the
//! active [`TierLimits`] and return the enforced value. This module is
//! the only place tier ceilings are consulted; adapters and the
//! scheduler only ever see enforced values.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(ms|s|m|h|d)$").expect("duration regex"));

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)(MB|GB|TB|M|G|T)?$").expect("size regex"));

/// Default step timeout when the document gives none or an unparsable value.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 5 * 60 * 1_000;
/// Default workflow timeout when the document gives none or an unparsable value.
pub const DEFAULT_WORKFLOW_TIMEOUT_MS: u64 = 15 * 60 * 1_000;
/// Default retry attempts when a step declares a retry block without `max`.
pub const DEFAULT_RETRY_MAX: u32 = 3;
/// Absolute ceiling on retry attempts, independent of tier.
pub const ABSOLUTE_RETRY_MAX: u32 = 10;

/// Parses a duration string (`^\d+(ms|s|m|h|d)$`) into milliseconds.
pub fn parse_duration_ms(input: &str) -> Option<u64> {
    let captures = DURATION_RE.captures(input.trim())?;
    let value: u64 = captures[1].parse().ok()?;
    let factor = match &captures[2] {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60 * 1_000,
        "h" => 60 * 60 * 1_000,
        "d" => 24 * 60 * 60 * 1_000,
        _ => return None,
    };
    value.checked_mul(factor)
}

/// Parses a size string (`^\d+(\.\d+)?(MB|GB|TB|M|G|T)?$`) into megabytes.
///
/// A bare number defaults to megabytes.
pub fn parse_size_mb(input: &str) -> Option<f64> {
    let captures = SIZE_RE.captures(input.trim())?;
    let value: f64 = captures[1].parse().ok()?;
    let factor = match captures.get(2).map(|m| m.as_str()) {
        None | Some("MB") | Some("M") => 1.0,
        Some("GB") | Some("G") => 1_024.0,
        Some("TB") | Some("T") => 1_024.0 * 1_024.0,
        _ => return None,
    };
    Some(value * factor)
}

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// Case-insensitive parse. Unknown tiers resolve to the most
    /// restrictive tier.
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "pro" => Tier::Pro,
            "enterprise" => Tier::Enterprise,
            "free" => Tier::Free,
            _ => Tier::Free,
        }
    }
}

/// Sandbox isolation level, ordered `None < Basic < Strict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxLevel {
    None,
    Basic,
    Strict,
}

/// How a run is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Standard,
    Batch,
    Realtime,
}

/// Scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Resource ceilings, in scheduler units (cpu millicores, sizes in MB).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_millis: u64,
    pub memory_mb: u64,
    pub disk_mb: u64,
}

/// User-requested resources as raw size strings from the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub disk: Option<String>,
}

/// Ceilings for one subscription tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierLimits {
    pub tier: Tier,
    pub max_retry_attempts: u32,
    pub max_step_timeout_ms: u64,
    pub max_workflow_timeout_ms: u64,
    pub max_concurrency: usize,
    pub min_sandbox_level: SandboxLevel,
    pub allowed_execution_modes: Vec<ExecutionMode>,
    pub allow_high_priority: bool,
    pub max_resources: ResourceLimits,
}

impl TierLimits {
    /// The ceiling table for a tier.
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Free => Self {
                tier,
                max_retry_attempts: 2,
                max_step_timeout_ms: 5 * 60 * 1_000,
                max_workflow_timeout_ms: 15 * 60 * 1_000,
                max_concurrency: 2,
                min_sandbox_level: SandboxLevel::Strict,
                allowed_execution_modes: vec![ExecutionMode::Standard],
                allow_high_priority: false,
                max_resources: ResourceLimits {
                    cpu_millis: 1_000,
                    memory_mb: 512,
                    disk_mb: 1_024,
                },
            },
            Tier::Pro => Self {
                tier,
                max_retry_attempts: 5,
                max_step_timeout_ms: 15 * 60 * 1_000,
                max_workflow_timeout_ms: 60 * 60 * 1_000,
                max_concurrency: 8,
                min_sandbox_level: SandboxLevel::Basic,
                allowed_execution_modes: vec![ExecutionMode::Standard, ExecutionMode::Batch],
                allow_high_priority: false,
                max_resources: ResourceLimits {
                    cpu_millis: 4_000,
                    memory_mb: 4_096,
                    disk_mb: 10_240,
                },
            },
            Tier::Enterprise => Self {
                tier,
                max_retry_attempts: ABSOLUTE_RETRY_MAX,
                max_step_timeout_ms: 60 * 60 * 1_000,
                max_workflow_timeout_ms: 24 * 60 * 60 * 1_000,
                max_concurrency: 32,
                min_sandbox_level: SandboxLevel::None,
                allowed_execution_modes: vec![
                    ExecutionMode::Standard,
                    ExecutionMode::Batch,
                    ExecutionMode::Realtime,
                ],
                allow_high_priority: true,
                max_resources: ResourceLimits {
                    cpu_millis: 16_000,
                    memory_mb: 32_768,
                    disk_mb: 102_400,
                },
            },
        }
    }

    /// Resolves limits from a tier name (unknown names fall back to the
    /// most restrictive tier).
    pub fn for_tier_name(name: &str) -> Self {
        Self::for_tier(Tier::parse(name))
    }
}

/// Which timeout ceiling applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutLevel {
    Step,
    Workflow,
}

/// An enforced value plus whether the request was clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enforced<T> {
    pub value: T,
    pub clamped: bool,
}

impl<T> Enforced<T> {
    fn unchanged(value: T) -> Self {
        Self {
            value,
            clamped: false,
        }
    }

    fn clamped(value: T) -> Self {
        Self {
            value,
            clamped: true,
        }
    }
}

/// Clamps requested retry attempts: `min(requested ?? 3, maxRetryAttempts)`.
pub fn enforce_retry_limit(requested: Option<u32>, limits: &TierLimits) -> Enforced<u32> {
    let requested = requested.unwrap_or(DEFAULT_RETRY_MAX).min(ABSOLUTE_RETRY_MAX);
    if requested > limits.max_retry_attempts {
        Enforced::clamped(limits.max_retry_attempts)
    } else {
        Enforced::unchanged(requested)
    }
}

/// Clamps a requested timeout (already parsed to ms) to the tier ceiling.
///
/// `None` (absent or unparsable in the document) takes the level default
/// before clamping.
pub fn enforce_timeout_limit(
    requested: Option<u64>,
    limits: &TierLimits,
    level: TimeoutLevel,
) -> Enforced<u64> {
    let (default_ms, max_ms) = match level {
        TimeoutLevel::Step => (DEFAULT_STEP_TIMEOUT_MS, limits.max_step_timeout_ms),
        TimeoutLevel::Workflow => (DEFAULT_WORKFLOW_TIMEOUT_MS, limits.max_workflow_timeout_ms),
    };
    let requested = requested.unwrap_or(default_ms);
    if requested > max_ms {
        Enforced::clamped(max_ms)
    } else {
        Enforced::unchanged(requested)
    }
}

/// Clamps requested concurrency to the tier ceiling.
pub fn enforce_concurrency(requested: Option<usize>, limits: &TierLimits) -> Enforced<usize> {
    let requested = requested.unwrap_or(limits.max_concurrency).max(1);
    if requested > limits.max_concurrency {
        Enforced::clamped(limits.max_concurrency)
    } else {
        Enforced::unchanged(requested)
    }
}

/// Raises a requested sandbox level to the tier minimum.
pub fn enforce_sandbox_level(
    requested: Option<SandboxLevel>,
    limits: &TierLimits,
) -> Enforced<SandboxLevel> {
    let requested = requested.unwrap_or(limits.min_sandbox_level);
    if requested < limits.min_sandbox_level {
        Enforced::clamped(limits.min_sandbox_level)
    } else {
        Enforced::unchanged(requested)
    }
}

/// Falls back to the first allowed execution mode when the requested one
/// is not permitted by the tier.
pub fn enforce_execution_mode(
    requested: Option<ExecutionMode>,
    limits: &TierLimits,
) -> Enforced<ExecutionMode> {
    let fallback = limits
        .allowed_execution_modes
        .first()
        .copied()
        .unwrap_or(ExecutionMode::Standard);
    match requested {
        Some(mode) if limits.allowed_execution_modes.contains(&mode) => Enforced::unchanged(mode),
        Some(_) => Enforced::clamped(fallback),
        None => Enforced::unchanged(fallback),
    }
}

/// Downgrades `High` priority to `Normal` when the tier forbids it.
pub fn enforce_priority(requested: Option<Priority>, limits: &TierLimits) -> Enforced<Priority> {
    let requested = requested.unwrap_or(Priority::Normal);
    if requested == Priority::High && !limits.allow_high_priority {
        Enforced::clamped(Priority::Normal)
    } else {
        Enforced::unchanged(requested)
    }
}

/// Clamps each requested resource to the tier ceiling.
///
/// Unparsable or absent requests take the ceiling.
pub fn enforce_resources(
    requested: &ResourceRequest,
    limits: &TierLimits,
) -> Enforced<ResourceLimits> {
    let max = limits.max_resources;
    let mut clamped = false;
    let mut clamp = |raw: &Option<String>, ceiling: u64| -> u64 {
        match raw.as_deref().and_then(parse_size_mb) {
            Some(value) => {
                let value = value.round() as u64;
                if value > ceiling {
                    clamped = true;
                    ceiling
                } else {
                    value
                }
            }
            None => ceiling,
        }
    };
    let enforced = ResourceLimits {
        cpu_millis: clamp(&requested.cpu, max.cpu_millis),
        memory_mb: clamp(&requested.memory, max.memory_mb),
        disk_mb: clamp(&requested.disk, max.disk_mb),
    };
    Enforced {
        value: enforced,
        clamped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration_ms("250ms"), Some(250));
        assert_eq!(parse_duration_ms("30s"), Some(30_000));
        assert_eq!(parse_duration_ms("15m"), Some(900_000));
        assert_eq!(parse_duration_ms("2h"), Some(7_200_000));
        assert_eq!(parse_duration_ms("1d"), Some(86_400_000));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration_ms("15"), None);
        assert_eq!(parse_duration_ms("fast"), None);
        assert_eq!(parse_duration_ms("1.5s"), None);
        assert_eq!(parse_duration_ms("-5s"), None);
    }

    #[test]
    fn test_parse_size_units_and_default() {
        assert_eq!(parse_size_mb("512"), Some(512.0));
        assert_eq!(parse_size_mb("512MB"), Some(512.0));
        assert_eq!(parse_size_mb("2G"), Some(2_048.0));
        assert_eq!(parse_size_mb("1.5GB"), Some(1_536.0));
        assert_eq!(parse_size_mb("1T"), Some(1_048_576.0));
        assert_eq!(parse_size_mb("lots"), None);
    }

    #[test]
    fn test_unknown_tier_is_most_restrictive() {
        assert_eq!(Tier::parse("platinum"), Tier::Free);
        assert_eq!(Tier::parse("PRO"), Tier::Pro);
        assert_eq!(Tier::parse(" Enterprise "), Tier::Enterprise);
    }

    #[test]
    fn test_retry_clamp_to_tier() {
        let limits = TierLimits::for_tier(Tier::Free);
        let enforced = enforce_retry_limit(Some(10), &limits);
        assert_eq!(enforced.value, 2);
        assert!(enforced.clamped);
    }

    #[test]
    fn test_retry_default_within_tier() {
        let limits = TierLimits::for_tier(Tier::Pro);
        let enforced = enforce_retry_limit(None, &limits);
        assert_eq!(enforced.value, DEFAULT_RETRY_MAX);
        assert!(!enforced.clamped);
    }

    #[test]
    fn test_timeout_default_and_clamp() {
        let limits = TierLimits::for_tier(Tier::Free);
        let defaulted = enforce_timeout_limit(None, &limits, TimeoutLevel::Step);
        assert_eq!(defaulted.value, DEFAULT_STEP_TIMEOUT_MS);
        assert!(!defaulted.clamped);

        let clamped = enforce_timeout_limit(
            Some(2 * 60 * 60 * 1_000),
            &limits,
            TimeoutLevel::Workflow,
        );
        assert_eq!(clamped.value, limits.max_workflow_timeout_ms);
        assert!(clamped.clamped);
    }

    #[test]
    fn test_timeout_limit_never_exceeds_ceiling() {
        for tier in [Tier::Free, Tier::Pro, Tier::Enterprise] {
            let limits = TierLimits::for_tier(tier);
            for requested in [None, Some(0), Some(1), Some(u64::MAX)] {
                let step = enforce_timeout_limit(requested, &limits, TimeoutLevel::Step);
                assert!(step.value <= limits.max_step_timeout_ms);
                let workflow = enforce_timeout_limit(requested, &limits, TimeoutLevel::Workflow);
                assert!(workflow.value <= limits.max_workflow_timeout_ms);
            }
        }
    }

    #[test]
    fn test_concurrency_clamp() {
        let limits = TierLimits::for_tier(Tier::Free);
        assert_eq!(enforce_concurrency(Some(64), &limits).value, 2);
        assert_eq!(enforce_concurrency(None, &limits).value, 2);
        assert_eq!(enforce_concurrency(Some(1), &limits).value, 1);
    }

    #[test]
    fn test_sandbox_substitution() {
        let limits = TierLimits::for_tier(Tier::Free);
        let enforced = enforce_sandbox_level(Some(SandboxLevel::None), &limits);
        assert_eq!(enforced.value, SandboxLevel::Strict);
        assert!(enforced.clamped);

        let enterprise = TierLimits::for_tier(Tier::Enterprise);
        let kept = enforce_sandbox_level(Some(SandboxLevel::None), &enterprise);
        assert_eq!(kept.value, SandboxLevel::None);
        assert!(!kept.clamped);
    }

    #[test]
    fn test_execution_mode_fallback() {
        let limits = TierLimits::for_tier(Tier::Free);
        let enforced = enforce_execution_mode(Some(ExecutionMode::Realtime), &limits);
        assert_eq!(enforced.value, ExecutionMode::Standard);
        assert!(enforced.clamped);
    }

    #[test]
    fn test_priority_downgrade() {
        let limits = TierLimits::for_tier(Tier::Pro);
        let enforced = enforce_priority(Some(Priority::High), &limits);
        assert_eq!(enforced.value, Priority::Normal);
        assert!(enforced.clamped);

        let enterprise = TierLimits::for_tier(Tier::Enterprise);
        assert_eq!(
            enforce_priority(Some(Priority::High), &enterprise).value,
            Priority::High
        );
    }

    #[test]
    fn test_resource_clamp() {
        let limits = TierLimits::for_tier(Tier::Free);
        let request = ResourceRequest {
            cpu: Some("8000".to_string()),
            memory: Some("16GB".to_string()),
            disk: None,
        };
        let enforced = enforce_resources(&request, &limits);
        assert!(enforced.clamped);
        assert_eq!(enforced.value.cpu_millis, 1_000);
        assert_eq!(enforced.value.memory_mb, 512);
        assert_eq!(enforced.value.disk_mb, 1_024);
    }
}
