// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Human and JSON formatters for diagnostics, events and run reports.

use colored::Colorize;
use orbyt_core::{
    Diagnostic, DiagnosticList, RunReport, RunStatus, Severity, WorkflowEvent,
};

/// Renders one diagnostic as
/// `<icon> <Category> [<code>] at <path>` + message + hint line.
pub fn render_diagnostic(diagnostic: &Diagnostic) -> String {
    let icon = match diagnostic.severity {
        Severity::Error => "✗".red().bold().to_string(),
        Severity::Warning => "⚠".yellow().bold().to_string(),
        Severity::Info => "ℹ".blue().to_string(),
    };
    let mut line = format!(
        "{icon} {} {}",
        diagnostic.category().bold(),
        format!("[{}]", diagnostic.code).dimmed()
    );
    if let Some(path) = &diagnostic.path {
        line.push_str(&format!(" at {}", path.cyan()));
    }
    line.push('\n');
    line.push_str(&diagnostic.message);
    if let Some(hint) = &diagnostic.hint {
        line.push_str(&format!("\n{} {}", "→ Hint:".green(), hint));
    }
    line
}

/// Renders a diagnostic list with a horizontal rule between entries.
pub fn render_diagnostics(list: &DiagnosticList) -> String {
    list.iter()
        .map(render_diagnostic)
        .collect::<Vec<_>>()
        .join(&format!("\n{}\n", "─".repeat(40).dimmed()))
}

/// Prints one colored line per lifecycle event.
pub fn print_human_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::WorkflowStarted {
            workflow_name,
            total_steps,
            ..
        } => {
            println!(
                "{} {} ({} steps)",
                "▶".cyan().bold(),
                workflow_name.bold(),
                total_steps
            );
        }
        WorkflowEvent::WorkflowCompleted {
            status,
            duration_ms,
            successful_steps,
            failed_steps,
            skipped_steps,
            ..
        } => {
            let label = match status {
                RunStatus::Success => "✓ workflow completed".green().bold().to_string(),
                RunStatus::Partial => "◐ workflow completed (partial)".yellow().bold().to_string(),
                RunStatus::Failed => "✗ workflow failed".red().bold().to_string(),
            };
            println!(
                "{label} in {duration_ms}ms — {successful_steps} ok, {failed_steps} failed, {skipped_steps} skipped"
            );
        }
        WorkflowEvent::WorkflowFailed {
            error, duration_ms, ..
        } => {
            println!(
                "{} after {duration_ms}ms: {}{}",
                "✗ workflow failed".red().bold(),
                error.message,
                error
                    .code
                    .as_deref()
                    .map(|code| format!(" [{code}]").dimmed().to_string())
                    .unwrap_or_default()
            );
        }
        WorkflowEvent::StepStarted {
            step_id, action, ..
        } => {
            println!("  {} {} ({})", "●".cyan(), step_id, action.dimmed());
        }
        WorkflowEvent::StepCompleted {
            step_id,
            duration_ms,
            ..
        } => {
            println!("  {} {} in {duration_ms}ms", "✓".green(), step_id);
        }
        WorkflowEvent::StepFailed {
            step_id,
            error,
            duration_ms,
            ..
        } => {
            println!(
                "  {} {} after {duration_ms}ms: {}{}",
                "✗".red(),
                step_id,
                error.message,
                error
                    .code
                    .as_deref()
                    .map(|code| format!(" [{code}]").dimmed().to_string())
                    .unwrap_or_default()
            );
        }
        WorkflowEvent::StepRetrying {
            step_id,
            attempt,
            max_attempts,
            next_delay_ms,
            ..
        } => {
            println!(
                "  {} {} (attempt {attempt}/{max_attempts}, next delay {next_delay_ms}ms)",
                "↻".yellow(),
                step_id
            );
        }
        WorkflowEvent::StepSkipped {
            step_id, reason, ..
        } => {
            println!("  {} {} ({})", "⊘".dimmed(), step_id, reason.as_str().dimmed());
        }
    }
}

/// Prints one serialized JSON event per line.
pub fn print_json_event(event: &WorkflowEvent) {
    if let Ok(line) = serde_json::to_string(event) {
        println!("{line}");
    }
}

/// Renders the final report summary for human output.
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\n{} {}\n",
        "Run:".bold(),
        report.run_id.as_str().dimmed()
    ));
    if !report.outputs.is_empty() {
        out.push_str(&format!("{}\n", "Outputs:".bold()));
        let mut ids: Vec<&String> = report.outputs.keys().collect();
        ids.sort();
        for id in ids {
            let value = serde_json::to_string(&report.outputs[id]).unwrap_or_default();
            out.push_str(&format!("  {} = {}\n", id.cyan(), value));
        }
    }
    if !report.failures.is_empty() {
        out.push_str(&format!("{}\n", "Failures:".bold()));
        let mut ids: Vec<&String> = report.failures.keys().collect();
        ids.sort();
        for id in ids {
            let failure = &report.failures[id];
            out.push_str(&format!(
                "  {} [{}] {}\n",
                id.red(),
                failure.kind.as_str().dimmed(),
                failure.message
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbyt_core::diagnostics::codes;

    #[test]
    fn test_render_diagnostic_contains_code_path_hint() {
        colored::control::set_override(false);
        let diagnostic = Diagnostic::error(codes::SCHEMA_UNKNOWN_KEY, "unknown key `stepss`")
            .with_path("stepss")
            .with_hint("did you mean `steps`?");
        let rendered = render_diagnostic(&diagnostic);
        assert!(rendered.contains("Schema [ORBYT-SCH-003] at stepss"));
        assert!(rendered.contains("→ Hint: did you mean `steps`?"));
    }

    #[test]
    fn test_render_diagnostics_separator() {
        colored::control::set_override(false);
        let mut list = DiagnosticList::new();
        list.push(Diagnostic::error(codes::GRAPH_DUPLICATE_ID, "one"));
        list.push(Diagnostic::error(codes::GRAPH_CYCLE, "two"));
        let rendered = render_diagnostics(&list);
        assert!(rendered.contains("────"));
    }
}
