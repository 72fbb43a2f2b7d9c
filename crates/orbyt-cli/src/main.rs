// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! orbyt CLI: validate, plan and run declarative workflows.

mod format;

use clap::{Parser, Subcommand};
use colored::Colorize;
use orbyt_core::{Engine, LifecycleManager, RunOptions, Tier};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_GENERIC: i32 = 1;
const EXIT_VALIDATION: i32 = 2;
const EXIT_MISSING_CONFIG: i32 = 3;

#[derive(Parser)]
#[command(name = "orbyt")]
#[command(version, about = "Declarative workflow execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow document
    Validate {
        /// Path to workflow file (YAML or JSON)
        #[arg(value_name = "FILE")]
        file: String,

        /// Subscription tier used for limit warnings
        #[arg(long, default_value = "free")]
        tier: String,
    },

    /// Compile a workflow and print its execution plan
    Plan {
        /// Path to workflow file
        #[arg(value_name = "FILE")]
        file: String,

        /// Subscription tier used for limit warnings
        #[arg(long, default_value = "free")]
        tier: String,
    },

    /// Run a workflow
    Run {
        /// Path to workflow file
        #[arg(value_name = "FILE")]
        file: String,

        /// Workflow vars as a JSON string or @file
        #[arg(long)]
        vars: Option<String>,

        /// Subscription tier enforced for this run
        #[arg(long, default_value = "free")]
        tier: String,

        /// Plan and schedule without invoking any adapter
        #[arg(long)]
        dry_run: bool,

        /// Output format: human or json
        #[arg(short, long, default_value = "human")]
        output: String,

        /// Extra environment entries, KEY=VALUE (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Secrets, NAME=VALUE (repeatable)
        #[arg(long = "secret", value_name = "NAME=VALUE")]
        secrets: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("orbyt={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match cli.command {
        Commands::Validate { file, tier } => validate(&file, &tier),
        Commands::Plan { file, tier } => plan(&file, &tier),
        Commands::Run {
            file,
            vars,
            tier,
            dry_run,
            output,
            env,
            secrets,
        } => run(&file, vars.as_deref(), &tier, dry_run, &output, &env, &secrets).await,
    };
    std::process::exit(code);
}

fn read_workflow(file: &str) -> Result<String, i32> {
    match fs::read_to_string(file) {
        Ok(content) => Ok(content),
        Err(e) => {
            error!(file, error = %e, "Cannot read workflow file");
            eprintln!("{} cannot read `{file}`: {e}", "Error:".red().bold());
            Err(EXIT_MISSING_CONFIG)
        }
    }
}

fn build_engine(tier: &str, secrets: HashMap<String, String>) -> Engine {
    let mut builder = Engine::builder()
        .tier(Tier::parse(tier))
        .secrets(secrets.clone());
    for (kind, adapter) in orbyt_adapters::builtin_adapters(secrets) {
        builder = builder.adapter(kind, adapter);
    }
    builder.build()
}

fn compile(engine: &Engine, file: &str) -> Result<orbyt_core::CompiledWorkflow, i32> {
    let content = read_workflow(file)?;
    // YAML is a superset of JSON, so one parser covers both layouts.
    match engine.compile(&content) {
        Ok(compiled) => {
            for warning in compiled.warnings.iter() {
                eprintln!("{}", format::render_diagnostic(warning));
            }
            Ok(compiled)
        }
        Err(diagnostics) => {
            eprintln!("{}", format::render_diagnostics(&diagnostics));
            Err(EXIT_VALIDATION)
        }
    }
}

fn validate(file: &str, tier: &str) -> i32 {
    let engine = build_engine(tier, HashMap::new());
    match compile(&engine, file) {
        Ok(compiled) => {
            println!("{}", "✓ Workflow is valid".green().bold());
            println!("  Name: {}", compiled.plan.name);
            println!("  Steps: {}", compiled.plan.steps.len());
            println!("  Layers: {}", compiled.layers.len());
            0
        }
        Err(code) => code,
    }
}

fn plan(file: &str, tier: &str) -> i32 {
    let engine = build_engine(tier, HashMap::new());
    match compile(&engine, file) {
        Ok(compiled) => {
            println!(
                "{} {} ({} steps)",
                "Plan for".cyan().bold(),
                compiled.plan.name.bold(),
                compiled.plan.steps.len()
            );
            for (index, layer) in compiled.layers.iter().enumerate() {
                println!("  {} {}", format!("layer {index}:").dimmed(), layer.join(", "));
            }
            0
        }
        Err(code) => code,
    }
}

async fn run(
    file: &str,
    vars: Option<&str>,
    tier: &str,
    dry_run: bool,
    output: &str,
    env: &[String],
    secrets: &[String],
) -> i32 {
    let secrets = match parse_pairs(secrets, "secret") {
        Ok(secrets) => secrets,
        Err(code) => return code,
    };
    let env_pairs = match parse_pairs(env, "env") {
        Ok(env) => env,
        Err(code) => return code,
    };
    for (key, value) in env_pairs {
        // Read-through: step resolution scopes see the process env.
        std::env::set_var(key, value);
    }

    let vars = match vars.map(parse_vars).transpose() {
        Ok(vars) => vars.unwrap_or_default(),
        Err(message) => {
            eprintln!("{} {message}", "Error:".red().bold());
            return EXIT_GENERIC;
        }
    };

    let engine = build_engine(tier, secrets);
    let compiled = match compile(&engine, file) {
        Ok(compiled) => compiled,
        Err(code) => return code,
    };

    match output {
        "human" => engine.subscribe(format::print_human_event),
        "json" => engine.subscribe(format::print_json_event),
        other => {
            eprintln!(
                "{} unknown output format `{other}` (expected human or json)",
                "Error:".red().bold()
            );
            return EXIT_GENERIC;
        }
    }

    let cancellation = tokio_util::sync::CancellationToken::new();
    let stopper = cancellation.clone();
    tokio::spawn(async move {
        LifecycleManager::wait_for_shutdown_signal().await;
        debug!("Shutdown signal received, cancelling run");
        stopper.cancel();
    });

    let options = RunOptions {
        vars,
        dry_run,
        cancellation: Some(cancellation),
    };
    match engine.execute(compiled, options).await {
        Ok(report) => {
            if output == "human" {
                print!("{}", format::render_report(&report));
            } else if let Ok(line) = serde_json::to_string(&report) {
                println!("{line}");
            }
            report.exit_code()
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            eprintln!("{} {e}", "Error:".red().bold());
            e.exit_code()
        }
    }
}

/// Parses repeated `KEY=VALUE` arguments.
fn parse_pairs(pairs: &[String], flag: &str) -> Result<HashMap<String, String>, i32> {
    let mut parsed = HashMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                parsed.insert(key.to_string(), value.to_string());
            }
            _ => {
                eprintln!(
                    "{} --{flag} expects KEY=VALUE, got `{pair}`",
                    "Error:".red().bold()
                );
                return Err(EXIT_GENERIC);
            }
        }
    }
    Ok(parsed)
}

/// Parses `--vars` as inline JSON or `@file`.
fn parse_vars(input: &str) -> Result<HashMap<String, Value>, String> {
    let content = if let Some(path) = input.strip_prefix('@') {
        fs::read_to_string(path).map_err(|e| format!("cannot read vars file `{path}`: {e}"))?
    } else if Path::new(input).exists() {
        fs::read_to_string(input).map_err(|e| format!("cannot read vars file `{input}`: {e}"))?
    } else {
        input.to_string()
    };
    serde_json::from_str(&content).map_err(|e| format!("vars must be a JSON object: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let parsed = parse_pairs(&["A=1".to_string(), "B=two=2".to_string()], "env").unwrap();
        assert_eq!(parsed.get("A").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("B").map(String::as_str), Some("two=2"));
        assert!(parse_pairs(&["broken".to_string()], "env").is_err());
    }

    #[test]
    fn test_parse_vars_inline_json() {
        let vars = parse_vars(r#"{"region": "eu"}"#).unwrap();
        assert_eq!(vars.get("region"), Some(&Value::String("eu".to_string())));
        assert!(parse_vars("not json").is_err());
    }
}
