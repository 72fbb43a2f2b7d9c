// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Built-in reference adapters for the orbyt workflow engine.
//!
//! Each adapter implements the core [`orbyt_core::Adapter`] contract:
//! validate inputs, never panic across the boundary, report failures as
//! results, honor the cancellation token.

pub mod cli;
pub mod db;
pub mod fs;
pub mod http;
pub mod noop;
pub mod queue;
pub mod secrets;
pub mod shell;
pub mod webhook;

pub use cli::CliAdapter;
pub use db::DbAdapter;
pub use fs::FsAdapter;
pub use http::HttpAdapter;
pub use noop::NoopAdapter;
pub use queue::{Message, QueueAdapter};
pub use secrets::SecretsAdapter;
pub use shell::ShellAdapter;
pub use webhook::WebhookAdapter;

use orbyt_core::{Adapter, AdapterKind, AdapterRegistry};
use std::collections::HashMap;
use std::sync::Arc;

/// Every built-in adapter, keyed by the kind it serves.
pub fn builtin_adapters(
    secrets: HashMap<String, String>,
) -> Vec<(AdapterKind, Arc<dyn Adapter>)> {
    vec![
        (AdapterKind::Http, Arc::new(HttpAdapter::new()) as Arc<dyn Adapter>),
        (AdapterKind::Shell, Arc::new(ShellAdapter::new())),
        (AdapterKind::Cli, Arc::new(CliAdapter::new())),
        (AdapterKind::Fs, Arc::new(FsAdapter::new())),
        (AdapterKind::Db, Arc::new(DbAdapter::new())),
        (AdapterKind::Queue, Arc::new(QueueAdapter::new())),
        (AdapterKind::Secrets, Arc::new(SecretsAdapter::new(secrets))),
        (AdapterKind::Webhook, Arc::new(WebhookAdapter::new())),
        (AdapterKind::Plugin, Arc::new(NoopAdapter::new())),
    ]
}

/// Registers every built-in adapter on a registry.
pub fn register_builtin(registry: &mut AdapterRegistry, secrets: HashMap<String, String>) {
    for (kind, adapter) in builtin_adapters(secrets) {
        registry.register(kind, adapter);
    }
}

/// A registry with every built-in adapter registered.
pub fn builtin_registry(secrets: HashMap<String, String>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    register_builtin(&mut registry, secrets);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_resolves_every_kind() {
        let registry = builtin_registry(HashMap::new());
        for action in [
            "http.request.get",
            "shell.run",
            "cli.run",
            "fs.file.read",
            "db.insert",
            "queue.publish",
            "secrets.get",
            "webhook.send",
            "noop.run",
        ] {
            assert!(registry.resolve(action).is_ok(), "action {action} should resolve");
        }
    }

    #[test]
    fn test_unsupported_action_is_rejected() {
        let registry = builtin_registry(HashMap::new());
        assert!(registry.resolve("queue.peek").is_err());
    }
}
