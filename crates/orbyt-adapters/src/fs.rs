// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Filesystem adapter.
//!
//! `fs.file.{read,write,append,delete,exists,list,copy}` over UTF-8
//! files, built on tokio's async filesystem primitives.

use async_trait::async_trait;
use orbyt_core::adapter::{
    require_string, Adapter, AdapterContext, AdapterError, AdapterResult, Capabilities, CostHint,
    ResourceAccess,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;

/// Filesystem operations adapter.
#[derive(Debug, Default)]
pub struct FsAdapter;

impl FsAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn io_failure(operation: &str, path: &str, error: std::io::Error) -> AdapterResult {
    AdapterResult::fail(
        AdapterError::new(format!("{operation} `{path}` failed: {error}")).with_code("IoError"),
    )
}

#[async_trait]
impl Adapter for FsAdapter {
    fn name(&self) -> &str {
        "fs"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec!["fs.file.*".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            concurrent: false,
            cacheable: false,
            idempotent: false,
            resources: ResourceAccess {
                filesystem: true,
                network: false,
            },
            cost: CostHint::Low,
        }
    }

    async fn execute(
        &self,
        action: &str,
        input: HashMap<String, Value>,
        ctx: &AdapterContext,
    ) -> AdapterResult {
        let path = match require_string(&input, "path") {
            Ok(path) => path.to_string(),
            Err(error) => return AdapterResult::fail(error),
        };
        let operation = action.rsplit('.').next().unwrap_or_default();
        ctx.log(format!("fs {operation} {path}"));

        match operation {
            "read" => match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    AdapterResult::ok(json!({"content": content})).with_effect("fs:read")
                }
                Err(error) => io_failure("read", &path, error),
            },
            "write" | "append" => {
                let content = match require_string(&input, "content") {
                    Ok(content) => content.to_string(),
                    Err(error) => return AdapterResult::fail(error),
                };
                if let Some(parent) = Path::new(&path).parent() {
                    if !parent.as_os_str().is_empty() {
                        if let Err(error) = tokio::fs::create_dir_all(parent).await {
                            return io_failure("create parent of", &path, error);
                        }
                    }
                }
                let result = if operation == "append" {
                    let existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
                    tokio::fs::write(&path, format!("{existing}{content}")).await
                } else {
                    tokio::fs::write(&path, &content).await
                };
                match result {
                    Ok(()) => AdapterResult::ok(json!({"bytesWritten": content.len()}))
                        .with_effect("fs:write"),
                    Err(error) => io_failure(operation, &path, error),
                }
            }
            "delete" => match tokio::fs::remove_file(&path).await {
                Ok(()) => AdapterResult::ok(json!({"deleted": true})).with_effect("fs:write"),
                Err(error) => io_failure("delete", &path, error),
            },
            "exists" => {
                let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
                AdapterResult::ok(json!({"exists": exists})).with_effect("fs:read")
            }
            "list" => match tokio::fs::read_dir(&path).await {
                Ok(mut entries) => {
                    let mut names = Vec::new();
                    while let Ok(Some(entry)) = entries.next_entry().await {
                        names.push(entry.file_name().to_string_lossy().into_owned());
                    }
                    names.sort_unstable();
                    AdapterResult::ok(json!({"entries": names})).with_effect("fs:read")
                }
                Err(error) => io_failure("list", &path, error),
            },
            "copy" => {
                let to = match require_string(&input, "to") {
                    Ok(to) => to.to_string(),
                    Err(error) => return AdapterResult::fail(error),
                };
                match tokio::fs::copy(&path, &to).await {
                    Ok(bytes) => AdapterResult::ok(json!({"copied": true, "bytes": bytes}))
                        .with_effect("fs:write"),
                    Err(error) => io_failure("copy", &path, error),
                }
            }
            other => AdapterResult::fail(
                AdapterError::new(format!("unsupported fs operation `{other}`"))
                    .with_code("UnknownAction"),
            ),
        }
    }
}
