// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Database adapter.
//!
//! In-memory reference implementation of the database contract:
//! `db.{insert,get,update,delete,query}` over named collections of JSON
//! documents. Real backends plug in behind the same actions.

use async_trait::async_trait;
use dashmap::DashMap;
use orbyt_core::adapter::{
    require_string, Adapter, AdapterContext, AdapterError, AdapterResult, Capabilities, CostHint,
    ResourceAccess,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory document store keyed by collection, then document id.
#[derive(Debug, Default)]
pub struct DbAdapter {
    collections: DashMap<String, DashMap<String, Value>>,
}

impl DbAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality match of every filter key against the document.
    fn matches(document: &Value, filter: &serde_json::Map<String, Value>) -> bool {
        filter
            .iter()
            .all(|(key, expected)| document.get(key) == Some(expected))
    }
}

#[async_trait]
impl Adapter for DbAdapter {
    fn name(&self) -> &str {
        "db"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec![
            "db.insert".to_string(),
            "db.get".to_string(),
            "db.update".to_string(),
            "db.delete".to_string(),
            "db.query".to_string(),
        ]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            concurrent: true,
            cacheable: false,
            idempotent: false,
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
        let collection_name = match require_string(&input, "collection") {
            Ok(name) => name.to_string(),
            Err(error) => return AdapterResult::fail(error),
        };
        let collection = self
            .collections
            .entry(collection_name.clone())
            .or_default();
        let operation = action.rsplit('.').next().unwrap_or_default();
        ctx.log(format!("db {operation} {collection_name}"));

        match operation {
            "insert" => {
                let Some(document) = input.get("document") else {
                    return AdapterResult::fail(
                        AdapterError::new("missing required input `document`")
                            .with_code("InputValidation"),
                    );
                };
                let id = input
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                collection.insert(id.clone(), document.clone());
                AdapterResult::ok(json!({"id": id})).with_effect("db:write")
            }
            "get" => {
                let id = match require_string(&input, "id") {
                    Ok(id) => id,
                    Err(error) => return AdapterResult::fail(error),
                };
                match collection.get(id) {
                    Some(document) => AdapterResult::ok(json!({"document": document.clone()}))
                        .with_effect("db:read"),
                    None => AdapterResult::fail(
                        AdapterError::new(format!(
                            "document `{id}` not found in `{collection_name}`"
                        ))
                        .with_code("NotFound"),
                    ),
                }
            }
            "update" => {
                let id = match require_string(&input, "id") {
                    Ok(id) => id.to_string(),
                    Err(error) => return AdapterResult::fail(error),
                };
                let Some(document) = input.get("document") else {
                    return AdapterResult::fail(
                        AdapterError::new("missing required input `document`")
                            .with_code("InputValidation"),
                    );
                };
                let updated = collection.contains_key(&id);
                collection.insert(id, document.clone());
                AdapterResult::ok(json!({"updated": updated})).with_effect("db:write")
            }
            "delete" => {
                let id = match require_string(&input, "id") {
                    Ok(id) => id,
                    Err(error) => return AdapterResult::fail(error),
                };
                let deleted = collection.remove(id).is_some();
                AdapterResult::ok(json!({"deleted": deleted})).with_effect("db:write")
            }
            "query" => {
                let filter = match input.get("filter") {
                    Some(Value::Object(filter)) => filter.clone(),
                    Some(_) => {
                        return AdapterResult::fail(
                            AdapterError::new("`filter` must be a mapping")
                                .with_code("InputValidation"),
                        );
                    }
                    None => serde_json::Map::new(),
                };
                let mut documents: Vec<Value> = collection
                    .iter()
                    .filter(|entry| Self::matches(entry.value(), &filter))
                    .map(|entry| json!({"id": entry.key(), "document": entry.value().clone()}))
                    .collect();
                documents.sort_by_key(|d| d["id"].as_str().unwrap_or_default().to_string());
                let count = documents.len();
                AdapterResult::ok(json!({"documents": documents, "count": count}))
                    .with_effect("db:read")
            }
            other => AdapterResult::fail(
                AdapterError::new(format!("unsupported db operation `{other}`"))
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

    fn input(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let adapter = DbAdapter::new();
        let inserted = adapter
            .execute(
                "db.insert",
                input(&[
                    ("collection", json!("users")),
                    ("id", json!("u1")),
                    ("document", json!({"name": "ada"})),
                ]),
                &context(),
            )
            .await;
        assert!(inserted.success);
        assert_eq!(inserted.data["id"], "u1");

        let fetched = adapter
            .execute(
                "db.get",
                input(&[("collection", json!("users")), ("id", json!("u1"))]),
                &context(),
            )
            .await;
        assert_eq!(fetched.data["document"]["name"], "ada");
    }

    #[tokio::test]
    async fn test_insert_generates_id() {
        let adapter = DbAdapter::new();
        let inserted = adapter
            .execute(
                "db.insert",
                input(&[
                    ("collection", json!("users")),
                    ("document", json!({"name": "grace"})),
                ]),
                &context(),
            )
            .await;
        assert!(inserted.success);
        assert!(!inserted.data["id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_with_filter() {
        let adapter = DbAdapter::new();
        for (id, role) in [("u1", "admin"), ("u2", "viewer"), ("u3", "admin")] {
            adapter
                .execute(
                    "db.insert",
                    input(&[
                        ("collection", json!("users")),
                        ("id", json!(id)),
                        ("document", json!({"role": role})),
                    ]),
                    &context(),
                )
                .await;
        }
        let result = adapter
            .execute(
                "db.query",
                input(&[
                    ("collection", json!("users")),
                    ("filter", json!({"role": "admin"})),
                ]),
                &context(),
            )
            .await;
        assert_eq!(result.data["count"], 2);
    }

    #[tokio::test]
    async fn test_get_missing_fails() {
        let adapter = DbAdapter::new();
        let result = adapter
            .execute(
                "db.get",
                input(&[("collection", json!("users")), ("id", json!("nope"))]),
                &context(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code.as_deref(), Some("NotFound"));
    }

    #[tokio::test]
    async fn test_delete_reports_absence() {
        let adapter = DbAdapter::new();
        let result = adapter
            .execute(
                "db.delete",
                input(&[("collection", json!("users")), ("id", json!("nope"))]),
                &context(),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.data["deleted"], false);
    }
}
