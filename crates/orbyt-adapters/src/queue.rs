// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Queue adapter.
//!
//! In-memory reference queue implementing the message contract:
//! `queue.{publish,consume,ack,nack,size}`. A consumed message stays
//! in-flight until acked; a nack with `requeue` puts it back at the
//! tail with its delivery count incremented.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orbyt_core::adapter::{
    bool_input, require_string, Adapter, AdapterContext, AdapterError, AdapterResult,
    Capabilities, CostHint, ResourceAccess,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// A queued message, per the consumer contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
    pub delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Message>,
    in_flight: HashMap<String, Message>,
}

/// In-memory queue adapter.
#[derive(Debug, Default)]
pub struct QueueAdapter {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl QueueAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for QueueAdapter {
    fn name(&self) -> &str {
        "queue"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec![
            "queue.publish".to_string(),
            "queue.consume".to_string(),
            "queue.ack".to_string(),
            "queue.nack".to_string(),
            "queue.size".to_string(),
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
        let queue_name = match require_string(&input, "queue") {
            Ok(name) => name.to_string(),
            Err(error) => return AdapterResult::fail(error),
        };
        let operation = action.rsplit('.').next().unwrap_or_default();
        ctx.log(format!("queue {operation} {queue_name}"));

        let mut queues = self.queues.lock();
        let queue = queues.entry(queue_name.clone()).or_default();

        match operation {
            "publish" => {
                let Some(body) = input.get("body") else {
                    return AdapterResult::fail(
                        AdapterError::new("missing required input `body`")
                            .with_code("InputValidation"),
                    );
                };
                let headers = input.get("headers").and_then(|h| {
                    h.as_object().map(|map| {
                        map.iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect::<HashMap<_, _>>()
                    })
                });
                let message = Message {
                    id: Uuid::new_v4().to_string(),
                    body: body.clone(),
                    headers,
                    timestamp: Utc::now(),
                    delivery_count: 0,
                };
                let id = message.id.clone();
                queue.pending.push_back(message);
                AdapterResult::ok(json!({"messageId": id})).with_effect("queue:publish")
            }
            "consume" => match queue.pending.pop_front() {
                Some(mut message) => {
                    message.delivery_count += 1;
                    let payload = serde_json::to_value(&message).unwrap_or(Value::Null);
                    queue.in_flight.insert(message.id.clone(), message);
                    AdapterResult::ok(json!({"message": payload})).with_effect("queue:consume")
                }
                None => AdapterResult::ok(json!({"message": null})),
            },
            "ack" => {
                let id = match require_string(&input, "messageId") {
                    Ok(id) => id,
                    Err(error) => return AdapterResult::fail(error),
                };
                let acked = queue.in_flight.remove(id).is_some();
                if acked {
                    AdapterResult::ok(json!({"acked": true})).with_effect("queue:ack")
                } else {
                    AdapterResult::fail(
                        AdapterError::new(format!("message `{id}` is not in flight"))
                            .with_code("NotFound"),
                    )
                }
            }
            "nack" => {
                let id = match require_string(&input, "messageId") {
                    Ok(id) => id,
                    Err(error) => return AdapterResult::fail(error),
                };
                let requeue = bool_input(&input, "requeue", true);
                match queue.in_flight.remove(id) {
                    Some(message) => {
                        if requeue {
                            queue.pending.push_back(message);
                        }
                        AdapterResult::ok(json!({"nacked": true, "requeued": requeue}))
                            .with_effect("queue:nack")
                    }
                    None => AdapterResult::fail(
                        AdapterError::new(format!("message `{id}` is not in flight"))
                            .with_code("NotFound"),
                    ),
                }
            }
            "size" => AdapterResult::ok(json!({
                "size": queue.pending.len(),
                "inFlight": queue.in_flight.len(),
            })),
            other => AdapterResult::fail(
                AdapterError::new(format!("unsupported queue operation `{other}`"))
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

    async fn publish(adapter: &QueueAdapter, body: Value) -> String {
        let result = adapter
            .execute(
                "queue.publish",
                input(&[("queue", json!("jobs")), ("body", body)]),
                &context(),
            )
            .await;
        assert!(result.success);
        result.data["messageId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_publish_consume_ack() {
        let adapter = QueueAdapter::new();
        let id = publish(&adapter, json!({"task": "index"})).await;

        let consumed = adapter
            .execute("queue.consume", input(&[("queue", json!("jobs"))]), &context())
            .await;
        let message = &consumed.data["message"];
        assert_eq!(message["id"], json!(id));
        assert_eq!(message["deliveryCount"], 1);
        assert_eq!(message["body"]["task"], "index");

        let acked = adapter
            .execute(
                "queue.ack",
                input(&[("queue", json!("jobs")), ("messageId", json!(id))]),
                &context(),
            )
            .await;
        assert!(acked.success);

        let size = adapter
            .execute("queue.size", input(&[("queue", json!("jobs"))]), &context())
            .await;
        assert_eq!(size.data["size"], 0);
        assert_eq!(size.data["inFlight"], 0);
    }

    #[tokio::test]
    async fn test_nack_requeues_with_higher_delivery_count() {
        let adapter = QueueAdapter::new();
        let id = publish(&adapter, json!("payload")).await;

        adapter
            .execute("queue.consume", input(&[("queue", json!("jobs"))]), &context())
            .await;
        adapter
            .execute(
                "queue.nack",
                input(&[("queue", json!("jobs")), ("messageId", json!(id))]),
                &context(),
            )
            .await;

        let redelivered = adapter
            .execute("queue.consume", input(&[("queue", json!("jobs"))]), &context())
            .await;
        assert_eq!(redelivered.data["message"]["deliveryCount"], 2);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_drops() {
        let adapter = QueueAdapter::new();
        let id = publish(&adapter, json!("payload")).await;
        adapter
            .execute("queue.consume", input(&[("queue", json!("jobs"))]), &context())
            .await;
        adapter
            .execute(
                "queue.nack",
                input(&[
                    ("queue", json!("jobs")),
                    ("messageId", json!(id)),
                    ("requeue", json!(false)),
                ]),
                &context(),
            )
            .await;

        let empty = adapter
            .execute("queue.consume", input(&[("queue", json!("jobs"))]), &context())
            .await;
        assert_eq!(empty.data["message"], Value::Null);
    }

    #[tokio::test]
    async fn test_consume_empty_returns_null() {
        let adapter = QueueAdapter::new();
        let result = adapter
            .execute("queue.consume", input(&[("queue", json!("empty"))]), &context())
            .await;
        assert!(result.success);
        assert_eq!(result.data["message"], Value::Null);
    }

    #[tokio::test]
    async fn test_ack_unknown_message_fails() {
        let adapter = QueueAdapter::new();
        let result = adapter
            .execute(
                "queue.ack",
                input(&[("queue", json!("jobs")), ("messageId", json!("ghost"))]),
                &context(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code.as_deref(), Some("NotFound"));
    }
}
