// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Webhook adapter.
//!
//! `webhook.send` POSTs a JSON payload to a target URL. When a `secret`
//! input is provided, the request carries an HMAC-SHA256 signature of
//! the exact payload bytes in the `X-Webhook-Signature` header
//! (`sha256=<hex>`), so receivers can verify origin and integrity.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use orbyt_core::adapter::{
    optional_string, require_string, Adapter, AdapterContext, AdapterError, AdapterResult,
    Capabilities, CostHint, ResourceAccess,
};
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Outbound webhook adapter.
pub struct WebhookAdapter {
    client: reqwest::Client,
}

impl Default for WebhookAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

/// `sha256=<hex>` HMAC of the payload bytes, keyed by the shared secret.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl Adapter for WebhookAdapter {
    fn name(&self) -> &str {
        "webhook"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec!["webhook.send".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            concurrent: true,
            cacheable: false,
            idempotent: false,
            resources: ResourceAccess {
                filesystem: false,
                network: true,
            },
            cost: CostHint::Medium,
        }
    }

    async fn execute(
        &self,
        _action: &str,
        input: HashMap<String, Value>,
        ctx: &AdapterContext,
    ) -> AdapterResult {
        let url = match require_string(&input, "url") {
            Ok(url) => url.to_string(),
            Err(error) => return AdapterResult::fail(error),
        };
        let payload = input.get("payload").cloned().unwrap_or(Value::Null);
        // The signed bytes must be the bytes sent, so the body is
        // serialized once here rather than via the json() builder.
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(error) => {
                return AdapterResult::fail(
                    AdapterError::new(format!("payload is not serializable: {error}"))
                        .with_code("InputValidation"),
                );
            }
        };

        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(body.clone())
            .timeout(Duration::from_millis(ctx.deadline_ms.max(1)));
        if let Some(Value::Object(headers)) = input.get("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }
        let signed = match optional_string(&input, "secret") {
            Some(secret) => {
                request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body));
                true
            }
            None => false,
        };

        ctx.log(format!("webhook POST {url} (signed: {signed})"));

        let response = tokio::select! {
            response = request.send() => response,
            _ = ctx.cancellation.cancelled() => {
                return AdapterResult::fail(
                    AdapterError::new("webhook cancelled").with_code("Cancelled"),
                );
            }
        };

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                if response.status().is_success() {
                    AdapterResult::ok(json!({"status": status, "signed": signed}))
                        .with_effect("net:webhook")
                } else {
                    AdapterResult::fail(
                        AdapterError::new(format!("{url} returned status {status}"))
                            .with_code("HttpStatus")
                            .with_details(json!({"status": status})),
                    )
                }
            }
            Err(error) => AdapterResult::fail(
                AdapterError::new(format!("webhook failed: {error}")).with_code("HttpTransport"),
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

    #[tokio::test]
    async fn test_send_posts_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::Json(json!({"event": "done"})))
            .with_status(200)
            .create_async()
            .await;

        let adapter = WebhookAdapter::new();
        let input = HashMap::from([
            (
                "url".to_string(),
                Value::String(format!("{}/hook", server.url())),
            ),
            ("payload".to_string(), json!({"event": "done"})),
        ]);
        let result = adapter.execute("webhook.send", input, &context()).await;

        mock.assert_async().await;
        assert!(result.success);
        assert_eq!(result.data["status"], 200);
        assert_eq!(result.data["signed"], false);
    }

    #[tokio::test]
    async fn test_secret_adds_payload_signature() {
        let payload = json!({"event": "deploy"});
        let expected =
            sign_payload("whsec_k3y", &serde_json::to_vec(&payload).unwrap());

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header(SIGNATURE_HEADER, expected.as_str())
            .match_body(mockito::Matcher::Json(payload.clone()))
            .with_status(200)
            .create_async()
            .await;

        let adapter = WebhookAdapter::new();
        let input = HashMap::from([
            (
                "url".to_string(),
                Value::String(format!("{}/hook", server.url())),
            ),
            ("payload".to_string(), payload),
            ("secret".to_string(), json!("whsec_k3y")),
        ]);
        let result = adapter.execute("webhook.send", input, &context()).await;

        mock.assert_async().await;
        assert!(result.success);
        assert_eq!(result.data["signed"], true);
    }

    #[test]
    fn test_signature_is_keyed_and_deterministic() {
        let payload = br#"{"event":"done"}"#;
        let first = sign_payload("secret-a", payload);
        let second = sign_payload("secret-a", payload);
        let other_key = sign_payload("secret-b", payload);
        assert_eq!(first, second);
        assert_ne!(first, other_key);
        assert!(first.starts_with("sha256="));
        assert_eq!(first.len(), "sha256=".len() + 64);
    }

    #[tokio::test]
    async fn test_failure_status_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let adapter = WebhookAdapter::new();
        let input = HashMap::from([(
            "url".to_string(),
            Value::String(format!("{}/hook", server.url())),
        )]);
        let result = adapter.execute("webhook.send", input, &context()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code.as_deref(), Some("HttpStatus"));
    }
}
