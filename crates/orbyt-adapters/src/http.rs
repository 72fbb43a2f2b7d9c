// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! HTTP adapter.
//!
//! Supports `http.request.{get,post,put,patch,delete,head}`. The
//! response body is auto-decoded by content type: `application/json`
//! becomes a JSON value, everything else is returned as text.

use async_trait::async_trait;
use orbyt_core::adapter::{
    optional_u64, require_string, Adapter, AdapterContext, AdapterError, AdapterResult,
    Capabilities, CostHint, ResourceAccess,
};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// HTTP adapter backed by a shared reqwest client.
pub struct HttpAdapter {
    client: reqwest::Client,
}

impl Default for HttpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn method_for(action: &str) -> Option<Method> {
        match action.rsplit('.').next()? {
            "get" => Some(Method::GET),
            "post" => Some(Method::POST),
            "put" => Some(Method::PUT),
            "patch" => Some(Method::PATCH),
            "delete" => Some(Method::DELETE),
            "head" => Some(Method::HEAD),
            _ => None,
        }
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn name(&self) -> &str {
        "http"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec!["http.request.*".to_string()]
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
        action: &str,
        input: HashMap<String, Value>,
        ctx: &AdapterContext,
    ) -> AdapterResult {
        let url = match require_string(&input, "url") {
            Ok(url) => url.to_string(),
            Err(error) => return AdapterResult::fail(error),
        };
        let Some(method) = Self::method_for(action) else {
            return AdapterResult::fail(
                AdapterError::new(format!("unsupported http action `{action}`"))
                    .with_code("UnknownAction"),
            );
        };

        let mut request = self
            .client
            .request(method.clone(), &url)
            .timeout(Duration::from_millis(ctx.deadline_ms.max(1)));

        if let Some(Value::Object(headers)) = input.get("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }
        if let Some(Value::Object(query)) = input.get("query") {
            let pairs: Vec<(String, String)> = query
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect();
            request = request.query(&pairs);
        }
        if let Some(body) = input.get("body") {
            request = request.json(body);
        }
        if let Some(timeout_ms) = optional_u64(&input, "timeout_ms") {
            // Still bounded by the enforced deadline.
            request = request.timeout(Duration::from_millis(timeout_ms.min(ctx.deadline_ms)));
        }

        ctx.log(format!("{method} {url}"));

        let response = tokio::select! {
            response = request.send() => response,
            _ = ctx.cancellation.cancelled() => {
                return AdapterResult::fail(
                    AdapterError::new("request cancelled").with_code("Cancelled"),
                );
            }
        };

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                return AdapterResult::fail(
                    AdapterError::new(format!("request failed: {error}"))
                        .with_code("HttpTransport"),
                );
            }
        };

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let content_type = headers
            .get("content-type")
            .cloned()
            .unwrap_or_default();

        let raw = match response.text().await {
            Ok(raw) => raw,
            Err(error) => {
                return AdapterResult::fail(
                    AdapterError::new(format!("failed to read response body: {error}"))
                        .with_code("HttpTransport"),
                );
            }
        };
        let body = if content_type.contains("application/json") {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        } else {
            Value::String(raw)
        };

        ctx.log(format!("{method} {url} -> {}", status.as_u16()));

        let data = json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        });

        if status.is_success() {
            AdapterResult::ok(data).with_effect("net:request")
        } else {
            AdapterResult::fail(
                AdapterError::new(format!("{url} returned status {}", status.as_u16()))
                    .with_code("HttpStatus")
                    .with_details(data),
            )
        }
    }
}
