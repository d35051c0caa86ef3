//! `http_get` - fetch a URL
//!
//! Transport failures, 429 and 5xx responses are retryable capability
//! errors; other non-success statuses are returned as data so conditions
//! can branch on `status`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Capability, InvocationContext, ToolDescriptor};
use crate::contracts::{PropertySchema, Schema};
use crate::error::FlowError;

/// Default timeout for a single request
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Bodies above this size are truncated
const MAX_BODY_CHARS: usize = 200_000;

#[derive(Debug, Deserialize)]
struct HttpGetArgs {
    url: String,
    #[serde(default)]
    headers: std::collections::BTreeMap<String, String>,
}

pub struct HttpGetTool {
    client: Client,
    timeout: Duration,
}

impl Default for HttpGetTool {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpGetTool {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Capability for HttpGetTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("http_get", 0, "Fetch a URL and return its status and body")
            .with_parameters(
                Schema::strict()
                    .required_property(
                        "url",
                        PropertySchema::string()
                            .with_length(Some(1), None)
                            .with_description("Absolute http(s) URL"),
                    )
                    .property("headers", PropertySchema::object()),
            )
            .with_result(
                Schema::any()
                    .required_property("status", PropertySchema::integer())
                    .required_property("body", PropertySchema::any()),
            )
    }

    async fn invoke(&self, params: Value, ctx: &InvocationContext) -> Result<Value, FlowError> {
        let args: HttpGetArgs = serde_json::from_value(params)
            .map_err(|e| FlowError::schema("$.http_get", format!("invalid arguments: {}", e)))?;
        if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
            return Err(FlowError::schema("$.url", format!("'{}' is not an http(s) URL", args.url)));
        }

        let mut request = self.client.get(&args.url).timeout(self.timeout);
        for (name, value) in &args.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                "timed out"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "request failed"
            };
            warn!(step_id = %ctx.step_id, url = %args.url, error = %e, "HTTP {}", kind);
            FlowError::capability_retryable("http_get", format!("{}: {}", kind, e))
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response
            .text()
            .await
            .map_err(|e| FlowError::capability_retryable("http_get", format!("reading body failed: {}", e)))?;

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(FlowError::capability_retryable(
                "http_get",
                format!("server responded {}", status.as_u16()),
            ));
        }

        debug!(step_id = %ctx.step_id, url = %args.url, status = status.as_u16(), bytes = text.len(), "Fetched");

        let body = if content_type.contains("json") {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else if text.chars().count() > MAX_BODY_CHARS {
            Value::String(text.chars().take(MAX_BODY_CHARS).collect())
        } else {
            Value::String(text)
        };

        Ok(json!({
            "status": status.as_u16(),
            "content_type": content_type,
            "body": body,
        }))
    }
}
