//! HTTP transport port.
//!
//! `Transport` is the one seam between the engine and the wire: production
//! uses `HttpTransport` (reqwest), tests script a mock. Non-2xx statuses
//! surface as typed `NetError`s so callers can branch on retryability.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::NetError;
use crate::models::{ApiRequest, ApiResponse, Method, ResponseSource};

/// Header carrying the mutation id on replay attempts. The remote API treats
/// repeated deliveries of the same key as a no-op returning the original
/// result.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, NetError>;
}

/// Transport over reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    /// `timeout` bounds every attempt; a timed-out replay counts as a
    /// network failure for retry purposes.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Create a transport with the given bearer token, sharing the
    /// connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    fn method_for(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, NetError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(Self::method_for(request.method), &url);

        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout
            } else {
                NetError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.to_string(), value.to_string());
            }
        }

        let text = response
            .text()
            .await
            .map_err(|e| NetError::Network(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(NetError::from_status(status, &text));
        }

        let body = if text.is_empty() {
            Value::Null
        } else {
            // Non-JSON bodies (assets) are snapshotted as strings
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ApiResponse {
            status,
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}
