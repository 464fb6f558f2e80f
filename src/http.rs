//! Blocking JSON-over-HTTP transport shared by the source and destination clients

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::SyncError;
use crate::{PRODUCER_NAME, SYNC_VERSION};

/// Authenticated JSON client bound to one base URL
pub struct HttpTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        bearer_token: &str,
        extra_headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", bearer_token.trim()))
            .map_err(|_| SyncError::Config("invalid bearer token".into()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SyncError::Config(format!("invalid header name {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| SyncError::Config(format!("invalid value for header {name}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(format!("{PRODUCER_NAME}/{SYNC_VERSION}"))
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, SyncError> {
        let builder = self.client.get(self.url(path)).query(query);
        self.send(builder, path)
    }

    pub fn post_json(&self, path: &str, body: &Value) -> Result<Value, SyncError> {
        let builder = self.client.post(self.url(path)).json(body);
        self.send(builder, path)
    }

    pub fn patch_json(&self, path: &str, body: &Value) -> Result<Value, SyncError> {
        let builder = self.client.patch(self.url(path)).json(body);
        self.send(builder, path)
    }

    fn send(&self, builder: RequestBuilder, endpoint: &str) -> Result<Value, SyncError> {
        let response = builder
            .timeout(self.timeout)
            .send()
            .map_err(|e| SyncError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        let body = response
            .text()
            .unwrap_or_else(|_| "<failed to read response body>".to_string());
        debug!(endpoint, status = status.as_u16(), bytes = body.len(), "http response");

        if !status.is_success() {
            return Err(SyncError::http(endpoint, status.as_u16(), body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}
