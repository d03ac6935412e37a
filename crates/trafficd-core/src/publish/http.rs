//! HTTP-backed bus and blob store.
//!
//! The bus is a push gateway: each envelope is POSTed as JSON to
//! `{base_url}/topics/{topic}` and a 2xx response is the acknowledgment.
//! Uploads use the object storage JSON media upload endpoint.

use super::{BlobStore, MessageBus};
use crate::config::PublishConfig;
use crate::{DispatchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::debug;

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(PublishConfig::USER_AGENT)
        .build()
        .map_err(|e| DispatchError::Config {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Server errors and throttling are worth retrying; other statuses are not.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Message bus reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMessageBus {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpMessageBus {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client(PublishConfig::REQUEST_TIMEOUT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Send `token` as a bearer token when set.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, urlencoding::encode(topic))
    }
}

#[async_trait]
impl MessageBus for HttpMessageBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String> {
        let request = self
            .client
            .post(self.topic_url(topic))
            .header(header::CONTENT_TYPE, "application/json")
            .body(payload);
        let response = authorize(request, self.auth_token.as_deref()).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Publish {
                message: format!("bus returned {}: {}", status, body.trim()),
                retryable: is_retryable_status(status),
            });
        }

        let body = response.bytes().await?;
        let message_id = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("messageId").and_then(|id| id.as_str()).map(String::from))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        debug!("Bus acknowledged {} on {}", message_id, topic);
        Ok(message_id)
    }
}

/// Object store reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client(PublishConfig::REQUEST_TIMEOUT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Send `token` as a bearer token when set.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    fn upload_url(&self, bucket: &str, name: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.base_url,
            urlencoding::encode(bucket),
            urlencoding::encode(name)
        )
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, bucket: &str, name: &str, data: Bytes) -> Result<()> {
        let request = self
            .client
            .post(self.upload_url(bucket, name))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data);

        let response = authorize(request, self.auth_token.as_deref())
            .send()
            .await
            .map_err(|e| DispatchError::Upload {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Upload {
                name: name.to_string(),
                message: format!("storage returned {}", status),
            });
        }
        Ok(())
    }
}
