//! REST client for the council backend.
//!
//! Endpoints:
//! - POST   /api/conversations/{id}/message/stream  (event stream)
//! - POST   /api/conversations                      {mode}
//! - GET    /api/conversations[?mode=]
//! - GET    /api/conversations/{id}
//! - DELETE /api/conversations/{id}
//! - GET    /api/conversations/{id}/export          (plain text)

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::ResolvedConfig;
use crate::domain::{ConversationRecord, ConversationSummary, Mode};

use super::{ByteStream, MessageRequest, Storage, Transport, TransportError};

/// HTTP client for one backend
#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpClient {
    /// Create a client with reqwest's default settings
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a client that gives up connecting after `timeout`
    ///
    /// Only connection setup is bounded; a slow stream is never cut off.
    pub fn with_connect_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Create from resolved configuration
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        Self::with_connect_timeout(config.api_url.clone(), config.connect_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn conversation_url(&self, id: &str) -> String {
        self.url(&format!("/api/conversations/{}", id))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Value,
}

/// Turn a non-success response into a `TransportError`
///
/// The server's `detail` string is preferred; otherwise the raw body.
async fn status_error(response: reqwest::Response) -> TransportError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let detail = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            detail: Value::String(detail),
        }) => detail,
        _ if text.is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        _ => text,
    };

    TransportError::Status {
        status: status.as_u16(),
        detail,
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(response).await)
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    TransportError::Request(e.to_string())
}

#[async_trait]
impl Transport for HttpClient {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, request), fields(base_url = %self.base_url))]
    async fn open_stream(
        &self,
        conversation_id: &str,
        request: &MessageRequest,
    ) -> Result<ByteStream, TransportError> {
        let url = format!("{}/message/stream", self.conversation_url(conversation_id));
        debug!(%url, "Opening event stream");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(request_error)?;
        let response = check(response).await?;

        let bytes = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| TransportError::Stream(e.to_string()))
        });
        Ok(Box::pin(bytes))
    }
}

#[async_trait]
impl Storage for HttpClient {
    async fn create(&self, mode: Mode) -> Result<ConversationRecord> {
        let response = self
            .client
            .post(self.url("/api/conversations"))
            .json(&serde_json::json!({ "mode": mode }))
            .send()
            .await
            .map_err(request_error)
            .context("Failed to create conversation")?;

        let mut record: ConversationRecord = check(response)
            .await?
            .json()
            .await
            .context("Invalid conversation response")?;
        // The backend's response model omits the mode
        record.mode = mode;
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let response = self
            .client
            .get(self.conversation_url(id))
            .send()
            .await
            .map_err(request_error)
            .with_context(|| format!("Failed to fetch conversation {}", id))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let mut body: Value = check(response)
            .await?
            .json()
            .await
            .context("Invalid conversation response")?;

        // The backend's response model omits the mode; recover it from the listing
        if body.get("mode").is_none() {
            let mode = self
                .list(None)
                .await?
                .into_iter()
                .find(|summary| summary.id == id)
                .map(|summary| summary.mode)
                .unwrap_or_default();
            if let Some(fields) = body.as_object_mut() {
                fields.insert("mode".to_string(), serde_json::to_value(mode)?);
            }
        }

        let record = serde_json::from_value(body).context("Invalid conversation response")?;
        Ok(Some(record))
    }

    async fn list(&self, mode: Option<Mode>) -> Result<Vec<ConversationSummary>> {
        let mut request = self.client.get(self.url("/api/conversations"));
        if let Some(mode) = mode {
            request = request.query(&[("mode", mode.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(request_error)
            .context("Failed to list conversations")?;

        check(response)
            .await?
            .json()
            .await
            .context("Invalid conversation list")
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.conversation_url(id))
            .send()
            .await
            .map_err(request_error)
            .with_context(|| format!("Failed to delete conversation {}", id))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    async fn export(&self, id: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/export", self.conversation_url(id)))
            .send()
            .await
            .map_err(request_error)
            .with_context(|| format!("Failed to export conversation {}", id))?;

        check(response)
            .await?
            .text()
            .await
            .context("Failed to read export")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_strip_trailing_slash() {
        let client = HttpClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(
            client.conversation_url("abc"),
            "http://localhost:8000/api/conversations/abc"
        );
    }

    #[test]
    fn test_from_config() {
        let config = ResolvedConfig {
            api_url: "http://council:9000".to_string(),
            ..Default::default()
        };
        let client = HttpClient::from_config(&config).unwrap();
        assert_eq!(client.base_url(), "http://council:9000");
        assert_eq!(client.name(), "http");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_a_request_error() {
        // Port 9 (discard) is not expected to accept HTTP connections
        let client = HttpClient::with_connect_timeout("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let err = client
            .open_stream("c1", &MessageRequest::new("hello"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Request(_)));
    }
}
