//! Collaborator interfaces for the network transport and conversation storage.
//!
//! The assembler only ever sees these traits; `HttpClient` talks to the
//! backend and `FileStorage` reads the backend's conversation directory.

pub mod file_store;
pub mod http;

use std::collections::BTreeMap;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{ConversationRecord, ConversationSummary, ExecutionMode, Mode};

pub use file_store::FileStorage;
pub use http::HttpClient;

/// Incrementally delivered response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Network failure while opening or reading the event stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("stream interrupted: {0}")]
    Stream(String),
}

impl TransportError {
    /// Text shown to the user
    ///
    /// A rejected request surfaces the server's `detail` verbatim.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Body of `POST /api/conversations/{id}/message/stream`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageRequest {
    pub content: String,

    /// Per-agent instructions (DxO keys: lead_research, critic, domain_expert, aggregator)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_instructions: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
}

impl MessageRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_execution_mode(mut self, execution_mode: ExecutionMode) -> Self {
        self.execution_mode = Some(execution_mode);
        self
    }

    pub fn with_instructions(mut self, instructions: BTreeMap<String, String>) -> Self {
        if !instructions.is_empty() {
            self.user_instructions = Some(instructions);
        }
        self
    }
}

/// Opens the live event stream for one submission
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// Send the query and return the response body as it arrives
    async fn open_stream(
        &self,
        conversation_id: &str,
        request: &MessageRequest,
    ) -> Result<ByteStream, TransportError>;
}

/// Conversation persistence, owned by the backend
#[async_trait]
pub trait Storage: Send + Sync {
    async fn create(&self, mode: Mode) -> Result<ConversationRecord>;

    /// `None` when the conversation does not exist
    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>>;

    /// Newest first, optionally filtered by mode
    async fn list(&self, mode: Option<Mode>) -> Result<Vec<ConversationSummary>>;

    /// `false` when there was nothing to delete
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Plain-text transcript
    async fn export(&self, id: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_request_omits_unset_fields() {
        let body = serde_json::to_value(MessageRequest::new("hello")).unwrap();
        assert_eq!(body, json!({"content": "hello"}));

        let body = serde_json::to_value(
            MessageRequest::new("hello")
                .with_execution_mode(ExecutionMode::Parallel)
                .with_instructions(BTreeMap::from([("critic".to_string(), "be harsh".to_string())])),
        )
        .unwrap();
        assert_eq!(
            body,
            json!({
                "content": "hello",
                "user_instructions": {"critic": "be harsh"},
                "execution_mode": "parallel"
            })
        );
    }

    #[test]
    fn test_status_error_surfaces_detail() {
        let e = TransportError::Status {
            status: 404,
            detail: "Conversation not found".to_string(),
        };
        assert_eq!(e.user_message(), "Conversation not found");
        assert_eq!(
            TransportError::Request("refused".to_string()).user_message(),
            "request failed: refused"
        );
    }
}
