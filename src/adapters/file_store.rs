//! Conversation storage read straight from the backend's data directory.
//!
//! One pretty-printed JSON file per conversation, named `{id}.json`, in
//! the layout the backend itself writes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::ConversationAssembler;
use crate::domain::conversation::DEFAULT_TITLE;
use crate::domain::{render_transcript, ConversationRecord, ConversationSummary, Mode};

use super::Storage;

/// File-based conversation store
#[derive(Debug, Clone)]
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of one conversation file
    ///
    /// Ids are file names, so anything that could escape the directory is refused.
    pub fn conversation_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            anyhow::bail!("Invalid conversation id: {:?}", id);
        }
        Ok(self.data_dir.join(format!("{}.json", id)))
    }

    /// Write a record, replacing any existing file
    pub async fn save(&self, record: &ConversationRecord) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", self.data_dir.display()))?;

        let path = self.conversation_path(&record.id)?;
        let json = serde_json::to_string_pretty(record).context("Failed to serialize conversation")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write conversation: {}", path.display()))?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<ConversationRecord> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read conversation: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse conversation: {}", path.display()))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn create(&self, mode: Mode) -> Result<ConversationRecord> {
        let record = ConversationRecord {
            id: Uuid::new_v4().to_string(),
            // Naive UTC with microseconds, as the backend writes it
            created_at: Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            title: DEFAULT_TITLE.to_string(),
            mode,
            messages: Vec::new(),
        };

        self.save(&record).await?;
        debug!(id = %record.id, %mode, "Created conversation");
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let path = self.conversation_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        self.load(&path).await.map(Some)
    }

    async fn list(&self, mode: Option<Mode>) -> Result<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();

        if !self.data_dir.exists() {
            return Ok(summaries);
        }

        let mut entries = fs::read_dir(&self.data_dir)
            .await
            .with_context(|| format!("Failed to read data directory: {}", self.data_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let record = match self.load(&path).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable conversation");
                    continue;
                }
            };

            if mode.is_some_and(|mode| record.mode != mode) {
                continue;
            }
            summaries.push(ConversationSummary::from(&record));
        }

        // Newest first; the timestamp format sorts lexically
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.conversation_path(id)?;
        if !path.exists() {
            return Ok(false);
        }

        fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to delete conversation: {}", path.display()))?;
        Ok(true)
    }

    async fn export(&self, id: &str) -> Result<String> {
        let record = self
            .get(id)
            .await?
            .with_context(|| format!("Conversation not found: {}", id))?;

        let assembler = ConversationAssembler::from_record(&record)?;
        Ok(render_transcript(assembler.conversation()))
    }
}
