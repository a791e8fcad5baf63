//! Conversation transcript and its persisted record form.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::turn::{AssistantTurn, CouncilTurn, DxoTurn, ExecutionMode, SuperChatTurn};

/// Pipeline topology a conversation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Council,

    #[serde(rename = "DxO", alias = "dxo", alias = "Dxo")]
    Dxo,

    #[serde(rename = "Super Chat", alias = "SuperChat", alias = "superchat")]
    SuperChat,
}

impl Mode {
    /// Name used on the wire and in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Council => "Council",
            Self::Dxo => "DxO",
            Self::SuperChat => "Super Chat",
        }
    }

    /// Empty turn in the shape this mode produces
    pub fn empty_turn(&self, execution_mode: ExecutionMode) -> AssistantTurn {
        match self {
            Self::Council => AssistantTurn::Council(CouncilTurn::default()),
            Self::Dxo => AssistantTurn::Dxo(DxoTurn::default()),
            Self::SuperChat => AssistantTurn::SuperChat(SuperChatTurn::new(execution_mode)),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: String,
        timestamp: DateTime<Utc>,
    },
    Assistant {
        turn: AssistantTurn,
        timestamp: DateTime<Utc>,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(turn: AssistantTurn) -> Self {
        Self::Assistant {
            turn,
            timestamp: Utc::now(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    pub fn turn(&self) -> Option<&AssistantTurn> {
        match self {
            Self::Assistant { turn, .. } => Some(turn),
            Self::User { .. } => None,
        }
    }
}

/// The canonical transcript consumed by presentation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub mode: Mode,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, mode: Mode) -> Self {
        Self {
            id: id.into(),
            mode,
            created_at: Utc::now(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
        }
    }

    /// Assistant turns in transcript order
    pub fn turns(&self) -> impl Iterator<Item = &AssistantTurn> {
        self.messages.iter().filter_map(Message::turn)
    }

    /// The most recent assistant turn, if any
    pub fn last_turn(&self) -> Option<&AssistantTurn> {
        self.messages.iter().rev().find_map(Message::turn)
    }
}

/// Title the backend gives a conversation before the first exchange
pub const DEFAULT_TITLE: &str = "New Conversation";

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

/// A conversation as the storage collaborator returns it
///
/// Messages stay loosely typed here: the assistant shape depends on `mode`
/// and is decoded by the assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,

    #[serde(default)]
    pub created_at: String,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub messages: Vec<Value>,
}

/// List-view metadata for a stored conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: String,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub message_count: usize,
}

impl From<&ConversationRecord> for ConversationSummary {
    fn from(record: &ConversationRecord) -> Self {
        Self {
            id: record.id.clone(),
            created_at: record.created_at.clone(),
            title: record.title.clone(),
            mode: record.mode,
            message_count: record.messages.len(),
        }
    }
}

/// Parse a stored timestamp
///
/// The backend writes naive UTC (`2024-05-01T12:00:00.123456`); RFC 3339 is
/// accepted as well.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_wire_names() {
        assert_eq!(serde_json::to_value(Mode::SuperChat).unwrap(), json!("Super Chat"));
        assert_eq!(serde_json::to_value(Mode::Dxo).unwrap(), json!("DxO"));

        let parsed: Mode = serde_json::from_value(json!("SuperChat")).unwrap();
        assert_eq!(parsed, Mode::SuperChat);
    }

    #[test]
    fn test_record_defaults() {
        let record: ConversationRecord = serde_json::from_value(json!({"id": "abc"})).unwrap();
        assert_eq!(record.mode, Mode::Council);
        assert_eq!(record.title, DEFAULT_TITLE);
        assert!(record.messages.is_empty());
    }

    #[test]
    fn test_parse_backend_timestamp() {
        let naive = parse_timestamp("2024-05-01T12:00:00.123456").unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-05-01T12:00:00.123456+00:00");

        let rfc = parse_timestamp("2024-05-01T12:00:00Z").unwrap();
        assert_eq!(rfc.timestamp(), naive.timestamp());

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_summary_counts_messages() {
        let record: ConversationRecord = serde_json::from_value(json!({
            "id": "abc",
            "created_at": "2024-05-01T12:00:00",
            "mode": "DxO",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        let summary = ConversationSummary::from(&record);
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.mode, Mode::Dxo);
    }
}
