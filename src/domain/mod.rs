//! Domain types for the council client.
//!
//! This module contains the core data structures:
//! - Turn: per-topology assistant turn shapes
//! - Conversation: transcript plus its persisted record form
//! - Events: raw and decoded stream events
//! - Export: plain-text transcript rendering

pub mod conversation;
pub mod events;
pub mod export;
pub mod turn;

// Re-export commonly used types
pub use conversation::{Conversation, ConversationRecord, ConversationSummary, Message, Mode};
pub use events::{
    Branch, CouncilEvent, DecodeError, DxoEvent, RankingMetadata, RawEvent, StreamEvent, Topology,
};
pub use export::render_transcript;
pub use turn::{
    AgentResult, AggregateRankingEntry, AssistantTurn, ChairmanResult, CouncilTurn, DxoTurn,
    ExecutionMode, ModelResult, RankingResult, SuperChatTurn,
};
