//! Conversation assembly.
//!
//! The assembler owns the canonical [`Conversation`] for a session. Turns
//! arrive two ways: live, by reducing stream events into the open turn, or
//! historically, by decoding a stored record in one shot. Both produce the
//! same [`AssistantTurn`] values.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::conversation::parse_timestamp;
use crate::domain::{
    AssistantTurn, Conversation, ConversationRecord, CouncilTurn, DxoTurn, ExecutionMode, Message,
    Mode, StreamEvent, SuperChatTurn, Topology,
};

use super::reducer::{Applied, TurnState};
use super::rollback::{RollbackController, TurnError};

/// Receives live updates while a turn streams in
pub trait TurnObserver: Send {
    /// Called after every event that changed the open turn
    fn on_turn_update(&mut self, turn: &AssistantTurn);

    /// Called when the progress indicator changes
    fn on_progress(&mut self, _progress: u8) {}

    fn on_title(&mut self, _title: &str) {}
}

/// Observer that discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TurnObserver for NoopObserver {
    fn on_turn_update(&mut self, _turn: &AssistantTurn) {}
}

/// Merges live and stored turns into one conversation
#[derive(Debug)]
pub struct ConversationAssembler {
    conversation: Conversation,
    open: Option<TurnState>,
    rollback: RollbackController,
}

impl ConversationAssembler {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            open: None,
            rollback: RollbackController::new(),
        }
    }

    /// Build a conversation from a stored record
    ///
    /// Stored messages carry no timestamps; they inherit the record's
    /// creation time.
    pub fn from_record(record: &ConversationRecord) -> Result<Self> {
        let created_at = parse_timestamp(&record.created_at).unwrap_or_else(|| {
            if !record.created_at.is_empty() {
                warn!(created_at = %record.created_at, "Unreadable conversation timestamp");
            }
            Utc::now()
        });

        let mut messages = Vec::with_capacity(record.messages.len());
        for (index, stored) in record.messages.iter().enumerate() {
            let role = stored.get("role").and_then(Value::as_str).unwrap_or_default();
            match role {
                "user" => messages.push(Message::User {
                    content: stored
                        .get("content")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    timestamp: created_at,
                }),
                "assistant" => {
                    let turn = decode_turn(record.mode, stored.clone()).with_context(|| {
                        format!("Failed to decode message {} of conversation {}", index, record.id)
                    })?;
                    messages.push(Message::Assistant {
                        turn,
                        timestamp: created_at,
                    });
                }
                other => warn!(role = %other, index, "Skipping stored message with unknown role"),
            }
        }

        debug!(conversation = %record.id, messages = messages.len(), "Assembled stored conversation");

        Ok(Self::new(Conversation {
            id: record.id.clone(),
            mode: record.mode,
            created_at,
            title: record.title.clone(),
            messages,
        }))
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn into_conversation(self) -> Conversation {
        self.conversation
    }

    /// The turn currently streaming in, if any
    pub fn open_turn(&self) -> Option<&TurnState> {
        self.open.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.open.is_some()
    }

    /// Append the user message and an empty assistant placeholder
    ///
    /// Only one turn may be open at a time.
    pub fn begin_turn(
        &mut self,
        content: &str,
        execution_mode: ExecutionMode,
    ) -> Result<Topology, TurnError> {
        if self.open.is_some() {
            warn!(conversation = %self.conversation.id, "Rejecting submission while a turn is open");
            return Err(TurnError::Busy);
        }

        let topology = Topology::new(self.conversation.mode, execution_mode);
        let state = TurnState::new(topology);

        self.rollback.clear();
        self.conversation.messages.push(Message::user(content));
        self.conversation.messages.push(Message::assistant(state.turn.clone()));
        self.open = Some(state);

        debug!(conversation = %self.conversation.id, ?topology, "Opened turn");
        Ok(topology)
    }

    /// Reduce one live event into the open turn and notify the observer
    pub fn apply(&mut self, event: &StreamEvent, observer: &mut dyn TurnObserver) -> Applied {
        if let StreamEvent::TitleComplete(title) = event {
            info!(conversation = %self.conversation.id, title = %title, "Conversation titled");
            self.conversation.title = title.clone();
            observer.on_title(title);
            return Applied::Accepted;
        }

        let Some(state) = self.open.as_mut() else {
            warn!(event = ?event, "Event received with no open turn");
            return Applied::Ignored;
        };

        let before = state.progress();
        let applied = state.apply(event);
        if applied == Applied::Ignored {
            return applied;
        }

        if let Some(Message::Assistant { turn, .. }) = self.conversation.messages.last_mut() {
            *turn = state.turn.clone();
        }
        observer.on_turn_update(&state.turn);

        let after = state.progress();
        if after != before {
            observer.on_progress(after);
        }

        applied
    }

    /// Close the open turn, keeping whatever it holds
    pub fn finalize(&mut self) -> Result<AssistantTurn, TurnError> {
        let state = self.open.take().ok_or(TurnError::NoOpenTurn)?;
        if !state.turn.is_complete() {
            warn!(phase = %state.machine, "Finalizing a turn with missing stages");
        }
        info!(conversation = %self.conversation.id, "Turn complete");
        Ok(state.turn)
    }

    /// Discard the open turn's placeholder and surface the error
    ///
    /// With no turn open the transcript is left alone and only the error is
    /// recorded.
    pub fn fail(&mut self, error: TurnError) {
        if self.open.take().is_none() {
            warn!(conversation = %self.conversation.id, "Failing with no open turn");
            self.rollback.record(error);
            return;
        }
        self.rollback.roll_back(&mut self.conversation, error);
    }

    /// Conversation-level error from the last failed submission
    pub fn error(&self) -> Option<&TurnError> {
        self.rollback.error()
    }

    pub fn clear_error(&mut self) -> Option<TurnError> {
        self.rollback.clear()
    }

    /// Failed submissions rolled back so far
    pub fn rollbacks(&self) -> usize {
        self.rollback.rollbacks()
    }
}

/// Decode a stored assistant message in the shape its mode produces
///
/// Absent and `null` fields default to the empty live state.
pub fn decode_turn(mode: Mode, stored: Value) -> Result<AssistantTurn> {
    let turn = match mode {
        Mode::Council => AssistantTurn::Council(
            serde_json::from_value::<CouncilTurn>(stored).context("Invalid council turn")?,
        ),
        Mode::Dxo => {
            AssistantTurn::Dxo(serde_json::from_value::<DxoTurn>(stored).context("Invalid DxO turn")?)
        }
        Mode::SuperChat => AssistantTurn::SuperChat(
            serde_json::from_value::<SuperChatTurn>(stored).context("Invalid Super Chat turn")?,
        ),
    };
    Ok(turn)
}
