//! Undoing a failed submission.
//!
//! When a submission fails before `complete`, the assistant placeholder it
//! added is removed (the user message stays) and the error is held for the
//! presentation layer until it is cleared.

use thiserror::Error;
use tracing::{error, warn};

use crate::adapters::TransportError;
use crate::domain::Conversation;

/// Why a submission did not produce a turn
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("{}", .0.user_message())]
    Transport(TransportError),

    /// The backend reported a pipeline failure
    #[error("{0}")]
    Server(String),

    #[error("a turn is already in flight")]
    Busy,

    #[error("no turn is in flight")]
    NoOpenTurn,
}

impl From<TransportError> for TurnError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Removes placeholders and keeps the last surfaced error
#[derive(Debug, Default)]
pub struct RollbackController {
    error: Option<TurnError>,
    rollbacks: usize,
}

impl RollbackController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the last assistant placeholder and record the error
    ///
    /// Returns whether a placeholder was removed. Only the final message is
    /// considered, so completed turns earlier in the transcript are never
    /// touched.
    pub fn roll_back(&mut self, conversation: &mut Conversation, error: TurnError) -> bool {
        let removed = match conversation.messages.last() {
            Some(message) if message.is_assistant() => {
                conversation.messages.pop();
                self.rollbacks += 1;
                true
            }
            _ => {
                warn!(conversation = %conversation.id, "No assistant placeholder to roll back");
                false
            }
        };

        error!(conversation = %conversation.id, error = %error, "Rolled back failed turn");
        self.error = Some(error);
        removed
    }

    /// Surface an error without touching the transcript
    pub fn record(&mut self, error: TurnError) {
        error!(error = %error, "Turn failed");
        self.error = Some(error);
    }

    /// Error waiting to be shown, if any
    pub fn error(&self) -> Option<&TurnError> {
        self.error.as_ref()
    }

    /// Dismiss the surfaced error
    pub fn clear(&mut self) -> Option<TurnError> {
        self.error.take()
    }

    /// Placeholders removed so far
    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }
}
