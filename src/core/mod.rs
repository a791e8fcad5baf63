//! Core turn-building logic.
//!
//! This module contains:
//! - Machine: per-topology pipeline state machines
//! - Reducer: pure event → turn reduction
//! - Assembler: the canonical conversation, live and historical
//! - Rollback: failure recovery
//! - Session: one submission driven end to end

pub mod assembler;
pub mod machine;
pub mod reducer;
pub mod rollback;
pub mod session;

// Re-export commonly used types
pub use assembler::{decode_turn, ConversationAssembler, NoopObserver, TurnObserver};
pub use machine::{PipelineStateMachine, Signal, Verdict};
pub use reducer::{reduce, Applied, TurnState};
pub use rollback::{RollbackController, TurnError};
pub use session::{ChatSession, TurnOutcome};
