//! council - Streaming client for multi-model deliberation pipelines
//!
//! Consumes the backend's live event stream for one query and assembles it
//! into a conversation transcript, whichever pipeline produced it.
//!
//! # Architecture
//!
//! The assistant turn is derived state:
//! - Stream events are framed, decoded per topology and folded into the turn
//! - The same turn can be replayed from events or loaded from storage
//! - A failed submission is rolled back, leaving the user message in place
//!
//! # Modules
//!
//! - `adapters`: Transport and storage collaborators (HTTP, local files)
//! - `stream`: Event framing
//! - `core`: State machines, reducer, assembler, rollback, session
//! - `domain`: Data structures (Conversation, AssistantTurn, StreamEvent)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Start a DxO conversation
//! id=$(council new --mode dxo)
//!
//! # Ask with live stage progress
//! council ask "$id" "Is nuclear cheaper than solar?"
//!
//! # Export the transcript
//! council export "$id" --output transcript.txt
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod stream;

// Re-export main types at crate root for convenience
pub use adapters::{FileStorage, HttpClient, MessageRequest, Storage, Transport, TransportError};
pub use self::core::{ChatSession, ConversationAssembler, TurnError, TurnObserver, TurnOutcome, TurnState};
pub use domain::{AssistantTurn, Conversation, ExecutionMode, Mode, RawEvent, StreamEvent, Topology};
