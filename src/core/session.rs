//! Driving one submission from request to finished turn.
//!
//! transport bytes → framer → decoder → reducer → assembler, with rollback
//! whenever the submission fails before `complete`.

use anyhow::Result;
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{MessageRequest, Transport, TransportError};
use crate::domain::{
    AssistantTurn, Conversation, ConversationRecord, ExecutionMode, StreamEvent, Topology,
};
use crate::stream::frame_stream;

use super::assembler::{ConversationAssembler, TurnObserver};
use super::rollback::TurnError;

/// How a submission ended without failing
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The turn was finalized
    Completed(AssistantTurn),

    /// The stream closed before `complete`; the turn is still open
    Interrupted,
}

/// One conversation bound to a transport
pub struct ChatSession<T: Transport> {
    transport: T,
    assembler: ConversationAssembler,

    /// Used when a request does not name an execution mode
    execution_mode: ExecutionMode,
}

impl<T: Transport> ChatSession<T> {
    pub fn new(transport: T, conversation: Conversation) -> Self {
        Self {
            transport,
            assembler: ConversationAssembler::new(conversation),
            execution_mode: ExecutionMode::default(),
        }
    }

    /// Resume a stored conversation
    pub fn from_record(transport: T, record: &ConversationRecord) -> Result<Self> {
        Ok(Self {
            transport,
            assembler: ConversationAssembler::from_record(record)?,
            execution_mode: ExecutionMode::default(),
        })
    }

    pub fn with_execution_mode(mut self, execution_mode: ExecutionMode) -> Self {
        self.execution_mode = execution_mode;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        self.assembler.conversation()
    }

    pub fn assembler(&self) -> &ConversationAssembler {
        &self.assembler
    }

    /// Error from the last failed submission, until cleared
    pub fn error(&self) -> Option<&TurnError> {
        self.assembler.error()
    }

    pub fn clear_error(&mut self) -> Option<TurnError> {
        self.assembler.clear_error()
    }

    /// Send a query and stream the assistant turn into the conversation
    #[instrument(skip_all, fields(conversation = %self.assembler.conversation().id, transport = %self.transport.name()))]
    pub async fn submit(
        &mut self,
        mut request: MessageRequest,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnOutcome, TurnError> {
        let execution_mode = request.execution_mode.unwrap_or(self.execution_mode);
        let topology = self.assembler.begin_turn(&request.content, execution_mode)?;
        info!(?topology, "Submitting query");

        // The server must run the same event grammar the reducer expects
        if let Topology::SuperChat(mode) = topology {
            request.execution_mode = Some(mode);
        }

        let conversation_id = self.assembler.conversation().id.clone();
        let bytes = match self.transport.open_stream(&conversation_id, &request).await {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.abort(TurnError::Transport(e))),
        };

        let events = frame_stream(bytes);
        futures::pin_mut!(events);

        while let Some(item) = events.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => return Err(self.abort(TurnError::Transport(e))),
            };

            let event = match StreamEvent::decode(&raw, topology) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable event");
                    continue;
                }
            };

            self.assembler.apply(&event, observer);

            match event {
                StreamEvent::Complete => {
                    let turn = self.assembler.finalize()?;
                    return Ok(TurnOutcome::Completed(turn));
                }
                StreamEvent::Error(message) => {
                    return Err(self.abort(TurnError::Server(message)));
                }
                _ => {}
            }
        }

        let finished = self
            .assembler
            .open_turn()
            .is_some_and(|state| state.machine.is_complete());
        if finished {
            debug!("Stream ended after the final stage");
            let turn = self.assembler.finalize()?;
            return Ok(TurnOutcome::Completed(turn));
        }

        warn!("Stream ended before the turn completed");
        Ok(TurnOutcome::Interrupted)
    }

    /// Abandon an open turn, rolling it back
    ///
    /// Returns false when nothing was in flight.
    pub fn cancel(&mut self) -> bool {
        if !self.assembler.is_busy() {
            return false;
        }
        info!("Cancelling open turn");
        self.assembler
            .fail(TurnError::Transport(TransportError::Stream("cancelled".to_string())));
        true
    }

    fn abort(&mut self, error: TurnError) -> TurnError {
        self.assembler.fail(error.clone());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ByteStream;
    use crate::core::assembler::NoopObserver;
    use crate::domain::{Mode, RawEvent};
    use async_trait::async_trait;
    use serde_json::json;

    struct Scripted(Vec<Result<Vec<u8>, TransportError>>);

    #[async_trait]
    impl Transport for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn open_stream(
            &self,
            _conversation_id: &str,
            _request: &MessageRequest,
        ) -> Result<ByteStream, TransportError> {
            Ok(Box::pin(futures::stream::iter(self.0.clone())))
        }
    }

    /// Keeps the last request it was asked to send
    #[derive(Default)]
    struct Recording(std::sync::Mutex<Option<MessageRequest>>);

    #[async_trait]
    impl Transport for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn open_stream(
            &self,
            _conversation_id: &str,
            request: &MessageRequest,
        ) -> Result<ByteStream, TransportError> {
            *self.0.lock().unwrap() = Some(request.clone());
            Ok(Box::pin(futures::stream::iter(frames(&[RawEvent::new("complete")]))))
        }
    }

    struct Refusing;

    #[async_trait]
    impl Transport for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn open_stream(
            &self,
            _conversation_id: &str,
            _request: &MessageRequest,
        ) -> Result<ByteStream, TransportError> {
            Err(TransportError::Status {
                status: 404,
                detail: "Conversation not found".to_string(),
            })
        }
    }

    fn frames(events: &[RawEvent]) -> Vec<Result<Vec<u8>, TransportError>> {
        events.iter().map(|e| Ok(e.to_frame().into_bytes())).collect()
    }

    fn agent(stage: u8) -> RawEvent {
        RawEvent::new(format!("stage{}_complete", stage))
            .with_data(json!({"model": format!("agent{}", stage), "response": "ok"}))
    }

    #[tokio::test]
    async fn test_complete_finalizes_turn() {
        let mut script = vec![RawEvent::new("stage1_start")];
        script.extend((1..=4).map(agent));
        script.push(RawEvent::new("complete"));

        let mut session = ChatSession::new(Scripted(frames(&script)), Conversation::new("c1", Mode::Dxo));
        let outcome = session
            .submit(MessageRequest::new("q"), &mut NoopObserver)
            .await
            .unwrap();

        let TurnOutcome::Completed(turn) = outcome else {
            panic!("expected completion");
        };
        assert!(turn.is_complete());
        assert!(!session.assembler().is_busy());
        assert_eq!(session.conversation().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_refused_request_rolls_back() {
        let mut session = ChatSession::new(Refusing, Conversation::new("c1", Mode::Council));
        let err = session
            .submit(MessageRequest::new("q"), &mut NoopObserver)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Conversation not found");
        assert_eq!(session.conversation().messages.len(), 1);
        assert_eq!(session.error(), Some(&err));
    }

    #[tokio::test]
    async fn test_truncated_stream_leaves_turn_open_until_cancel() {
        let script = vec![RawEvent::new("stage1_start"), agent(1)];
        let mut session = ChatSession::new(Scripted(frames(&script)), Conversation::new("c1", Mode::Dxo));

        let outcome = session
            .submit(MessageRequest::new("q"), &mut NoopObserver)
            .await
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Interrupted);
        assert!(session.assembler().is_busy());

        let err = session
            .submit(MessageRequest::new("again"), &mut NoopObserver)
            .await
            .unwrap_err();
        assert_eq!(err, TurnError::Busy);

        assert!(session.cancel());
        assert_eq!(session.conversation().messages.len(), 1);
        assert!(!session.cancel());
    }

    #[tokio::test]
    async fn test_stream_ending_at_final_stage_finalizes() {
        let script: Vec<RawEvent> = (1..=4).map(agent).collect();
        let mut session = ChatSession::new(Scripted(frames(&script)), Conversation::new("c1", Mode::Dxo));

        let outcome = session
            .submit(MessageRequest::new("q"), &mut NoopObserver)
            .await
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_superchat_sends_the_execution_mode_it_reduces_with() {
        let mut session = ChatSession::new(Recording::default(), Conversation::new("c1", Mode::SuperChat))
            .with_execution_mode(ExecutionMode::Parallel);
        session
            .submit(MessageRequest::new("q"), &mut NoopObserver)
            .await
            .unwrap();

        let sent = session.transport.0.lock().unwrap().clone().unwrap();
        assert_eq!(sent.execution_mode, Some(ExecutionMode::Parallel));
        let AssistantTurn::SuperChat(chat) = session.conversation().last_turn().unwrap() else {
            panic!("expected a superchat turn");
        };
        assert_eq!(chat.execution_mode, ExecutionMode::Parallel);
    }

    #[tokio::test]
    async fn test_explicit_request_mode_wins_over_session_default() {
        let mut session = ChatSession::new(Recording::default(), Conversation::new("c1", Mode::SuperChat))
            .with_execution_mode(ExecutionMode::Parallel);
        let request = MessageRequest::new("q").with_execution_mode(ExecutionMode::Sequential);
        session.submit(request, &mut NoopObserver).await.unwrap();

        let sent = session.transport.0.lock().unwrap().clone().unwrap();
        assert_eq!(sent.execution_mode, Some(ExecutionMode::Sequential));
    }

    #[tokio::test]
    async fn test_council_request_is_sent_unchanged() {
        let mut session = ChatSession::new(Recording::default(), Conversation::new("c1", Mode::Council))
            .with_execution_mode(ExecutionMode::Parallel);
        session
            .submit(MessageRequest::new("q"), &mut NoopObserver)
            .await
            .unwrap();

        let sent = session.transport.0.lock().unwrap().clone().unwrap();
        assert_eq!(sent.execution_mode, None);
    }
}
