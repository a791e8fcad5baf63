//! Folding decoded stream events into an assistant turn.
//!
//! [`reduce`] is pure: it takes the current state and one event and returns
//! the next state. The state machine decides whether an event's payload is
//! merged; the reducer only writes the field that event owns, so applying
//! the same event twice yields the same turn.

use tracing::{debug, warn};

use crate::domain::{
    AssistantTurn, Branch, CouncilEvent, CouncilTurn, DxoEvent, DxoTurn, StreamEvent,
    SuperChatTurn, Topology,
};

use super::machine::{PipelineStateMachine, Signal, Verdict};

/// What reducing one event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Legal transition; payload merged
    Accepted,

    /// Out of order; payload merged anyway
    Tolerated,

    /// No effect on the turn
    Ignored,
}

/// A turn under construction together with its state machine
#[derive(Debug, Clone, PartialEq)]
pub struct TurnState {
    topology: Topology,
    pub turn: AssistantTurn,
    pub machine: PipelineStateMachine,
}

impl TurnState {
    /// Empty turn for a topology
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            turn: topology.mode().empty_turn(topology.execution_mode()),
            machine: PipelineStateMachine::for_topology(topology),
        }
    }

    /// Reconstruct turn state from a sequence of events
    pub fn from_events(topology: Topology, events: &[StreamEvent]) -> Self {
        events.iter().fold(Self::new(topology), |state, event| reduce(state, event).0)
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Apply a single event in place
    pub fn apply(&mut self, event: &StreamEvent) -> Applied {
        let Some(signal) = signal_for(event) else {
            match event {
                StreamEvent::Unknown(name) => debug!(event = %name, "Ignoring unknown event"),
                other => debug!(event = ?other, "Event does not affect the turn"),
            }
            return Applied::Ignored;
        };

        let verdict = self.machine.step(signal);
        match &verdict {
            Verdict::Accepted => {}
            Verdict::Tolerated(reason) => {
                warn!(reason = %reason, phase = %self.machine, "Merging out-of-order event")
            }
            Verdict::Ignored(reason) => {
                warn!(reason = %reason, phase = %self.machine, "Ignoring event");
                return Applied::Ignored;
            }
        }

        if !merge(&mut self.turn, event) {
            warn!(event = ?signal, "Event payload does not fit this turn");
        }

        match verdict {
            Verdict::Tolerated(_) => Applied::Tolerated,
            _ => Applied::Accepted,
        }
    }

    /// Observer-facing progress indicator
    pub fn progress(&self) -> u8 {
        self.machine.progress()
    }
}

/// Pure reduction step
pub fn reduce(mut state: TurnState, event: &StreamEvent) -> (TurnState, Applied) {
    let applied = state.apply(event);
    (state, applied)
}

fn signal_for(event: &StreamEvent) -> Option<Signal> {
    let signal = match event {
        StreamEvent::Council(e) => stage_signal(Branch::Council, e.stage(), e.is_start()),
        StreamEvent::Dxo(e) => stage_signal(Branch::Dxo, e.stage(), e.is_start()),
        StreamEvent::BranchStart(branch) => Signal::BranchStart(*branch),
        StreamEvent::AggregationStart => Signal::AggregationStart,
        StreamEvent::AggregationComplete(_) => Signal::AggregationFinish,
        StreamEvent::Complete => Signal::Complete,
        StreamEvent::Error(_) => Signal::Fail,
        StreamEvent::TitleComplete(_) | StreamEvent::Unknown(_) => return None,
    };
    Some(signal)
}

fn stage_signal(branch: Branch, stage: u8, is_start: bool) -> Signal {
    if is_start {
        Signal::StageStart { branch, stage }
    } else {
        Signal::StageFinish { branch, stage }
    }
}

fn council_slot(turn: &mut AssistantTurn) -> Option<&mut CouncilTurn> {
    match turn {
        AssistantTurn::Council(council) => Some(council),
        AssistantTurn::SuperChat(chat) => Some(&mut chat.council),
        AssistantTurn::Dxo(_) => None,
    }
}

fn dxo_slot(turn: &mut AssistantTurn) -> Option<&mut DxoTurn> {
    match turn {
        AssistantTurn::Dxo(dxo) => Some(dxo),
        AssistantTurn::SuperChat(chat) => Some(&mut chat.dxo),
        AssistantTurn::Council(_) => None,
    }
}

fn superchat_slot(turn: &mut AssistantTurn) -> Option<&mut SuperChatTurn> {
    match turn {
        AssistantTurn::SuperChat(chat) => Some(chat),
        _ => None,
    }
}

/// Write the event's payload into the field it owns
///
/// Returns false when the turn has no such field.
fn merge(turn: &mut AssistantTurn, event: &StreamEvent) -> bool {
    match event {
        StreamEvent::Council(event) => {
            let Some(council) = council_slot(turn) else {
                return false;
            };
            match event {
                CouncilEvent::Stage1Complete(results) => council.stage1 = Some(results.clone()),
                CouncilEvent::Stage2Complete { rankings, metadata } => {
                    council.stage2 = Some(rankings.clone());
                    if let Some(aggregate) = &metadata.aggregate_rankings {
                        council.aggregate_rankings = Some(aggregate.clone());
                    }
                    if let Some(labels) = &metadata.label_to_model {
                        council.label_to_model = Some(labels.clone());
                    }
                }
                CouncilEvent::Stage3Complete(result) => council.stage3 = Some(result.clone()),
                CouncilEvent::Stage1Start | CouncilEvent::Stage2Start | CouncilEvent::Stage3Start => {}
            }
            true
        }
        StreamEvent::Dxo(event) => {
            let Some(dxo) = dxo_slot(turn) else {
                return false;
            };
            if let DxoEvent::Complete(stage, result) = event {
                match dxo.stage_mut(*stage) {
                    Some(slot) => *slot = Some(result.clone()),
                    None => return false,
                }
            }
            true
        }
        StreamEvent::AggregationComplete(result) => match superchat_slot(turn) {
            Some(chat) => {
                chat.super_aggregator = Some(result.clone());
                true
            }
            None => false,
        },
        _ => true,
    }
}
