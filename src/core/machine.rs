//! Per-topology pipeline state machines.
//!
//! Council, DxO and sequential SuperChat are linear: stages complete in a
//! fixed order (sequential SuperChat is the three Council stages followed by
//! the four DxO stages). Parallel SuperChat tracks the two branches
//! independently and gates the super aggregator on both reaching their
//! final stage.
//!
//! The machines only judge legality and track position; the reducer owns
//! the turn data. Out-of-order completions are tolerated (the position never
//! moves backwards), and everything after a terminal state is ignored.

use std::fmt;

use crate::domain::{Branch, ExecutionMode, Topology};

const COUNCIL_STAGES: u8 = 3;
const DXO_STAGES: u8 = 4;

/// Progress value reported while the parallel super aggregator runs
pub const AGGREGATION_PROGRESS: u8 = 8;

/// Input to a state machine, derived from a decoded stream event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    StageStart { branch: Branch, stage: u8 },
    StageFinish { branch: Branch, stage: u8 },
    BranchStart(Branch),
    AggregationStart,
    AggregationFinish,
    Complete,
    Fail,
}

/// How a machine judged a signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Legal transition
    Accepted,

    /// Out of order, merged anyway
    Tolerated(&'static str),

    /// No effect; the payload must not be applied
    Ignored(&'static str),
}

impl Verdict {
    pub fn applies(&self) -> bool {
        !matches!(self, Self::Ignored(_))
    }
}

/// Position in a linear pipeline; stage positions are 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Pending(u8),
    Done(u8),
    Complete,
    Error,
}

impl Phase {
    fn position(&self) -> u8 {
        match self {
            Self::Idle | Self::Complete | Self::Error => 0,
            Self::Pending(p) | Self::Done(p) => *p,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Which stage sequence a linear machine walks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Council,
    Dxo,
    /// Council stages 1-3 then DxO stages 1-4 (positions 4-7)
    Sequential,
}

impl Layout {
    fn len(&self) -> u8 {
        match self {
            Self::Council => COUNCIL_STAGES,
            Self::Dxo => DXO_STAGES,
            Self::Sequential => COUNCIL_STAGES + DXO_STAGES,
        }
    }

    /// Map a branch-local stage to its position, if it belongs here
    fn position(&self, branch: Branch, stage: u8) -> Option<u8> {
        let position = match (self, branch) {
            (Self::Council, Branch::Council) if stage <= COUNCIL_STAGES => stage,
            (Self::Dxo, Branch::Dxo) if stage <= DXO_STAGES => stage,
            (Self::Sequential, Branch::Council) if stage <= COUNCIL_STAGES => stage,
            (Self::Sequential, Branch::Dxo) if stage <= DXO_STAGES => COUNCIL_STAGES + stage,
            _ => return None,
        };
        (position >= 1).then_some(position)
    }

    fn stage_name(&self, position: u8) -> String {
        match self {
            Self::Council | Self::Dxo => format!("S{}", position),
            Self::Sequential if position <= COUNCIL_STAGES => format!("CouncilS{}", position),
            Self::Sequential => format!("DxoS{}", position - COUNCIL_STAGES),
        }
    }
}

/// Strictly ordered pipeline: Idle → S1Pending → S1Done → … → Complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearMachine {
    layout: Layout,
    phase: Phase,
}

impl LinearMachine {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn step(&mut self, signal: Signal) -> Verdict {
        if self.phase.is_terminal() {
            return Verdict::Ignored("turn already finished");
        }

        match signal {
            Signal::Fail => {
                self.phase = Phase::Error;
                Verdict::Accepted
            }
            Signal::Complete => {
                self.phase = Phase::Complete;
                Verdict::Accepted
            }
            Signal::StageStart { branch, stage } => {
                let Some(position) = self.layout.position(branch, stage) else {
                    return Verdict::Ignored("stage is not part of this pipeline");
                };
                let current = self.phase.position();
                let in_order = match self.phase {
                    Phase::Idle => position == 1,
                    Phase::Done(done) => position == done + 1,
                    _ => false,
                };
                if in_order {
                    self.phase = Phase::Pending(position);
                    Verdict::Accepted
                } else if position > current {
                    self.phase = Phase::Pending(position);
                    Verdict::Tolerated("stage started out of order")
                } else {
                    Verdict::Ignored("stage already started")
                }
            }
            Signal::StageFinish { branch, stage } => {
                let Some(position) = self.layout.position(branch, stage) else {
                    return Verdict::Ignored("stage is not part of this pipeline");
                };
                let current = self.phase.position();
                let verdict = if self.phase == Phase::Pending(position) {
                    Verdict::Accepted
                } else if position > current {
                    Verdict::Tolerated("stage completed out of order")
                } else {
                    Verdict::Tolerated("stage completed again")
                };
                if position >= current {
                    self.phase = if position == self.layout.len() {
                        Phase::Complete
                    } else {
                        Phase::Done(position)
                    };
                }
                verdict
            }
            Signal::BranchStart(_) | Signal::AggregationStart | Signal::AggregationFinish => {
                Verdict::Ignored("signal only applies to parallel pipelines")
            }
        }
    }

    fn progress(&self) -> u8 {
        self.phase.position()
    }
}

impl fmt::Display for LinearMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Phase::Idle => f.write_str("Idle"),
            Phase::Pending(p) => write!(f, "{}Pending", self.layout.stage_name(p)),
            Phase::Done(p) => write!(f, "{}Done", self.layout.stage_name(p)),
            Phase::Complete => f.write_str("Complete"),
            Phase::Error => f.write_str("Error"),
        }
    }
}

/// One independently progressing branch of a parallel pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchProgress {
    stages: u8,
    started: bool,
    /// Highest stage completed so far
    done: u8,
}

impl BranchProgress {
    fn new(stages: u8) -> Self {
        Self {
            stages,
            started: false,
            done: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.done == self.stages
    }
}

/// Parallel SuperChat: Council ∥ DxO → super aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelMachine {
    council: BranchProgress,
    dxo: BranchProgress,
    aggregating: bool,
    terminal: Option<Phase>,
}

impl ParallelMachine {
    pub fn new() -> Self {
        Self {
            council: BranchProgress::new(COUNCIL_STAGES),
            dxo: BranchProgress::new(DXO_STAGES),
            aggregating: false,
            terminal: None,
        }
    }

    pub fn branch(&self, branch: Branch) -> &BranchProgress {
        match branch {
            Branch::Council => &self.council,
            Branch::Dxo => &self.dxo,
        }
    }

    fn branch_mut(&mut self, branch: Branch) -> &mut BranchProgress {
        match branch {
            Branch::Council => &mut self.council,
            Branch::Dxo => &mut self.dxo,
        }
    }

    /// Both branches reached their final stage
    pub fn branches_finished(&self) -> bool {
        self.council.is_finished() && self.dxo.is_finished()
    }

    fn step(&mut self, signal: Signal) -> Verdict {
        if self.terminal.is_some() {
            return Verdict::Ignored("turn already finished");
        }

        match signal {
            Signal::Fail => {
                self.terminal = Some(Phase::Error);
                Verdict::Accepted
            }
            Signal::Complete => {
                self.terminal = Some(Phase::Complete);
                Verdict::Accepted
            }
            Signal::BranchStart(branch) => {
                let progress = self.branch_mut(branch);
                if progress.started {
                    Verdict::Ignored("branch already started")
                } else {
                    progress.started = true;
                    Verdict::Accepted
                }
            }
            Signal::StageStart { branch, stage } => {
                let progress = self.branch_mut(branch);
                if stage == 0 || stage > progress.stages {
                    return Verdict::Ignored("stage is not part of this branch");
                }
                progress.started = true;
                if stage == progress.done + 1 {
                    Verdict::Accepted
                } else {
                    Verdict::Tolerated("branch stage started out of order")
                }
            }
            Signal::StageFinish { branch, stage } => {
                let progress = self.branch_mut(branch);
                if stage == 0 || stage > progress.stages {
                    return Verdict::Ignored("stage is not part of this branch");
                }
                progress.started = true;
                let verdict = if stage == progress.done + 1 {
                    Verdict::Accepted
                } else if stage > progress.done {
                    Verdict::Tolerated("branch stage completed out of order")
                } else {
                    Verdict::Tolerated("branch stage completed again")
                };
                progress.done = progress.done.max(stage);
                verdict
            }
            Signal::AggregationStart => {
                if !self.branches_finished() {
                    Verdict::Ignored("aggregation started before both branches finished")
                } else if self.aggregating {
                    Verdict::Ignored("aggregation already started")
                } else {
                    self.aggregating = true;
                    Verdict::Accepted
                }
            }
            Signal::AggregationFinish => {
                if !self.branches_finished() {
                    return Verdict::Ignored("aggregation completed before both branches finished");
                }
                let verdict = if self.aggregating {
                    Verdict::Accepted
                } else {
                    Verdict::Tolerated("aggregation completed without a start")
                };
                self.aggregating = true;
                self.terminal = Some(Phase::Complete);
                verdict
            }
        }
    }

    fn progress(&self) -> u8 {
        if self.terminal.is_some() {
            0
        } else if self.aggregating {
            AGGREGATION_PROGRESS
        } else if self.council.started || self.dxo.started {
            1
        } else {
            0
        }
    }
}

impl Default for ParallelMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParallelMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.terminal {
            Some(Phase::Error) => f.write_str("Error"),
            Some(_) => f.write_str("Complete"),
            None if self.aggregating => f.write_str("Aggregating"),
            None => write!(
                f,
                "Branches(council {}/{}, dxo {}/{})",
                self.council.done, self.council.stages, self.dxo.done, self.dxo.stages
            ),
        }
    }
}

/// The state machine a turn uses, chosen once from its topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStateMachine {
    Linear(LinearMachine),
    Parallel(ParallelMachine),
}

impl PipelineStateMachine {
    pub fn for_topology(topology: Topology) -> Self {
        match topology {
            Topology::Council => Self::Linear(LinearMachine::new(Layout::Council)),
            Topology::Dxo => Self::Linear(LinearMachine::new(Layout::Dxo)),
            Topology::SuperChat(ExecutionMode::Sequential) => {
                Self::Linear(LinearMachine::new(Layout::Sequential))
            }
            Topology::SuperChat(ExecutionMode::Parallel) => Self::Parallel(ParallelMachine::new()),
        }
    }

    /// Judge a signal and advance
    pub fn step(&mut self, signal: Signal) -> Verdict {
        match self {
            Self::Linear(machine) => machine.step(signal),
            Self::Parallel(machine) => machine.step(signal),
        }
    }

    /// Observer-facing progress indicator
    ///
    /// 0 when idle or finished; the current stage position for linear
    /// pipelines (sequential SuperChat: 1-3 Council, 4-7 DxO); 1 while
    /// parallel branches run and 8 during aggregation.
    pub fn progress(&self) -> u8 {
        match self {
            Self::Linear(machine) => machine.progress(),
            Self::Parallel(machine) => machine.progress(),
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            Self::Linear(machine) => machine.phase == Phase::Complete,
            Self::Parallel(machine) => machine.terminal == Some(Phase::Complete),
        }
    }

    pub fn is_failed(&self) -> bool {
        match self {
            Self::Linear(machine) => machine.phase == Phase::Error,
            Self::Parallel(machine) => machine.terminal == Some(Phase::Error),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_complete() || self.is_failed()
    }
}

impl fmt::Display for PipelineStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear(machine) => machine.fmt(f),
            Self::Parallel(machine) => machine.fmt(f),
        }
    }
}
