//! Stream event types.
//!
//! The backend sends loosely shaped JSON records keyed by `type`. They are
//! framed into [`RawEvent`]s and then decoded into a [`StreamEvent`] for the
//! turn's topology: the same name (`stage1_complete`) carries a list of
//! responses in Council mode and a single agent result in DxO mode, and
//! SuperChat addresses each branch through a `council_`/`dxo_` prefix.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::conversation::Mode;
use super::turn::{
    AgentResult, AggregateRankingEntry, ChairmanResult, ExecutionMode, ModelResult,
    RankingResult,
};

/// Text surfaced when an `error` event carries no message
pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

/// One framed record, before topology-aware decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event name, lower snake case (`stage1_start`, `dxo_stage4_complete`, ...)
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// Only present on ranking-stage completions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Only present on `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RawEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: Value::Null,
            metadata: None,
            message: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Serialize as one wire frame (`data: <json>\n\n`)
    pub fn to_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {}\n\n", json)
    }
}

/// Which reducer a turn uses; fixed when the turn is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Council,
    Dxo,
    SuperChat(ExecutionMode),
}

impl Topology {
    pub fn new(mode: Mode, execution_mode: ExecutionMode) -> Self {
        match mode {
            Mode::Council => Self::Council,
            Mode::Dxo => Self::Dxo,
            Mode::SuperChat => Self::SuperChat(execution_mode),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Council => Mode::Council,
            Self::Dxo => Mode::Dxo,
            Self::SuperChat(_) => Mode::SuperChat,
        }
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        match self {
            Self::SuperChat(execution_mode) => *execution_mode,
            _ => ExecutionMode::default(),
        }
    }
}

/// One of the two sub-pipelines inside a SuperChat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Council,
    Dxo,
}

/// Extra data attached to the ranking-stage completion
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RankingMetadata {
    #[serde(default, alias = "aggregateRankings")]
    pub aggregate_rankings: Option<Vec<AggregateRankingEntry>>,

    #[serde(default, alias = "labelToModel")]
    pub label_to_model: Option<BTreeMap<String, String>>,
}

/// Council pipeline progress
#[derive(Debug, Clone, PartialEq)]
pub enum CouncilEvent {
    Stage1Start,
    Stage1Complete(Vec<ModelResult>),
    Stage2Start,
    Stage2Complete {
        rankings: Vec<RankingResult>,
        metadata: RankingMetadata,
    },
    Stage3Start,
    Stage3Complete(ChairmanResult),
}

impl CouncilEvent {
    /// 1-based stage this event belongs to
    pub fn stage(&self) -> u8 {
        match self {
            Self::Stage1Start | Self::Stage1Complete(_) => 1,
            Self::Stage2Start | Self::Stage2Complete { .. } => 2,
            Self::Stage3Start | Self::Stage3Complete(_) => 3,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Self::Stage1Start | Self::Stage2Start | Self::Stage3Start)
    }
}

/// DxO pipeline progress; stages are 1..=4
#[derive(Debug, Clone, PartialEq)]
pub enum DxoEvent {
    Start(u8),
    Complete(u8, AgentResult),
}

impl DxoEvent {
    pub fn stage(&self) -> u8 {
        match self {
            Self::Start(stage) | Self::Complete(stage, _) => *stage,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start(_))
    }
}

/// A decoded stream event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Council(CouncilEvent),
    Dxo(DxoEvent),

    /// `council_start` / `dxo_start` (parallel SuperChat)
    BranchStart(Branch),
    AggregationStart,
    AggregationComplete(AgentResult),

    /// Conversation-level; never touches the turn
    TitleComplete(String),
    Complete,
    Error(String),

    /// A name this topology does not define
    Unknown(String),
}

/// A well-formed record whose payload does not fit its event type
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("event '{kind}' has a malformed {field}: {source}")]
    Payload {
        kind: String,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Start,
    Complete,
}

/// Split `stage3_complete` into `(3, Complete)`
fn parse_stage_name(name: &str) -> Option<(u8, Edge)> {
    let rest = name.strip_prefix("stage")?;
    let (number, edge) = rest.split_once('_')?;
    let stage: u8 = number.parse().ok()?;
    let edge = match edge {
        "start" => Edge::Start,
        "complete" => Edge::Complete,
        _ => return None,
    };
    Some((stage, edge))
}

fn payload<T: DeserializeOwned>(raw: &RawEvent) -> Result<T, DecodeError> {
    serde_json::from_value(raw.data.clone()).map_err(|source| DecodeError::Payload {
        kind: raw.kind.clone(),
        field: "data",
        source,
    })
}

fn decode_council(raw: &RawEvent, stage: u8, edge: Edge) -> Result<Option<CouncilEvent>, DecodeError> {
    let event = match (stage, edge) {
        (1, Edge::Start) => CouncilEvent::Stage1Start,
        (1, Edge::Complete) => CouncilEvent::Stage1Complete(payload(raw)?),
        (2, Edge::Start) => CouncilEvent::Stage2Start,
        (2, Edge::Complete) => {
            let metadata = match &raw.metadata {
                Some(value) if !value.is_null() => serde_json::from_value(value.clone())
                    .map_err(|source| DecodeError::Payload {
                        kind: raw.kind.clone(),
                        field: "metadata",
                        source,
                    })?,
                _ => RankingMetadata::default(),
            };
            CouncilEvent::Stage2Complete {
                rankings: payload(raw)?,
                metadata,
            }
        }
        (3, Edge::Start) => CouncilEvent::Stage3Start,
        (3, Edge::Complete) => CouncilEvent::Stage3Complete(payload(raw)?),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_dxo(raw: &RawEvent, stage: u8, edge: Edge) -> Result<Option<DxoEvent>, DecodeError> {
    if !(1..=4).contains(&stage) {
        return Ok(None);
    }
    let event = match edge {
        Edge::Start => DxoEvent::Start(stage),
        Edge::Complete => DxoEvent::Complete(stage, payload(raw)?),
    };
    Ok(Some(event))
}

impl StreamEvent {
    /// Decode a framed record for the given topology
    ///
    /// Names outside the topology's grammar decode to [`StreamEvent::Unknown`];
    /// only a payload that cannot be read is an error.
    pub fn decode(raw: &RawEvent, topology: Topology) -> Result<Self, DecodeError> {
        let name = raw.kind.as_str();
        let unknown = || StreamEvent::Unknown(raw.kind.clone());

        match name {
            "complete" => return Ok(Self::Complete),
            "error" => {
                let message = raw
                    .message
                    .clone()
                    .or_else(|| raw.data.get("message").and_then(Value::as_str).map(str::to_string))
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());
                return Ok(Self::Error(message));
            }
            "title_complete" => {
                #[derive(Deserialize)]
                struct Title {
                    title: String,
                }
                let Title { title } = payload(raw)?;
                return Ok(Self::TitleComplete(title));
            }
            _ => {}
        }

        match topology {
            Topology::Council => Ok(parse_stage_name(name)
                .map(|(stage, edge)| decode_council(raw, stage, edge))
                .transpose()?
                .flatten()
                .map(Self::Council)
                .unwrap_or_else(unknown)),
            Topology::Dxo => Ok(parse_stage_name(name)
                .map(|(stage, edge)| decode_dxo(raw, stage, edge))
                .transpose()?
                .flatten()
                .map(Self::Dxo)
                .unwrap_or_else(unknown)),
            Topology::SuperChat(_) => {
                match name {
                    "council_start" => return Ok(Self::BranchStart(Branch::Council)),
                    "dxo_start" => return Ok(Self::BranchStart(Branch::Dxo)),
                    "aggregation_start" => return Ok(Self::AggregationStart),
                    "aggregation_complete" => return Ok(Self::AggregationComplete(payload(raw)?)),
                    _ => {}
                }
                if let Some((stage, edge)) = name.strip_prefix("council_").and_then(parse_stage_name) {
                    return Ok(decode_council(raw, stage, edge)?
                        .map(Self::Council)
                        .unwrap_or_else(unknown));
                }
                if let Some((stage, edge)) = name.strip_prefix("dxo_").and_then(parse_stage_name) {
                    return Ok(decode_dxo(raw, stage, edge)?
                        .map(Self::Dxo)
                        .unwrap_or_else(unknown));
                }
                Ok(unknown())
            }
        }
    }

    /// Whether the event ends the turn (successfully or not)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }
}
