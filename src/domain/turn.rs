//! Assistant turn shapes for each pipeline topology.
//!
//! The same types are produced by live reduction of stream events and by
//! loading a persisted record, so field names follow the backend's storage
//! format. camelCase aliases are accepted on input for records written by
//! older clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// A single model's answer (Council stage 1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model: String,
    pub response: String,
}

/// A peer ranking produced by one council member (Council stage 2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingResult {
    pub model: String,
    pub ranking: String,

    /// Labels in ranked order, as extracted by the backend
    #[serde(default, alias = "parsedRanking")]
    pub parsed_ranking: Vec<String>,
}

/// Average position of one model across all peer rankings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRankingEntry {
    pub model: String,

    #[serde(alias = "averageRank")]
    pub average_rank: f64,

    #[serde(alias = "rankingsCount")]
    pub rankings_count: u32,
}

/// Output of a single synthesizing agent (chairman, DxO agent, super aggregator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub model: String,
    pub response: String,
}

/// The chairman synthesizes the council's final answer
pub type ChairmanResult = AgentResult;

/// How the two SuperChat branches are composed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Council first, then DxO
    #[default]
    Sequential,

    /// Council and DxO side by side, then the super aggregator
    Parallel,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

/// Three-stage council deliberation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CouncilTurn {
    /// Individual responses
    #[serde(default)]
    pub stage1: Option<Vec<ModelResult>>,

    /// Peer rankings
    #[serde(default)]
    pub stage2: Option<Vec<RankingResult>>,

    #[serde(default, alias = "aggregateRankings", skip_serializing_if = "Option::is_none")]
    pub aggregate_rankings: Option<Vec<AggregateRankingEntry>>,

    /// Anonymized label ("Response A") to model id
    #[serde(default, alias = "labelToModel", skip_serializing_if = "Option::is_none")]
    pub label_to_model: Option<BTreeMap<String, String>>,

    /// Chairman synthesis
    #[serde(default)]
    pub stage3: Option<ChairmanResult>,
}

impl CouncilTurn {
    pub fn is_complete(&self) -> bool {
        self.stage1.is_some() && self.stage2.is_some() && self.stage3.is_some()
    }
}

/// Four-stage DxO deliberation: lead research, critic, domain expert, aggregator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DxoTurn {
    #[serde(default)]
    pub stage1: Option<AgentResult>,
    #[serde(default)]
    pub stage2: Option<AgentResult>,
    #[serde(default)]
    pub stage3: Option<AgentResult>,
    #[serde(default)]
    pub stage4: Option<AgentResult>,
}

impl DxoTurn {
    /// Mutable slot for a 1-based stage number
    pub fn stage_mut(&mut self, stage: u8) -> Option<&mut Option<AgentResult>> {
        match stage {
            1 => Some(&mut self.stage1),
            2 => Some(&mut self.stage2),
            3 => Some(&mut self.stage3),
            4 => Some(&mut self.stage4),
            _ => None,
        }
    }

    pub fn stage(&self, stage: u8) -> Option<&AgentResult> {
        match stage {
            1 => self.stage1.as_ref(),
            2 => self.stage2.as_ref(),
            3 => self.stage3.as_ref(),
            4 => self.stage4.as_ref(),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        (1..=4).all(|stage| self.stage(stage).is_some())
    }
}

/// Council and DxO composed, with an optional super aggregator (parallel only)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuperChatTurn {
    #[serde(default, deserialize_with = "null_as_default")]
    pub execution_mode: ExecutionMode,

    #[serde(default, deserialize_with = "null_as_default")]
    pub council: CouncilTurn,

    #[serde(default, deserialize_with = "null_as_default")]
    pub dxo: DxoTurn,

    #[serde(default, alias = "superAggregator")]
    pub super_aggregator: Option<AgentResult>,
}

impl SuperChatTurn {
    pub fn new(execution_mode: ExecutionMode) -> Self {
        Self {
            execution_mode,
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        let branches = self.council.is_complete() && self.dxo.is_complete();
        match self.execution_mode {
            ExecutionMode::Sequential => branches,
            ExecutionMode::Parallel => branches && self.super_aggregator.is_some(),
        }
    }
}

/// The assistant half of a turn, shaped by the conversation's mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AssistantTurn {
    Council(CouncilTurn),
    Dxo(DxoTurn),
    SuperChat(SuperChatTurn),
}

impl AssistantTurn {
    /// The answer a reader should see first, if the pipeline produced one
    pub fn final_answer(&self) -> Option<&AgentResult> {
        match self {
            Self::Council(council) => council.stage3.as_ref(),
            Self::Dxo(dxo) => dxo.stage4.as_ref(),
            Self::SuperChat(chat) => chat
                .super_aggregator
                .as_ref()
                .or(chat.dxo.stage4.as_ref())
                .or(chat.council.stage3.as_ref()),
        }
    }

    /// Whether every stage the topology requires is populated
    pub fn is_complete(&self) -> bool {
        match self {
            Self::Council(council) => council.is_complete(),
            Self::Dxo(dxo) => dxo.is_complete(),
            Self::SuperChat(chat) => chat.is_complete(),
        }
    }
}

/// Treat an explicit `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_council_record_accepts_both_spellings() {
        let snake: CouncilTurn = serde_json::from_value(json!({
            "stage1": [{"model": "m1", "response": "r1"}],
            "aggregate_rankings": [{"model": "m1", "average_rank": 1.0, "rankings_count": 2}],
            "label_to_model": {"Response A": "m1"}
        }))
        .unwrap();
        let camel: CouncilTurn = serde_json::from_value(json!({
            "stage1": [{"model": "m1", "response": "r1"}],
            "aggregateRankings": [{"model": "m1", "averageRank": 1.0, "rankingsCount": 2}],
            "labelToModel": {"Response A": "m1"}
        }))
        .unwrap();

        assert_eq!(snake, camel);
        assert!(snake.stage2.is_none());
        assert!(snake.stage3.is_none());
    }

    #[test]
    fn test_superchat_null_branches_default() {
        let turn: SuperChatTurn = serde_json::from_value(json!({
            "execution_mode": "parallel",
            "council": null,
            "dxo": null,
            "super_aggregator": null
        }))
        .unwrap();

        assert_eq!(turn, SuperChatTurn::new(ExecutionMode::Parallel));
    }

    #[test]
    fn test_superchat_missing_mode_is_sequential() {
        let turn: SuperChatTurn = serde_json::from_value(json!({})).unwrap();
        assert_eq!(turn.execution_mode, ExecutionMode::Sequential);
    }

    #[test]
    fn test_final_answer_prefers_super_aggregator() {
        let mut chat = SuperChatTurn::new(ExecutionMode::Parallel);
        chat.council.stage3 = Some(AgentResult {
            model: "chair".to_string(),
            response: "council".to_string(),
        });
        let turn = AssistantTurn::SuperChat(chat.clone());
        assert_eq!(turn.final_answer().unwrap().response, "council");

        chat.super_aggregator = Some(AgentResult {
            model: "agg".to_string(),
            response: "merged".to_string(),
        });
        let turn = AssistantTurn::SuperChat(chat);
        assert_eq!(turn.final_answer().unwrap().response, "merged");
    }

    #[test]
    fn test_execution_mode_parse() {
        assert_eq!("Parallel".parse::<ExecutionMode>(), Ok(ExecutionMode::Parallel));
        assert!("both".parse::<ExecutionMode>().is_err());
    }
}
