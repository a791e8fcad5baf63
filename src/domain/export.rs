//! Plain-text transcript export.

use super::conversation::{Conversation, Message};
use super::turn::{AgentResult, AssistantTurn, CouncilTurn, DxoTurn};

const DXO_SECTIONS: [&str; 4] = [
    "Stage 1: Lead Research",
    "Stage 2: Critic Analysis",
    "Stage 3: Domain Expert",
    "Stage 4: Final Synthesized Answer (Aggregator)",
];

/// Render a conversation as the downloadable text transcript
pub fn render_transcript(conversation: &Conversation) -> String {
    let mut lines: Vec<String> = Vec::new();
    let banner = "=".repeat(80);

    lines.push(banner.clone());
    lines.push(format!("Conversation: {}", conversation.title));
    lines.push(format!("Mode: {}", conversation.mode));
    lines.push(format!("Created: {}", conversation.created_at.to_rfc3339()));
    lines.push(banner);
    lines.push(String::new());

    for message in &conversation.messages {
        match message {
            Message::User { content, .. } => {
                lines.push("\n[USER]".to_string());
                lines.push(content.clone());
                lines.push(String::new());
            }
            Message::Assistant { turn, .. } => {
                lines.push("\n[ASSISTANT]".to_string());
                match turn {
                    AssistantTurn::Council(council) => push_council(&mut lines, council),
                    AssistantTurn::Dxo(dxo) => push_dxo(&mut lines, dxo, &DXO_SECTIONS),
                    AssistantTurn::SuperChat(chat) => {
                        lines.push(format!("Execution mode: {}", chat.execution_mode));
                        push_council(&mut lines, &chat.council);
                        push_dxo(&mut lines, &chat.dxo, &DXO_SECTIONS);
                        if let Some(result) = &chat.super_aggregator {
                            push_agent(&mut lines, "Super Aggregator", result);
                        }
                    }
                }
                lines.push("-".repeat(80));
            }
        }
    }

    lines.join("\n")
}

fn push_agent(lines: &mut Vec<String>, heading: &str, result: &AgentResult) {
    lines.push(format!("\n--- {} ---", heading));
    lines.push(format!("Model: {}", result.model));
    lines.push(String::new());
    lines.push(result.response.clone());
    lines.push(String::new());
}

fn push_council(lines: &mut Vec<String>, council: &CouncilTurn) {
    if let Some(responses) = &council.stage1 {
        lines.push("\n--- Stage 1: Individual Responses ---".to_string());
        for (idx, response) in responses.iter().enumerate() {
            lines.push(format!("\n{}. {}:", idx + 1, response.model));
            lines.push(response.response.clone());
        }
        lines.push(String::new());
    }

    if let Some(rankings) = &council.aggregate_rankings {
        lines.push("\n--- Aggregate Rankings ---".to_string());
        for (idx, entry) in rankings.iter().enumerate() {
            lines.push(format!(
                "{}. {}: Average Rank {:.2} (from {} rankings)",
                idx + 1,
                entry.model,
                entry.average_rank,
                entry.rankings_count
            ));
        }
        lines.push(String::new());
    }

    if let Some(rankings) = &council.stage2 {
        lines.push("\n--- Stage 2: Peer Rankings ---".to_string());
        for ranking in rankings {
            lines.push(format!("\n{}:", ranking.model));
            lines.push(ranking.ranking.clone());
        }
        lines.push(String::new());
    }

    if let Some(result) = &council.stage3 {
        push_agent(lines, "Stage 3: Final Synthesized Answer", result);
    }
}

fn push_dxo(lines: &mut Vec<String>, dxo: &DxoTurn, headings: &[&str; 4]) {
    for (stage, heading) in (1u8..=4).zip(headings.iter()) {
        if let Some(result) = dxo.stage(stage) {
            push_agent(lines, heading, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conversation::Mode;
    use crate::domain::turn::{AggregateRankingEntry, ModelResult};

    #[test]
    fn test_council_transcript_sections() {
        let mut conversation = Conversation::new("c1", Mode::Council);
        conversation.title = "Web Frameworks".to_string();
        conversation.messages.push(Message::user("Which framework?"));
        conversation.messages.push(Message::assistant(AssistantTurn::Council(CouncilTurn {
            stage1: Some(vec![ModelResult {
                model: "m1".to_string(),
                response: "axum".to_string(),
            }]),
            aggregate_rankings: Some(vec![AggregateRankingEntry {
                model: "m1".to_string(),
                average_rank: 1.5,
                rankings_count: 2,
            }]),
            stage3: Some(AgentResult {
                model: "chair".to_string(),
                response: "Use axum".to_string(),
            }),
            ..Default::default()
        })));

        let text = render_transcript(&conversation);
        assert!(text.contains("Conversation: Web Frameworks"));
        assert!(text.contains("Mode: Council"));
        assert!(text.contains("[USER]\nWhich framework?"));
        assert!(text.contains("1. m1: Average Rank 1.50 (from 2 rankings)"));
        assert!(text.contains("--- Stage 3: Final Synthesized Answer ---\nModel: chair"));
        assert!(!text.contains("Stage 2: Peer Rankings"));
        assert!(text.ends_with(&"-".repeat(80)));
    }

    #[test]
    fn test_dxo_transcript_skips_missing_stages() {
        let mut conversation = Conversation::new("c2", Mode::Dxo);
        conversation.messages.push(Message::assistant(AssistantTurn::Dxo(DxoTurn {
            stage2: Some(AgentResult {
                model: "critic".to_string(),
                response: "weak sources".to_string(),
            }),
            ..Default::default()
        })));

        let text = render_transcript(&conversation);
        assert!(text.contains("Stage 2: Critic Analysis"));
        assert!(!text.contains("Stage 1: Lead Research"));
    }
}
