//! Command-line interface for council.
//!
//! Provides commands for creating conversations, asking questions with live
//! stage progress, and managing stored transcripts.

use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::{FileStorage, HttpClient, MessageRequest, Storage};
use crate::config::{self, ResolvedConfig};
use crate::core::{ChatSession, ConversationAssembler, TurnObserver, TurnOutcome};
use crate::domain::{render_transcript, AssistantTurn, ExecutionMode, Mode, Topology};

/// council - Streaming client for multi-model deliberation
#[derive(Parser, Debug)]
#[command(name = "council")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Backend base URL (overrides config)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Read conversations from this directory instead of the API
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new conversation
    New {
        /// Pipeline the conversation runs
        #[arg(short, long, value_enum, default_value = "council")]
        mode: ModeArg,
    },

    /// Ask a question in an existing conversation
    Ask {
        /// Conversation ID
        conversation_id: String,

        /// Question text (reads from stdin if not provided)
        query: Option<String>,

        /// Super Chat branch composition (defaults to config)
        #[arg(short = 'x', long, value_enum)]
        execution_mode: Option<ExecutionArg>,

        /// Per-agent instruction, e.g. critic="focus on costs" (repeatable)
        #[arg(short, long = "instruction", value_parser = parse_instruction)]
        instructions: Vec<(String, String)>,
    },

    /// Show a conversation transcript
    Show {
        /// Conversation ID
        conversation_id: String,

        /// Print the assembled conversation as JSON
        #[arg(long)]
        json: bool,
    },

    /// List conversations, newest first
    List {
        /// Filter by mode
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,

        /// Maximum number of conversations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete a conversation
    Delete {
        /// Conversation ID
        conversation_id: String,
    },

    /// Export a conversation as plain text
    Export {
        /// Conversation ID
        conversation_id: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Conversation mode for CLI (maps to Mode)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Three-stage council with peer ranking
    Council,

    /// Four-agent lead/critic/expert/aggregator pipeline
    Dxo,

    /// Council and DxO combined
    Superchat,
}

impl From<ModeArg> for Mode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Council => Mode::Council,
            ModeArg::Dxo => Mode::Dxo,
            ModeArg::Superchat => Mode::SuperChat,
        }
    }
}

/// Execution mode for CLI (maps to ExecutionMode)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ExecutionArg {
    Sequential,
    Parallel,
}

impl From<ExecutionArg> for ExecutionMode {
    fn from(e: ExecutionArg) -> Self {
        match e {
            ExecutionArg::Sequential => ExecutionMode::Sequential,
            ExecutionArg::Parallel => ExecutionMode::Parallel,
        }
    }
}

/// Parse `key=value`
fn parse_instruction(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing instruction name in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let mut cfg = config::config()?.clone();
        if let Some(api_url) = self.api_url {
            cfg.api_url = api_url.trim_end_matches('/').to_string();
        }
        if let Some(data_dir) = self.data_dir {
            cfg.data_dir = Some(data_dir);
        }

        match self.command {
            Commands::New { mode } => create_conversation(&cfg, mode.into()).await,
            Commands::Ask {
                conversation_id,
                query,
                execution_mode,
                instructions,
            } => {
                ask(
                    &cfg,
                    &conversation_id,
                    query,
                    execution_mode.map(Into::into),
                    instructions.into_iter().collect(),
                )
                .await
            }
            Commands::Show {
                conversation_id,
                json,
            } => show_conversation(&cfg, &conversation_id, json).await,
            Commands::List { mode, limit } => {
                list_conversations(&cfg, mode.map(Into::into), limit).await
            }
            Commands::Delete { conversation_id } => delete_conversation(&cfg, &conversation_id).await,
            Commands::Export {
                conversation_id,
                output,
            } => export_conversation(&cfg, &conversation_id, output).await,
            Commands::Config => show_config(&cfg),
        }
    }
}

/// Local files when a data directory is configured, the API otherwise
fn storage(cfg: &ResolvedConfig) -> Result<Box<dyn Storage>> {
    match &cfg.data_dir {
        Some(dir) => Ok(Box::new(FileStorage::new(dir))),
        None => Ok(Box::new(HttpClient::from_config(cfg)?)),
    }
}

/// Prints stage progress to stderr while a turn streams in
struct ProgressPrinter {
    topology: Topology,
}

impl TurnObserver for ProgressPrinter {
    fn on_turn_update(&mut self, _turn: &AssistantTurn) {}

    fn on_progress(&mut self, progress: u8) {
        if let Some(label) = progress_label(self.topology, progress) {
            eprintln!("[{}] {}", self.topology.mode(), label);
        }
    }

    fn on_title(&mut self, title: &str) {
        eprintln!("[title] {}", title);
    }
}

/// Human-readable name of a progress position
pub fn progress_label(topology: Topology, progress: u8) -> Option<&'static str> {
    const COUNCIL: [&str; 3] = [
        "Stage 1: collecting individual responses",
        "Stage 2: peer rankings",
        "Stage 3: chairman synthesis",
    ];
    const DXO: [&str; 4] = [
        "Stage 1: lead research",
        "Stage 2: critic analysis",
        "Stage 3: domain expert",
        "Stage 4: aggregator synthesis",
    ];

    let index = usize::from(progress.checked_sub(1)?);
    match topology {
        Topology::Council => COUNCIL.get(index).copied(),
        Topology::Dxo => DXO.get(index).copied(),
        Topology::SuperChat(ExecutionMode::Sequential) => {
            COUNCIL.iter().chain(DXO.iter()).nth(index).copied()
        }
        Topology::SuperChat(ExecutionMode::Parallel) => match progress {
            1 => Some("Council and DxO running in parallel"),
            8 => Some("Super aggregator synthesis"),
            _ => None,
        },
    }
}

/// Create a conversation and print its id
async fn create_conversation(cfg: &ResolvedConfig, mode: Mode) -> Result<()> {
    let record = storage(cfg)?.create(mode).await?;
    println!("{}", record.id);
    eprintln!("Created {} conversation", record.mode);
    Ok(())
}

/// Stream one question through the pipeline
async fn ask(
    cfg: &ResolvedConfig,
    conversation_id: &str,
    query: Option<String>,
    execution_mode: Option<ExecutionMode>,
    instructions: BTreeMap<String, String>,
) -> Result<()> {
    let query = match query {
        Some(query) => query,
        None if !io::stdin().is_terminal() => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
        None => anyhow::bail!("No question provided. Pass it as an argument or pipe to stdin"),
    };
    if query.trim().is_empty() {
        anyhow::bail!("Question is empty");
    }

    let record = storage(cfg)?
        .get(conversation_id)
        .await?
        .with_context(|| format!("Conversation not found: {}", conversation_id))?;

    let transport = HttpClient::from_config(cfg)?;
    let mut session =
        ChatSession::from_record(transport, &record)?.with_execution_mode(cfg.execution_mode);

    let mut request = MessageRequest::new(query.trim()).with_instructions(instructions);
    if let Some(execution_mode) = execution_mode {
        request = request.with_execution_mode(execution_mode);
    }

    let mut printer = ProgressPrinter {
        topology: Topology::new(record.mode, execution_mode.unwrap_or(cfg.execution_mode)),
    };

    match session.submit(request, &mut printer).await? {
        TurnOutcome::Completed(turn) => {
            match turn.final_answer() {
                Some(answer) => {
                    println!("{}", answer.response);
                    eprintln!("\n[answered by {}]", answer.model);
                }
                None => eprintln!("[turn completed without a final answer]"),
            }
            Ok(())
        }
        TurnOutcome::Interrupted => {
            session.cancel();
            anyhow::bail!("Stream ended before the answer was complete")
        }
    }
}

/// Print a stored conversation
async fn show_conversation(cfg: &ResolvedConfig, conversation_id: &str, json: bool) -> Result<()> {
    let record = storage(cfg)?
        .get(conversation_id)
        .await?
        .with_context(|| format!("Conversation not found: {}", conversation_id))?;

    let assembler = ConversationAssembler::from_record(&record)?;
    if json {
        let json = serde_json::to_string_pretty(assembler.conversation())
            .context("Failed to serialize conversation")?;
        println!("{}", json);
    } else {
        println!("{}", render_transcript(assembler.conversation()));
    }

    Ok(())
}

/// List conversations
async fn list_conversations(cfg: &ResolvedConfig, mode: Option<Mode>, limit: usize) -> Result<()> {
    let summaries = storage(cfg)?.list(mode).await?;

    if summaries.is_empty() {
        println!("No conversations found");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:>4}  {:<26}  TITLE",
        "ID", "MODE", "MSGS", "CREATED"
    );
    for summary in summaries.iter().take(limit) {
        println!(
            "{:<36}  {:<10}  {:>4}  {:<26}  {}",
            summary.id, summary.mode, summary.message_count, summary.created_at, summary.title
        );
    }

    if summaries.len() > limit {
        eprintln!("({} more not shown)", summaries.len() - limit);
    }

    Ok(())
}

/// Delete a conversation
async fn delete_conversation(cfg: &ResolvedConfig, conversation_id: &str) -> Result<()> {
    if !storage(cfg)?.delete(conversation_id).await? {
        anyhow::bail!("Conversation not found: {}", conversation_id);
    }
    eprintln!("Deleted {}", conversation_id);
    Ok(())
}

/// Export a conversation transcript
async fn export_conversation(
    cfg: &ResolvedConfig,
    conversation_id: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let text = storage(cfg)?.export(conversation_id).await?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, text)
                .await
                .with_context(|| format!("Failed to write export: {}", path.display()))?;
            eprintln!("Exported to {}", path.display());
        }
        None => println!("{}", text),
    }

    Ok(())
}

/// Show resolved configuration
fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("Council Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("API:");
    println!("  Base URL:        {}", cfg.api_url);
    println!("  Connect timeout: {}s", cfg.connect_timeout.as_secs());
    println!();
    println!("Storage:");
    match &cfg.data_dir {
        Some(dir) => println!("  Local data dir:  {}", dir.display()),
        None => println!("  Backend API"),
    }
    println!();
    println!("Defaults:");
    println!("  Execution mode:  {}", cfg.execution_mode);

    Ok(())
}
