//! One chat turn: assemble → generate → log.
//!
//! `persona prompt` stops after assembly and prints the rendered user turn;
//! `persona ask` sends it to the generator along with the system prompt and
//! any prior history, then records the exchange in the session transcript.

use anyhow::{Context, Result};
use std::path::Path;
use thiserror::Error;

use persona_harness_core::assemble::{AssembleError, ContextAssembler};
use persona_harness_core::models::PersonaLabels;
use persona_harness_core::prompt::{default_system_prompt, PromptRequest};

use crate::config::Config;
use crate::db;
use crate::generation::{AnthropicGenerator, ChatTurn, GenerationError, Generator};
use crate::sqlite_store::SqliteRetrieval;
use crate::tasks::JsonTaskStore;
use crate::transcript::TranscriptLog;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("failed to record transcript: {0:#}")]
    Transcript(anyhow::Error),
}

/// The generator's reply, plus the task it was asked to assign (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    pub active_task_id: Option<i64>,
}

/// Where to log a turn, and how to label the user side.
pub struct SessionLog<'a> {
    pub log: &'a TranscriptLog,
    pub session_id: &'a str,
    pub display_label: Option<&'a str>,
}

/// Run a full turn against the given collaborators.
#[allow(clippy::too_many_arguments)]
pub async fn respond(
    assembler: &ContextAssembler<'_>,
    generator: &dyn Generator,
    labels: &PersonaLabels,
    system_prompt: &str,
    history: &[ChatTurn],
    query: &str,
    special: Option<&str>,
    session: Option<SessionLog<'_>>,
) -> Result<ChatReply, ChatError> {
    let request = assembler.assemble(query, special).await?;
    let user_turn = request.render(labels);

    let reply = generator.generate(system_prompt, history, &user_turn).await?;

    if let Some(session) = session {
        session
            .log
            .append_exchange(session.session_id, query, &reply, session.display_label)
            .map_err(ChatError::Transcript)?;
    }

    Ok(ChatReply {
        reply,
        active_task_id: request.selected_task_id(),
    })
}

pub fn system_prompt(config: &Config) -> String {
    config
        .persona
        .system_prompt
        .clone()
        .unwrap_or_else(|| default_system_prompt(&config.persona.labels()))
}

/// Assemble with the configured SQLite corpus and JSON task store.
async fn assemble_from_config(
    config: &Config,
    query: &str,
    special: Option<&str>,
) -> Result<PromptRequest> {
    let pool = db::connect(config).await?;
    let retrieval = SqliteRetrieval::new(pool.clone(), config);
    let tasks = JsonTaskStore::new(&config.tasks.path);
    let prompts = config.special_prompt_set()?;
    let assembler =
        ContextAssembler::new(&retrieval, &tasks, &prompts).with_top_k(config.retrieval.top_k);

    let request = assembler.assemble(query, special).await;
    pool.close().await;
    Ok(request?)
}

pub async fn run_prompt(config: &Config, query: &str, special: Option<&str>) -> Result<()> {
    let request = assemble_from_config(config, query, special).await?;

    println!("{}", request.render(&config.persona.labels()));
    if let Some(id) = request.selected_task_id() {
        println!();
        println!("active task: {}", id);
    }
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    query: &str,
    special: Option<&str>,
    history_path: Option<&Path>,
    session_id: Option<&str>,
    display_label: Option<&str>,
) -> Result<()> {
    let history = match history_path {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };

    let generator = AnthropicGenerator::from_env(&config.generation)?;
    let pool = db::connect(config).await?;
    let retrieval = SqliteRetrieval::new(pool.clone(), config);
    let tasks = JsonTaskStore::new(&config.tasks.path);
    let prompts = config.special_prompt_set()?;
    let assembler =
        ContextAssembler::new(&retrieval, &tasks, &prompts).with_top_k(config.retrieval.top_k);
    let log = TranscriptLog::new(&config.transcripts.dir);
    let session = session_id.map(|session_id| SessionLog {
        log: &log,
        session_id,
        display_label,
    });

    let result = respond(
        &assembler,
        &generator,
        &config.persona.labels(),
        &system_prompt(config),
        &history,
        query,
        special,
        session,
    )
    .await;
    pool.close().await;
    let reply = result?;

    println!("{}", reply.reply);
    if let Some(id) = reply.active_task_id {
        println!();
        println!("active task: {}", id);
    }
    Ok(())
}

/// Prior turns as a JSON array of `{"role", "content"}` objects.
pub fn load_history(path: &Path) -> Result<Vec<ChatTurn>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse history file: {}", path.display()))
}
