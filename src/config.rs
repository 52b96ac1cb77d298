//! TOML configuration parsing and validation.
//!
//! One file drives every command. Sections mirror the pipeline stages:
//! `[source]` for extraction, `[segmentation]` and `[retrieval]` for the
//! corpus, `[persona]` and `[special_prompts.<id>]` for prompt assembly,
//! `[generation]` for the completion call.
//!
//! Validation happens once in [`load_config`]; commands can then trust the
//! values they read.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use persona_harness_core::models::PersonaLabels;
use persona_harness_core::prompt::{
    SpecialPrompt, SpecialPromptMode, SpecialPromptSet, TASK_PLACEHOLDER,
};
use persona_harness_core::retrieval::MAX_UPSERT_BATCH;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub source: SourceConfig,
    pub persona: PersonaConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub transcripts: TranscriptsConfig,
    #[serde(default)]
    pub special_prompts: BTreeMap<String, SpecialPromptConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where the message-store export lives and which conversation to read.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// SQLite file containing the `message` table. Opened read-only.
    pub path: PathBuf,
    /// Row id of the other participant in the store's handle table.
    pub handle_id: i64,
    /// Normalized messages written by `extract` and read by `index`.
    #[serde(default = "default_messages_path")]
    pub messages_path: PathBuf,
}

fn default_messages_path() -> PathBuf {
    PathBuf::from("./data/messages.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersonaConfig {
    /// Label of the persona the generator speaks as.
    pub self_label: String,
    pub other_label: String,
    /// Overrides the built-in system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl PersonaConfig {
    pub fn labels(&self) -> PersonaLabels {
        PersonaLabels::new(&self.self_label, &self.other_label)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SegmentationConfig {
    #[serde(default = "default_gap_minutes")]
    pub gap_minutes: i64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            gap_minutes: default_gap_minutes(),
        }
    }
}

fn default_gap_minutes() -> i64 {
    persona_harness_core::segment::DEFAULT_GAP_MINUTES
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// `keyword`, `semantic` or `hybrid`.
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            top_k: default_top_k(),
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

fn default_mode() -> String {
    "keyword".to_string()
}
fn default_top_k() -> usize {
    persona_harness_core::assemble::DEFAULT_TOP_K
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_upsert_batch_size() -> usize {
    MAX_UPSERT_BATCH
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the embedding API; defaults to the provider's public endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_embedding_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            max_tokens: default_max_tokens(),
            api_base: default_api_base(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_retries(),
        }
    }
}

fn default_generation_provider() -> String {
    "anthropic".to_string()
}
fn default_generation_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}
fn default_max_tokens() -> u32 {
    400
}
fn default_api_base() -> String {
    "https://api.anthropic.com/v1".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct TasksConfig {
    #[serde(default = "default_tasks_path")]
    pub path: PathBuf,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            path: default_tasks_path(),
        }
    }
}

fn default_tasks_path() -> PathBuf {
    PathBuf::from("./data/tasks.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptsConfig {
    #[serde(default = "default_transcripts_dir")]
    pub dir: PathBuf,
}

impl Default for TranscriptsConfig {
    fn default() -> Self {
        Self {
            dir: default_transcripts_dir(),
        }
    }
}

fn default_transcripts_dir() -> PathBuf {
    PathBuf::from("./data/chat_logs")
}

/// One `[special_prompts.<id>]` table.
///
/// `mode = "static"` requires `instructions`; `mode = "assign_task"`
/// requires `template` (containing `{task}`) and `all_done`.
#[derive(Debug, Deserialize, Clone)]
pub struct SpecialPromptConfig {
    pub retrieval_query: String,
    pub mode: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub all_done: Option<String>,
}

impl Config {
    /// Build the special-prompt set from the `[special_prompts]` tables.
    ///
    /// [`load_config`] has already checked each entry, so this only fails
    /// on configs constructed by hand.
    pub fn special_prompt_set(&self) -> Result<SpecialPromptSet> {
        let prompts = self
            .special_prompts
            .iter()
            .map(|(id, sp)| special_prompt(id, sp))
            .collect::<Result<Vec<_>>>()?;
        Ok(SpecialPromptSet::new(prompts))
    }
}

fn special_prompt(id: &str, sp: &SpecialPromptConfig) -> Result<SpecialPrompt> {
    let mode = match sp.mode.as_str() {
        "static" => {
            let instructions = sp.instructions.clone().with_context(|| {
                format!("special_prompts.{}: instructions required for static mode", id)
            })?;
            SpecialPromptMode::Static { instructions }
        }
        "assign_task" => {
            let template = sp.template.clone().with_context(|| {
                format!("special_prompts.{}: template required for assign_task mode", id)
            })?;
            if !template.contains(TASK_PLACEHOLDER) {
                bail!(
                    "special_prompts.{}: template must contain '{}'",
                    id,
                    TASK_PLACEHOLDER
                );
            }
            let all_done = sp.all_done.clone().with_context(|| {
                format!("special_prompts.{}: all_done required for assign_task mode", id)
            })?;
            SpecialPromptMode::AssignTask { template, all_done }
        }
        other => bail!(
            "special_prompts.{}: unknown mode '{}'. Must be static or assign_task.",
            id,
            other
        ),
    };

    Ok(SpecialPrompt {
        id: id.to_string(),
        retrieval_query: sp.retrieval_query.clone(),
        mode,
    })
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate persona. Labels are stored trimmed so that corpus lines
    // read "A: ..." whatever padding the file carried.
    config.persona.self_label = config.persona.self_label.trim().to_string();
    config.persona.other_label = config.persona.other_label.trim().to_string();
    let self_label = config.persona.self_label.as_str();
    let other_label = config.persona.other_label.as_str();
    if self_label.is_empty() || other_label.is_empty() {
        bail!("persona.self_label and persona.other_label must be non-empty");
    }
    if self_label == other_label {
        bail!("persona.self_label and persona.other_label must differ");
    }
    if self_label.contains(':') || other_label.contains(':') {
        bail!("persona labels must not contain ':'");
    }

    // Validate segmentation
    if config.segmentation.gap_minutes <= 0 {
        bail!("segmentation.gap_minutes must be > 0");
    }

    // Validate retrieval
    match config.retrieval.mode.as_str() {
        "keyword" | "semantic" | "hybrid" => {}
        other => bail!(
            "Unknown retrieval mode: '{}'. Must be keyword, semantic, or hybrid.",
            other
        ),
    }
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        bail!("retrieval.candidate_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.upsert_batch_size == 0 || config.retrieval.upsert_batch_size > MAX_UPSERT_BATCH
    {
        bail!(
            "retrieval.upsert_batch_size must be between 1 and {}",
            MAX_UPSERT_BATCH
        );
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.retrieval.mode != "keyword" && !config.embedding.is_enabled() {
        bail!(
            "retrieval.mode '{}' requires embeddings. Set [embedding] provider in config.",
            config.retrieval.mode
        );
    }

    // Validate generation
    if config.generation.provider != "anthropic" {
        bail!(
            "Unknown generation provider: '{}'. Must be anthropic.",
            config.generation.provider
        );
    }
    if config.generation.max_tokens == 0 {
        bail!("generation.max_tokens must be > 0");
    }

    // Validate special prompts
    config.special_prompt_set()?;

    Ok(config)
}
