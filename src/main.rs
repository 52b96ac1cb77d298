//! # Persona Harness CLI (`persona`)
//!
//! Builds a retrieval corpus from a message-store export and assembles
//! persona-constrained prompts from it.
//!
//! ## Usage
//!
//! ```bash
//! persona --config ./config/persona.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `persona init` | Create the corpus database and schema |
//! | `persona extract` | Read messages from the source store |
//! | `persona index` | Segment messages and index conversations |
//! | `persona search "<query>"` | Show ranked conversations |
//! | `persona prompt "<query>"` | Print the assembled prompt |
//! | `persona ask "<query>"` | Assemble, generate and print the reply |
//! | `persona tasks list` | Show the task list |
//! | `persona tasks complete <id>` | Mark a task completed |
//! | `persona stats` | Corpus summary |
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG=debug` for
//! more detail.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use persona_harness::{chat, config, extract, ingest, migrate, search, stats, tasks};

/// Persona Harness CLI.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/persona.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "persona",
    about = "Persona Harness: persona-constrained prompts from your message history",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/persona.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the corpus database schema. Safe to run repeatedly.
    Init,

    /// Extract messages from the source store into the messages file.
    ///
    /// Plain-text messages are taken verbatim; rich-text bodies are decoded.
    /// Messages with no recoverable text are counted and skipped.
    Extract,

    /// Segment extracted messages into conversations and index them.
    ///
    /// Replaces the previous corpus.
    Index {
        /// Show message and conversation counts without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search indexed conversations with the configured ranking mode.
    Search {
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the prompt that would be sent for a query.
    Prompt {
        query: String,

        /// Use this special prompt regardless of the query text.
        #[arg(long)]
        special: Option<String>,
    },

    /// Generate a reply in the persona's voice.
    Ask {
        query: String,

        /// Use this special prompt regardless of the query text.
        #[arg(long)]
        special: Option<String>,

        /// JSON file with prior turns: `[{"role": "user", "content": "..."}]`.
        #[arg(long)]
        history: Option<PathBuf>,

        /// Append the exchange to this session's transcript.
        #[arg(long)]
        session: Option<String>,

        /// Text logged in place of the query (e.g. a button label).
        #[arg(long)]
        label: Option<String>,
    },

    /// Inspect and complete tasks.
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Show corpus statistics.
    Stats,
}

#[derive(Subcommand)]
enum TaskAction {
    /// List all tasks with their status.
    List,
    /// Mark a task completed. Completing it again is harmless.
    Complete { id: i64 },
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Extract => {
            extract::run_extract(&cfg).await?;
        }
        Commands::Index { dry_run } => {
            ingest::run_index(&cfg, dry_run).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Prompt { query, special } => {
            chat::run_prompt(&cfg, &query, special.as_deref()).await?;
        }
        Commands::Ask {
            query,
            special,
            history,
            session,
            label,
        } => {
            chat::run_ask(
                &cfg,
                &query,
                special.as_deref(),
                history.as_deref(),
                session.as_deref(),
                label.as_deref(),
            )
            .await?;
        }
        Commands::Tasks { action } => match action {
            TaskAction::List => tasks::run_list(&cfg).await?,
            TaskAction::Complete { id } => tasks::run_complete(&cfg, id).await?,
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
