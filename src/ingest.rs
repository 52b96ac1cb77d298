//! Corpus indexing.
//!
//! Loads the extracted messages, segments them into conversations, formats
//! each conversation as a document and swaps it in through
//! [`RetrievalService::replace`] in bounded batches. Stale documents never
//! linger, and a failed run leaves the previous corpus in place.

use anyhow::Result;
use chrono::Duration;

use persona_harness_core::corpus::build_documents;
use persona_harness_core::models::{NormalizedMessage, PersonaLabels, RetrievalDocument};
use persona_harness_core::retrieval::RetrievalService;
use persona_harness_core::segment::segment_conversations;

use crate::config::Config;
use crate::db;
use crate::extract::read_messages;
use crate::migrate;
use crate::sqlite_store::SqliteRetrieval;

/// Counts reported by an index run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    pub messages: usize,
    /// Messages skipped because they carry no timestamp.
    pub untimestamped: usize,
    pub documents: usize,
}

/// Segment `messages` and format the resulting conversations.
pub fn build_corpus(
    messages: Vec<NormalizedMessage>,
    gap: Duration,
    labels: &PersonaLabels,
) -> (Vec<RetrievalDocument>, IndexSummary) {
    let total = messages.len();
    let untimestamped = messages.iter().filter(|m| m.timestamp.is_none()).count();
    let chunks = segment_conversations(messages, gap);
    let documents = build_documents(&chunks, labels);

    let summary = IndexSummary {
        messages: total,
        untimestamped,
        documents: documents.len(),
    };
    (documents, summary)
}

pub async fn run_index(config: &Config, dry_run: bool) -> Result<()> {
    let messages = read_messages(&config.source.messages_path)?;
    let gap = Duration::minutes(config.segmentation.gap_minutes);
    let (documents, summary) = build_corpus(messages, gap, &config.persona.labels());

    if summary.untimestamped > 0 {
        tracing::warn!(
            skipped = summary.untimestamped,
            "messages without a timestamp were left out of the corpus"
        );
    }

    if dry_run {
        println!("index (dry-run)");
        println!("  messages: {}", summary.messages);
        println!("  conversations: {}", summary.documents);
        return Ok(());
    }

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let store = SqliteRetrieval::new(pool.clone(), config);
    let written = store
        .replace(&documents, config.retrieval.upsert_batch_size)
        .await?;

    println!("index");
    println!("  messages: {}", summary.messages);
    println!("  conversations indexed: {}", written);
    if config.embedding.is_enabled() {
        let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_vectors")
            .fetch_one(&pool)
            .await?;
        println!("  embeddings written: {}", embedded);
        println!(
            "  embeddings pending: {}",
            (written as i64 - embedded).max(0)
        );
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
