//! Message extraction from the source message store.
//!
//! Reads the `message` rows for one conversation handle, in chronological
//! order, and turns them into [`NormalizedMessage`]s with
//! [`normalize_records`]. The result is written as pretty JSON to
//! `source.messages_path`, where `persona index` picks it up.
//!
//! The source store is opened read-only and never modified.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use persona_harness_core::extract::{normalize_records, ExtractOutcome};
use persona_harness_core::models::{NormalizedMessage, RawRecord};

use crate::config::Config;
use crate::db;

/// Run the extract command and print a summary.
pub async fn run_extract(config: &Config) -> Result<()> {
    let pool = db::connect_source(&config.source.path).await?;
    let records = fetch_records(&pool, config.source.handle_id).await?;
    pool.close().await;

    let total = records.len();
    let outcome = normalize_records(records);
    write_messages(&config.source.messages_path, &outcome.messages)?;

    report(&outcome, total, &config.source.messages_path);
    Ok(())
}

/// All records exchanged with `handle_id`, oldest first.
pub async fn fetch_records(pool: &SqlitePool, handle_id: i64) -> Result<Vec<RawRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT ROWID AS id, text, attributedBody, is_from_me, date
        FROM message
        WHERE handle_id = ?
        ORDER BY date ASC
        "#,
    )
    .bind(handle_id)
    .fetch_all(pool)
    .await
    .context("Failed to read message table from source store")?;

    Ok(rows
        .iter()
        .map(|row| {
            let is_from_me: Option<i64> = row.get("is_from_me");
            let date: Option<i64> = row.get("date");
            RawRecord {
                id: row.get("id"),
                text: row.get("text"),
                body: row.get("attributedBody"),
                sender_flag: is_from_me.unwrap_or(0) != 0,
                raw_timestamp: date.unwrap_or(0),
            }
        })
        .collect())
}

/// Write messages as pretty JSON, creating the parent directory.
pub fn write_messages(path: &Path, messages: &[NormalizedMessage]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(messages)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write messages file: {}", path.display()))?;
    Ok(())
}

/// Read messages written by [`write_messages`].
pub fn read_messages(path: &Path) -> Result<Vec<NormalizedMessage>> {
    let content = std::fs::read_to_string(path).with_context(|| {
        format!(
            "Failed to read messages file: {} (run `persona extract` first)",
            path.display()
        )
    })?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse messages file: {}", path.display()))
}

fn report(outcome: &ExtractOutcome, total: usize, path: &Path) {
    println!(
        "Extracted {} messages to {}",
        outcome.messages.len(),
        path.display()
    );
    if outcome.unrecoverable > 0 {
        println!(
            "  ({} messages had no extractable text)",
            outcome.unrecoverable
        );
    }
    if outcome.malformed > 0 {
        println!("  ({} message bodies were malformed)", outcome.malformed);
    }
    tracing::debug!(total, "source records read");
}
