//! Corpus statistics.
//!
//! A quick summary of what's indexed: conversation and message counts,
//! embedding coverage, the time span covered and how many tasks remain.
//! Used by `persona stats` to confirm that extraction and indexing worked.

use anyhow::Result;
use sqlx::Row;

use persona_harness_core::tasks::{remaining, TaskStore};

use crate::config::Config;
use crate::db;
use crate::tasks::JsonTaskStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS conversations,
               COALESCE(SUM(message_count), 0) AS messages,
               MIN(start_time) AS first_ms,
               MAX(end_time) AS last_ms
        FROM conversations
        "#,
    )
    .fetch_one(&pool)
    .await?;

    let conversations: i64 = row.get("conversations");
    let messages: i64 = row.get("messages");
    let first_ms: Option<i64> = row.get("first_ms");
    let last_ms: Option<i64> = row.get("last_ms");

    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_vectors")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Persona Harness: Corpus Stats");
    println!("===============================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Conversations: {}", conversations);
    println!("  Messages:      {}", messages);
    println!(
        "  Embedded:      {} / {} ({}%)",
        embedded,
        conversations,
        if conversations > 0 {
            (embedded * 100) / conversations
        } else {
            0
        }
    );
    if let (Some(first), Some(last)) = (first_ms, last_ms) {
        println!(
            "  Span:          {} → {}",
            format_ms(first),
            format_ms(last)
        );
    }

    match JsonTaskStore::new(&config.tasks.path).list().await {
        Ok(tasks) => println!(
            "  Tasks:         {} of {} remaining",
            remaining(&tasks),
            tasks.len()
        ),
        Err(e) => println!("  Tasks:         unavailable ({:#})", e),
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), "1970-01-01 00:00");
    }
}
