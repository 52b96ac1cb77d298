use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteRetrieval;

const EXCERPT_CHARS: usize = 160;

/// Print the ranked conversations for `query`. A debugging aid for tuning
/// retrieval; prompt assembly uses the same ranking.
pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let store = SqliteRetrieval::new(pool.clone(), config);
    let limit = limit.unwrap_or(config.retrieval.top_k);
    let results = store.search(query, limit).await?;

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let doc = &result.document;
        println!(
            "{}. [{:.2}] {} ({} messages)",
            i + 1,
            result.score,
            doc.id,
            doc.message_count
        );
        println!(
            "    when: {} → {}",
            doc.start_time.format("%Y-%m-%d %H:%M"),
            doc.end_time.format("%Y-%m-%d %H:%M")
        );
        println!("    excerpt: \"{}\"", excerpt(&doc.text, EXCERPT_CHARS));
        println!();
    }

    pool.close().await;
    Ok(())
}

/// First `max_chars` characters of `text` on one line.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " / ");
    let mut out: String = flat.chars().take(max_chars).collect();
    if flat.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
