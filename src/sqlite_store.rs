//! SQLite-backed [`RetrievalService`] implementation.
//!
//! Documents live in `conversations`, mirrored into the FTS5 table
//! `conversations_fts` for keyword ranking. When an embedding provider is
//! configured, each document also gets a vector in `conversation_vectors`,
//! enabling `semantic` and `hybrid` ranking.
//!
//! # Ranking
//!
//! | Mode | Score |
//! |------|-------|
//! | `keyword` | FTS5 bm25 over the query terms (quoted, OR-ed) |
//! | `semantic` | cosine similarity between query and document vectors |
//! | `hybrid` | `(1 - α) · keyword + α · semantic`, both min-max normalized |
//!
//! Equal scores are ordered by document id so results are deterministic.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;

use persona_harness_core::models::RetrievalDocument;
use persona_harness_core::retrieval::{check_batch_size, RetrievalService, MAX_UPSERT_BATCH};

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{self, EmbeddingProvider};

/// A document together with the score it was ranked by.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: RetrievalDocument,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct Candidate {
    conversation_id: String,
    raw_score: f64,
}

/// SQLite implementation of [`RetrievalService`].
pub struct SqliteRetrieval {
    pool: SqlitePool,
    retrieval: RetrievalConfig,
    provider: Option<Box<dyn EmbeddingProvider>>,
}

impl SqliteRetrieval {
    /// Wrap an open corpus pool. The schema must already exist.
    ///
    /// An embedding provider that fails to initialize is logged and left
    /// out; keyword ranking keeps working without it.
    pub fn new(pool: SqlitePool, config: &Config) -> Self {
        let provider = if config.embedding.is_enabled() {
            match embedding::create_provider(&config.embedding) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(error = %e, "could not create embedding provider");
                    None
                }
            }
        } else {
            None
        };

        Self {
            pool,
            retrieval: config.retrieval.clone(),
            provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Rank documents for `text` with their scores, best first.
    pub async fn search(&self, text: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        if text.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mode = self.retrieval.mode.as_str();
        let candidate_k = self.retrieval.candidate_k.max(k as i64);

        let keyword = if mode == "keyword" || mode == "hybrid" {
            self.keyword_candidates(text, candidate_k).await?
        } else {
            Vec::new()
        };

        let vector = match mode {
            "semantic" => self.vector_candidates(text, candidate_k).await?,
            "hybrid" => match self.vector_candidates(text, candidate_k).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "semantic ranking unavailable, using keyword only");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };

        let alpha = match mode {
            "keyword" => 0.0,
            "semantic" => 1.0,
            _ => self.retrieval.hybrid_alpha,
        };

        let ranked = merge_candidates(&keyword, &vector, alpha);

        let mut results = Vec::with_capacity(k.min(ranked.len()));
        for (id, score) in ranked.into_iter().take(k) {
            if let Some(document) = self.get_document(&id).await? {
                results.push(ScoredDocument { document, score });
            }
        }
        Ok(results)
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<RetrievalDocument>> {
        let row = sqlx::query(
            "SELECT id, text, start_time, end_time, message_count FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let start: i64 = r.get("start_time");
            let end: i64 = r.get("end_time");
            let count: i64 = r.get("message_count");
            Ok(RetrievalDocument {
                id: r.get("id"),
                text: r.get("text"),
                start_time: from_millis(start)?,
                end_time: from_millis(end)?,
                message_count: count as usize,
            })
        })
        .transpose()
    }

    async fn keyword_candidates(&self, text: &str, limit: i64) -> Result<Vec<Candidate>> {
        let Some(match_expr) = fts_query(text) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT conversation_id, rank
            FROM conversations_fts
            WHERE conversations_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                Candidate {
                    conversation_id: row.get("conversation_id"),
                    raw_score: -rank, // negate so higher = better
                }
            })
            .collect())
    }

    async fn vector_candidates(&self, text: &str, limit: i64) -> Result<Vec<Candidate>> {
        let provider = self
            .provider
            .as_deref()
            .ok_or_else(|| anyhow!("embedding provider unavailable"))?;
        let query_vec = embedding::embed_query(provider, text).await?;

        let rows = sqlx::query(
            "SELECT conversation_id, embedding FROM conversation_vectors WHERE model = ?",
        )
        .bind(provider.model_name())
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<Candidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                Candidate {
                    conversation_id: row.get("conversation_id"),
                    raw_score: embedding::cosine_similarity(&query_vec, &vec) as f64,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    /// Content hash of the stored vector for `id`, if any. A failed lookup
    /// is logged and treated as missing, so the document is re-embedded.
    async fn stored_hash(&self, id: &str, model: &str) -> Option<String> {
        sqlx::query_scalar(
            "SELECT hash FROM conversation_vectors WHERE conversation_id = ? AND model = ?",
        )
        .bind(id)
        .bind(model)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(
                conversation_id = %id,
                error = %e,
                "could not read stored vector hash; re-embedding"
            );
            None
        })
    }

    /// Embed documents whose stored vector is missing or stale. Non-fatal.
    async fn embed_documents(&self, docs: &[RetrievalDocument]) {
        let Some(provider) = self.provider.as_deref() else {
            return;
        };
        let model = provider.model_name().to_string();

        let mut needed = Vec::new();
        for doc in docs {
            let hash = content_hash(&doc.text);
            let existing = self.stored_hash(&doc.id, &model).await;
            if existing.as_deref() != Some(hash.as_str()) {
                needed.push((doc, hash));
            }
        }

        if needed.is_empty() {
            return;
        }

        let texts: Vec<String> = needed.iter().map(|(d, _)| d.text.clone()).collect();
        let vectors = match embedding::embed_checked(provider, &texts).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    documents = needed.len(),
                    "embedding failed; documents remain keyword-searchable"
                );
                return;
            }
        };

        for ((doc, hash), vec) in needed.iter().zip(vectors.iter()) {
            let result = sqlx::query(
                r#"
                INSERT INTO conversation_vectors (conversation_id, model, dims, hash, embedding)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(conversation_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    hash = excluded.hash,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&doc.id)
            .bind(&model)
            .bind(vec.len() as i64)
            .bind(hash)
            .bind(embedding::vec_to_blob(vec))
            .execute(&self.pool)
            .await;

            if let Err(e) = result {
                tracing::warn!(conversation_id = %doc.id, error = %e, "failed to store embedding");
            }
        }
    }
}

#[async_trait]
impl RetrievalService for SqliteRetrieval {
    async fn upsert(&self, docs: &[RetrievalDocument]) -> Result<()> {
        if docs.len() > MAX_UPSERT_BATCH {
            anyhow::bail!("batch of {} exceeds limit of {}", docs.len(), MAX_UPSERT_BATCH);
        }

        let mut tx = self.pool.begin().await?;
        for doc in docs {
            write_document(&mut tx, doc).await?;
        }
        tx.commit().await?;

        self.embed_documents(docs).await;
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievalDocument>> {
        Ok(self
            .search(text, k)
            .await?
            .into_iter()
            .map(|s| s.document)
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM conversation_vectors")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations_fts")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Swap the corpus in a single transaction: either every document of
    /// the new corpus is visible afterwards or the old corpus is untouched.
    /// Vectors of documents whose text is unchanged are kept; the rest are
    /// embedded after commit in batches of `batch_size`.
    async fn replace(&self, docs: &[RetrievalDocument], batch_size: usize) -> Result<usize> {
        check_batch_size(batch_size)?;
        let ids = serde_json::to_string(&docs.iter().map(|d| d.id.as_str()).collect::<Vec<_>>())?;

        let mut tx = self.pool.begin().await?;
        for doc in docs {
            write_document(&mut tx, doc).await?;
        }
        for table in ["conversation_vectors", "conversations_fts"] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE conversation_id NOT IN (SELECT value FROM json_each(?))",
                table
            ))
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM conversations WHERE id NOT IN (SELECT value FROM json_each(?))")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for batch in docs.chunks(batch_size) {
            self.embed_documents(batch).await;
        }
        Ok(docs.len())
    }
}

/// Insert or update one document and its FTS row inside `tx`, dropping any
/// vector computed from older text.
async fn write_document(
    tx: &mut Transaction<'_, Sqlite>,
    doc: &RetrievalDocument,
) -> Result<()> {
    let hash = content_hash(&doc.text);

    sqlx::query(
        r#"
        INSERT INTO conversations (id, text, start_time, end_time, message_count, hash)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            text = excluded.text,
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            message_count = excluded.message_count,
            hash = excluded.hash
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.text)
    .bind(doc.start_time.timestamp_millis())
    .bind(doc.end_time.timestamp_millis())
    .bind(doc.message_count as i64)
    .bind(&hash)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM conversations_fts WHERE conversation_id = ?")
        .bind(&doc.id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("INSERT INTO conversations_fts (conversation_id, text) VALUES (?, ?)")
        .bind(&doc.id)
        .bind(&doc.text)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM conversation_vectors WHERE conversation_id = ? AND hash != ?")
        .bind(&doc.id)
        .bind(&hash)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Build an FTS5 MATCH expression: every whitespace-separated term quoted
/// (so punctuation and FTS operators are literal) and OR-ed together.
fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

pub(crate) fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("invalid stored timestamp: {}", ms))
}

/// Min-max normalize scores to [0, 1]. A single distinct score maps to 1.0.
fn normalize_scores(candidates: &[Candidate]) -> HashMap<&str, f64> {
    if candidates.is_empty() {
        return HashMap::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c.conversation_id.as_str(), norm)
        })
        .collect()
}

/// Combine both channels into `(id, score)` pairs, best first, ties by id.
fn merge_candidates(keyword: &[Candidate], vector: &[Candidate], alpha: f64) -> Vec<(String, f64)> {
    let kw = normalize_scores(keyword);
    let vec = normalize_scores(vector);

    let mut ids: Vec<&str> = kw.keys().chain(vec.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut scored: Vec<(String, f64)> = ids
        .into_iter()
        .map(|id| {
            let k = kw.get(id).copied().unwrap_or(0.0);
            let v = vec.get(id).copied().unwrap_or(0.0);
            (id.to_string(), (1.0 - alpha) * k + alpha * v)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
}
