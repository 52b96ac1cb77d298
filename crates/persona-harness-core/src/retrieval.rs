//! Ranked-retrieval abstraction.
//!
//! The [`RetrievalService`] trait is the only way the pipeline touches the
//! corpus: the corpus builder writes documents in bounded batches and the
//! context assembler asks for the top-K documents for a query. How ranking
//! works is up to the implementation.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::RetrievalDocument;

/// Upper bound on documents per [`RetrievalService::upsert`] call.
pub const MAX_UPSERT_BATCH: usize = 100;

/// Abstract ranked-retrieval backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](RetrievalService::upsert) | Insert or replace one batch of documents |
/// | [`query`](RetrievalService::query) | Top-`k` documents for a query, best first |
/// | [`clear`](RetrievalService::clear) | Remove every document |
/// | [`replace`](RetrievalService::replace) | Swap the whole corpus for a new one |
#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// Insert or replace a batch of at most [`MAX_UPSERT_BATCH`] documents.
    async fn upsert(&self, docs: &[RetrievalDocument]) -> Result<()>;

    /// Return up to `k` documents ranked by relevance to `text`.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievalDocument>>;

    /// Remove every document, so a rebuilt corpus does not mix with the old one.
    async fn clear(&self) -> Result<()>;

    /// Replace the corpus with `docs`, written in batches of `batch_size`.
    ///
    /// The default clears and then upserts batch by batch, so a failure
    /// part-way leaves a truncated corpus. Backends that can swap the
    /// corpus atomically override it. Returns the number of documents written.
    async fn replace(&self, docs: &[RetrievalDocument], batch_size: usize) -> Result<usize> {
        check_batch_size(batch_size)?;
        self.clear().await?;
        upsert_in_batches(self, docs, batch_size).await
    }
}

/// Reject batch sizes outside `1..=MAX_UPSERT_BATCH`.
pub fn check_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 || batch_size > MAX_UPSERT_BATCH {
        bail!(
            "upsert batch size must be between 1 and {}, got {}",
            MAX_UPSERT_BATCH,
            batch_size
        );
    }
    Ok(())
}

/// Upsert `docs` in consecutive batches of at most `batch_size`.
///
/// Returns the number of documents written.
pub async fn upsert_in_batches<S>(
    service: &S,
    docs: &[RetrievalDocument],
    batch_size: usize,
) -> Result<usize>
where
    S: RetrievalService + ?Sized,
{
    check_batch_size(batch_size)?;

    let mut written = 0;
    for batch in docs.chunks(batch_size) {
        service.upsert(batch).await?;
        written += batch.len();
    }
    Ok(written)
}

/// In-memory retrieval for tests and embedding.
///
/// Ranks by the number of distinct query terms a document contains
/// (case-insensitive); ties keep insertion order. Documents matching no
/// term are not returned.
pub struct InMemoryRetrieval {
    docs: RwLock<Vec<RetrievalDocument>>,
}

impl InMemoryRetrieval {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRetrieval {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("retrieval index lock poisoned")
}

#[async_trait]
impl RetrievalService for InMemoryRetrieval {
    async fn upsert(&self, batch: &[RetrievalDocument]) -> Result<()> {
        if batch.len() > MAX_UPSERT_BATCH {
            bail!("batch of {} exceeds limit of {}", batch.len(), MAX_UPSERT_BATCH);
        }
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        for doc in batch {
            match docs.iter_mut().find(|d| d.id == doc.id) {
                Some(existing) => *existing = doc.clone(),
                None => docs.push(doc.clone()),
            }
        }
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievalDocument>> {
        let query_lower = text.to_lowercase();
        let mut terms: Vec<&str> = query_lower.split_whitespace().collect();
        terms.sort_unstable();
        terms.dedup();
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let docs = self.docs.read().map_err(|_| poisoned())?;
        let mut scored: Vec<(usize, &RetrievalDocument)> = docs
            .iter()
            .filter_map(|doc| {
                let text_lower = doc.text.to_lowercase();
                let matches = terms.iter().filter(|t| text_lower.contains(*t)).count();
                (matches > 0).then_some((matches, doc))
            })
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, d)| d.clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.docs.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    /// Build the new corpus aside and swap it in under one write lock.
    async fn replace(&self, docs: &[RetrievalDocument], batch_size: usize) -> Result<usize> {
        check_batch_size(batch_size)?;
        let mut fresh: Vec<RetrievalDocument> = Vec::with_capacity(docs.len());
        for doc in docs {
            match fresh.iter_mut().find(|d| d.id == doc.id) {
                Some(existing) => *existing = doc.clone(),
                None => fresh.push(doc.clone()),
            }
        }
        *self.docs.write().map_err(|_| poisoned())? = fresh;
        Ok(docs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn doc(index: usize, text: &str) -> RetrievalDocument {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        RetrievalDocument {
            id: format!("conv_{}", index),
            text: text.to_string(),
            start_time: t,
            end_time: t,
            message_count: 1,
        }
    }

    /// Records batch sizes it receives.
    struct BatchRecorder {
        sizes: Mutex<Vec<usize>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RetrievalService for BatchRecorder {
        async fn upsert(&self, docs: &[RetrievalDocument]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sizes.lock().unwrap().push(docs.len());
            Ok(())
        }

        async fn query(&self, _text: &str, _k: usize) -> Result<Vec<RetrievalDocument>> {
            Ok(Vec::new())
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upsert_in_batches_respects_limit() {
        let recorder = BatchRecorder {
            sizes: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        };
        let docs: Vec<_> = (0..250).map(|i| doc(i, "A: hi")).collect();
        let written = upsert_in_batches(&recorder, &docs, 100).await.unwrap();
        assert_eq!(written, 250);
        assert_eq!(*recorder.sizes.lock().unwrap(), vec![100, 100, 50]);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_upsert_in_batches_rejects_bad_size() {
        let store = InMemoryRetrieval::new();
        assert!(upsert_in_batches(&store, &[], 0).await.is_err());
        assert!(upsert_in_batches(&store, &[], 101).await.is_err());
    }

    #[tokio::test]
    async fn test_query_ranks_by_term_overlap() {
        let store = InMemoryRetrieval::new();
        store
            .upsert(&[
                doc(0, "A: carrots for dinner"),
                doc(1, "B: unrelated"),
                doc(2, "A: carrots and apples for dinner"),
            ])
            .await
            .unwrap();

        let results = store.query("Carrots apples", 10).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["conv_2", "conv_0"]);

        let top = store.query("carrots", 1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, "conv_0");
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id_and_clear() {
        let store = InMemoryRetrieval::new();
        store.upsert(&[doc(0, "old text")]).await.unwrap();
        store.upsert(&[doc(0, "new text")]).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.query("old", 5).await.unwrap().is_empty());

        store.clear().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_default_replace_clears_then_batches() {
        let recorder = BatchRecorder {
            sizes: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        };
        let docs: Vec<_> = (0..7).map(|i| doc(i, "A: hi")).collect();
        assert_eq!(recorder.replace(&docs, 3).await.unwrap(), 7);
        assert_eq!(*recorder.sizes.lock().unwrap(), vec![3, 3, 1]);
        assert!(recorder.replace(&docs, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_corpus() {
        let store = InMemoryRetrieval::new();
        store.upsert(&[doc(0, "old"), doc(1, "old"), doc(2, "old")]).await.unwrap();

        // A rejected batch size leaves the previous corpus in place.
        assert!(store.replace(&[doc(5, "new")], 101).await.is_err());
        assert_eq!(store.len(), 3);

        let written = store.replace(&[doc(5, "new"), doc(6, "new")], 1).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.len(), 2);
        assert!(store.query("old", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_query() {
        let store = InMemoryRetrieval::new();
        store.upsert(&[doc(0, "text")]).await.unwrap();
        assert!(store.query("   ", 5).await.unwrap().is_empty());
    }
}
