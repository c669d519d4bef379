//! Embedding similarity for search
//!
//! Two caches sit in front of the [`Embedder`]:
//! - per tool id, holding one vector per searchable field; entries persist
//!   until [`EmbeddingIndex::forget`] or [`EmbeddingIndex::clear`] is called,
//!   so a stale vector survives content changes until the tool is reindexed
//! - per query text, keyed by content; a failed embedding is evicted so the
//!   next search retries it

use super::text::{SearchField, field_values};
use crate::tools::ToolHandle;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;

/// Turns texts into vectors
///
/// Implementations must be deterministic for a given input; results are cached.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per text, in order
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Cosine similarity; 0 for mismatched or zero-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

type ToolVectors = Vec<(SearchField, Vec<f32>)>;
type Slot<T> = Arc<OnceCell<T>>;

/// Best-matching field of one tool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddingMatch {
    /// Field whose vector was closest to the query
    pub field: SearchField,

    /// Cosine similarity of that field
    pub similarity: f64,
}

/// Cached embeddings for tools and queries
#[derive(Default)]
pub struct EmbeddingIndex {
    tools: Mutex<HashMap<String, Slot<ToolVectors>>>,
    queries: Mutex<HashMap<String, Slot<Vec<f32>>>>,
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("tools", &lock(&self.tools).len())
            .field("queries", &lock(&self.queries).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Get the slot for `key`, creating it if needed
fn slot<T>(map: &Mutex<HashMap<String, Slot<T>>>, key: &str) -> Slot<T> {
    lock(map)
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(OnceCell::new()))
        .clone()
}

/// Remove `key` if it still maps to `slot`
fn evict<T>(map: &Mutex<HashMap<String, Slot<T>>>, key: &str, slot: &Slot<T>) {
    let mut map = lock(map);
    if map.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
        map.remove(key);
    }
}

async fn embed_exact(embedder: &dyn Embedder, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
    let vectors = embedder.embed(texts).await?;
    if vectors.len() != texts.len() {
        anyhow::bail!(
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        );
    }
    Ok(vectors)
}

impl EmbeddingIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tools with cached vectors
    pub fn tool_count(&self) -> usize {
        lock(&self.tools)
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Number of cached query vectors
    pub fn query_count(&self) -> usize {
        lock(&self.queries)
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Drop the vectors of one tool
    pub fn forget(&self, tool_id: &str) {
        lock(&self.tools).remove(tool_id);
    }

    /// Drop every tool vector; query vectors are content-keyed and kept
    pub fn clear(&self) {
        lock(&self.tools).clear();
    }

    /// Vector for a query, from cache when possible
    pub async fn query_vector(&self, embedder: &dyn Embedder, query: &str) -> Option<Vec<f32>> {
        let cell = slot(&self.queries, query);
        let result = cell
            .get_or_try_init(|| async {
                let mut vectors = embed_exact(embedder, &[query.to_string()]).await?;
                vectors
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))
            })
            .await;

        match result {
            Ok(vector) => Some(vector.clone()),
            Err(error) => {
                evict(&self.queries, query, &cell);
                tracing::warn!(error = %error, "Failed to embed search query; evicted cache entry");
                None
            }
        }
    }

    /// Vectors for every non-empty field of a tool, from cache when possible
    pub async fn tool_vectors(&self, embedder: &dyn Embedder, handle: &ToolHandle) -> Option<ToolVectors> {
        let cell = slot(&self.tools, handle.id());
        let result = cell
            .get_or_try_init(|| async {
                let fields: Vec<(SearchField, String)> = SearchField::ALL
                    .into_iter()
                    .filter_map(|field| {
                        let text = field_values(handle, field).join(" ");
                        (!text.trim().is_empty()).then_some((field, text))
                    })
                    .collect();
                let texts: Vec<String> = fields.iter().map(|(_, text)| text.clone()).collect();
                let vectors = embed_exact(embedder, &texts).await?;
                tracing::debug!(tool = %handle.name(), fields = texts.len(), "Indexed tool embeddings");
                Ok::<_, anyhow::Error>(
                    fields
                        .into_iter()
                        .map(|(field, _)| field)
                        .zip(vectors)
                        .collect::<ToolVectors>(),
                )
            })
            .await;

        match result {
            Ok(vectors) => Some(vectors.clone()),
            Err(error) => {
                evict(&self.tools, handle.id(), &cell);
                tracing::warn!(tool = %handle.name(), error = %error, "Failed to embed tool");
                None
            }
        }
    }

    /// Closest field of a tool to the query vector
    pub async fn best_match(
        &self,
        embedder: &dyn Embedder,
        handle: &ToolHandle,
        query: &[f32],
    ) -> Option<EmbeddingMatch> {
        self.tool_vectors(embedder, handle)
            .await?
            .iter()
            .map(|(field, vector)| EmbeddingMatch {
                field: *field,
                similarity: cosine_similarity(query, vector),
            })
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
    }
}
