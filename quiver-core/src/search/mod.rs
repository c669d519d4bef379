//! Tool filtering and relevance ranking
//!
//! Search runs in fixed stages over a snapshot of the registry's handles:
//!
//! 1. Filter with [`ToolQueryCriteria`]
//! 2. Score: tag matches, fuzzy text, embedding similarity
//! 3. Apply the custom [`Ranker`], which may add, override or exclude
//! 4. Sort by descending score, ties by ascending name
//! 5. Paginate, then convert each hit to the requested [`ResultShape`]
//!
//! # Example
//!
//! ```rust,ignore
//! let hits = registry
//!     .search(&ToolSearchOptions::query("read file").with_tags(["fs"]).explain())
//!     .await;
//! for hit in hits {
//!     println!("{} {:.2} {:?}", hit.name(), hit.score, hit.reasons);
//! }
//! ```

mod criteria;
mod embedding;
mod rank;
mod text;

pub use criteria::{MetadataOp, SchemaFilter, TagFilter, TextQuery, ToolQueryCriteria};
pub use embedding::{EmbeddingIndex, EmbeddingMatch, Embedder, cosine_similarity};
pub use rank::{
    MatchDetail, RankAdjustment, Ranker, ResultShape, ScoreBreakdown, SearchHit, SelectedTool,
    TieBreak, ToolSearchOptions,
};
pub use text::{FieldMatch, FuzzyMatcher, SearchField, TextMatch, TextMatcher, TextWeights};

use crate::config::SearchConfig;
use crate::tools::{ToolHandle, normalize_tags};
use std::sync::Arc;

/// Filter and rank engine with its embedding caches
pub struct SearchEngine {
    config: SearchConfig,
    matcher: Arc<dyn TextMatcher>,
    embedder: Option<Arc<dyn Embedder>>,
    index: EmbeddingIndex,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("config", &self.config)
            .field("embedder", &self.embedder.is_some())
            .field("index", &self.index)
            .finish()
    }
}

impl SearchEngine {
    /// Create an engine with the default fuzzy matcher and no embedder
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            matcher: Arc::new(FuzzyMatcher),
            embedder: None,
            index: EmbeddingIndex::new(),
        }
    }

    /// Configure an embedder
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Replace the text matcher
    pub fn with_text_matcher(mut self, matcher: Arc<dyn TextMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Search configuration
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Embedding caches
    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    /// Drop every cached tool embedding
    pub fn reindex(&self) {
        tracing::debug!("Clearing tool embedding cache");
        self.index.clear();
    }

    /// Drop the cached embeddings of one tool
    pub fn forget(&self, tool_id: &str) {
        self.index.forget(tool_id);
    }

    /// Handles matching the criteria, in input order
    pub fn query(&self, tools: &[ToolHandle], criteria: &ToolQueryCriteria) -> Vec<ToolHandle> {
        tools
            .iter()
            .filter(|handle| criteria.matches(handle, self.matcher.as_ref(), self.config.text_threshold))
            .cloned()
            .collect()
    }

    /// Rank handles against search options
    pub async fn search(&self, tools: &[ToolHandle], options: &ToolSearchOptions) -> Vec<SearchHit> {
        let candidates = match options.filter {
            Some(ref criteria) => self.query(tools, criteria),
            None => tools.to_vec(),
        };

        let query = options.query.as_deref().map(str::trim).filter(|q| !q.is_empty());
        let wanted_tags = normalize_tags(&options.tags);
        let threshold = options.threshold.unwrap_or(self.config.text_threshold);

        let query_vector = match (query, &self.embedder) {
            (Some(query), Some(embedder)) if options.use_embeddings => {
                self.index.query_vector(embedder.as_ref(), query).await
            }
            _ => None,
        };

        let mut hits = Vec::with_capacity(candidates.len());
        for handle in &candidates {
            let mut detail = MatchDetail::default();
            let mut reasons = Vec::new();
            let mut score = ScoreBreakdown::default();

            for tag in &wanted_tags {
                if handle.definition().has_tag(tag) {
                    let boost = options.tag_boosts.get(tag).copied().unwrap_or(0.0);
                    score.tags += self.config.tag_weight + boost;
                    reasons.push(format!("tag:{}", tag));
                    detail.tags.push(tag.clone());
                }
            }

            if let Some(query) = query {
                let found = text::match_tool(
                    self.matcher.as_ref(),
                    query,
                    handle,
                    &options.text_weights,
                    threshold,
                );
                if found.is_match() {
                    score.text = found.score * self.config.text_weight;
                    for field_match in &found.fields {
                        reasons.push(format!("text:{}", field_match.field.as_str()));
                        detail.fields.push(field_match.field);
                        match field_match.field {
                            SearchField::SchemaKeys => detail.schema_keys.push(field_match.value.clone()),
                            SearchField::MetadataKeys => {
                                detail.metadata_keys.push(field_match.value.clone())
                            }
                            _ => {}
                        }
                    }
                }
            }

            if let (Some(vector), Some(embedder)) = (&query_vector, &self.embedder) {
                if let Some(best) = self.index.best_match(embedder.as_ref(), handle, vector).await {
                    if best.similarity > 0.0 {
                        score.embedding = best.similarity * self.config.embedding_weight;
                        reasons.push(format!("embedding:{}", best.field.as_str()));
                    }
                    detail.embedding_field = Some(best.field);
                    detail.embedding_similarity = Some(best.similarity);
                }
            }

            let mut total = score.total();
            if let Some(ref ranker) = options.ranker {
                match ranker.rank(handle, query, &score) {
                    RankAdjustment::Keep => {}
                    RankAdjustment::Add(extra) => {
                        total += extra;
                        reasons.push("custom".to_string());
                    }
                    RankAdjustment::Override(value) => {
                        total = value;
                        reasons.push("custom".to_string());
                    }
                    RankAdjustment::Exclude => continue,
                }
            }

            let keep = match options.min_score {
                Some(min) => total >= min,
                None if options.has_query() || !wanted_tags.is_empty() => total > 0.0,
                None => true,
            };
            if !keep {
                continue;
            }

            detail.tag_score = score.tags;
            detail.text_score = score.text;
            detail.embedding_score = score.embedding;
            hits.push(SearchHit {
                tool: SelectedTool::Handle(handle.clone()),
                score: total,
                reasons,
                matches: options.explain.then_some(detail),
            });
        }

        rank::sort_hits(&mut hits, &options.tie_break);

        let limit = options.limit.unwrap_or(usize::MAX);
        let hits: Vec<SearchHit> = hits
            .into_iter()
            .skip(options.offset)
            .take(limit)
            .map(|mut hit| {
                if let SelectedTool::Handle(ref handle) = hit.tool {
                    hit.tool = SelectedTool::select(handle, options.select);
                }
                hit
            })
            .collect();

        tracing::debug!(
            query = ?query,
            candidates = candidates.len(),
            hits = hits.len(),
            "Tool search complete"
        );
        hits
    }
}
