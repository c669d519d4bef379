//! Search options, ranking hooks and result shapes

use super::criteria::ToolQueryCriteria;
use super::text::{SearchField, TextWeights};
use crate::tools::{ToolHandle, ToolRecord, ToolSummary};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// What a custom ranker does with a tool's score
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RankAdjustment {
    /// Leave the score as is
    Keep,
    /// Add to the score
    Add(f64),
    /// Replace the score
    Override(f64),
    /// Drop the tool from the results
    Exclude,
}

/// Score parts handed to a custom ranker
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub tags: f64,
    pub text: f64,
    pub embedding: f64,
}

impl ScoreBreakdown {
    /// Sum of all parts
    pub fn total(&self) -> f64 {
        self.tags + self.text + self.embedding
    }
}

/// Custom scoring hook
pub trait Ranker: Send + Sync {
    /// Adjust the score of one tool
    fn rank(&self, handle: &ToolHandle, query: Option<&str>, score: &ScoreBreakdown) -> RankAdjustment;
}

impl<F> Ranker for F
where
    F: Fn(&ToolHandle, Option<&str>, &ScoreBreakdown) -> RankAdjustment + Send + Sync,
{
    fn rank(&self, handle: &ToolHandle, query: Option<&str>, score: &ScoreBreakdown) -> RankAdjustment {
        self(handle, query, score)
    }
}

type HitComparator = Arc<dyn Fn(&SearchHit, &SearchHit) -> Ordering + Send + Sync>;

/// Ordering among hits with equal scores
#[derive(Clone, Default)]
pub enum TieBreak {
    /// Ascending name
    #[default]
    ByName,
    /// Keep registration order
    None,
    /// Full custom comparator; replaces score ordering too
    Custom(HitComparator),
}

impl std::fmt::Debug for TieBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TieBreak::ByName => f.write_str("ByName"),
            TieBreak::None => f.write_str("None"),
            TieBreak::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Shape of each returned tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultShape {
    /// The live handle
    #[default]
    Handle,
    /// Just the name
    Name,
    /// The serializable definition
    Definition,
    /// A [`ToolSummary`]
    Summary,
}

/// Filter-and-rank request
#[derive(Clone)]
pub struct ToolSearchOptions {
    /// Free-text query for fuzzy and embedding scoring
    pub query: Option<String>,

    /// Tags that add to the score when present
    pub tags: Vec<String>,

    /// Extra score per matched tag
    pub tag_boosts: HashMap<String, f64>,

    /// Filter applied before scoring
    pub filter: Option<ToolQueryCriteria>,

    /// Field weights for the text score
    pub text_weights: TextWeights,

    /// Minimum similarity for a text field to count; config default when unset
    pub threshold: Option<f64>,

    /// Use the configured embedder, if any
    pub use_embeddings: bool,

    /// Custom scoring hook
    pub ranker: Option<Arc<dyn Ranker>>,

    /// Ordering among equal scores
    pub tie_break: TieBreak,

    /// Attach match details to every hit
    pub explain: bool,

    /// Hits to skip after ranking
    pub offset: usize,

    /// Maximum hits to return
    pub limit: Option<usize>,

    /// Drop hits scoring below this
    pub min_score: Option<f64>,

    /// Shape of each returned tool
    pub select: ResultShape,
}

impl Default for ToolSearchOptions {
    fn default() -> Self {
        Self {
            query: None,
            tags: Vec::new(),
            tag_boosts: HashMap::new(),
            filter: None,
            text_weights: TextWeights::default(),
            threshold: None,
            use_embeddings: true,
            ranker: None,
            tie_break: TieBreak::default(),
            explain: false,
            offset: 0,
            limit: None,
            min_score: None,
            select: ResultShape::default(),
        }
    }
}

impl std::fmt::Debug for ToolSearchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSearchOptions")
            .field("query", &self.query)
            .field("tags", &self.tags)
            .field("filter", &self.filter)
            .field("explain", &self.explain)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .field("select", &self.select)
            .finish_non_exhaustive()
    }
}

impl ToolSearchOptions {
    /// Search by free text
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Score by tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Extra score for one tag
    pub fn with_tag_boost(mut self, tag: impl Into<String>, boost: f64) -> Self {
        self.tag_boosts.insert(tag.into().trim().to_lowercase(), boost);
        self
    }

    /// Filter before ranking
    pub fn with_filter(mut self, filter: ToolQueryCriteria) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set text field weights
    pub fn with_text_weights(mut self, weights: TextWeights) -> Self {
        self.text_weights = weights;
        self
    }

    /// Set text similarity threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Skip embedding similarity
    pub fn without_embeddings(mut self) -> Self {
        self.use_embeddings = false;
        self
    }

    /// Set a custom ranker
    pub fn with_ranker(mut self, ranker: Arc<dyn Ranker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    /// Set tie-break mode
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Attach match details
    pub fn explain(mut self) -> Self {
        self.explain = true;
        self
    }

    /// Paginate
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Limit the number of hits
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Drop hits below a score
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Choose the result shape
    pub fn select(mut self, shape: ResultShape) -> Self {
        self.select = shape;
        self
    }

    pub(crate) fn has_query(&self) -> bool {
        self.query.as_deref().is_some_and(|q| !q.trim().is_empty())
    }
}

/// Why a tool matched, when `explain` is set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchDetail {
    /// Fields that matched the text query
    pub fields: Vec<SearchField>,

    /// Requested tags the tool carries
    pub tags: Vec<String>,

    /// Schema keys that matched the text query
    pub schema_keys: Vec<String>,

    /// Metadata keys that matched the text query
    pub metadata_keys: Vec<String>,

    /// Field with the closest embedding
    pub embedding_field: Option<SearchField>,

    /// Similarity of that field
    pub embedding_similarity: Option<f64>,

    /// Score parts before the custom ranker
    pub tag_score: f64,
    pub text_score: f64,
    pub embedding_score: f64,
}

/// A tool in the requested shape
#[derive(Debug, Clone)]
pub enum SelectedTool {
    Handle(ToolHandle),
    Name(String),
    Definition(ToolRecord),
    Summary(ToolSummary),
}

impl SelectedTool {
    pub(crate) fn select(handle: &ToolHandle, shape: ResultShape) -> Self {
        match shape {
            ResultShape::Handle => SelectedTool::Handle(handle.clone()),
            ResultShape::Name => SelectedTool::Name(handle.name().to_string()),
            ResultShape::Definition => SelectedTool::Definition(handle.definition().to_record()),
            ResultShape::Summary => SelectedTool::Summary(handle.summary()),
        }
    }

    /// Tool name
    pub fn name(&self) -> &str {
        match self {
            SelectedTool::Handle(handle) => handle.name(),
            SelectedTool::Name(name) => name,
            SelectedTool::Definition(record) => &record.name,
            SelectedTool::Summary(summary) => &summary.name,
        }
    }

    /// The handle, when the shape is [`ResultShape::Handle`]
    pub fn as_handle(&self) -> Option<&ToolHandle> {
        match self {
            SelectedTool::Handle(handle) => Some(handle),
            _ => None,
        }
    }
}

/// One ranked result
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The tool, in the requested shape
    pub tool: SelectedTool,

    /// Final score
    pub score: f64,

    /// Short human-readable reasons, e.g. `tag:web`, `text:name`
    pub reasons: Vec<String>,

    /// Detail, when `explain` is set
    pub matches: Option<MatchDetail>,
}

impl SearchHit {
    /// Tool name
    pub fn name(&self) -> &str {
        self.tool.name()
    }
}

/// Order hits by descending score, then by the tie-break rule
pub(crate) fn sort_hits(hits: &mut [SearchHit], tie_break: &TieBreak) {
    match tie_break {
        TieBreak::Custom(compare) => hits.sort_by(|a, b| compare(a, b)),
        TieBreak::None => hits.sort_by(|a, b| b.score.total_cmp(&a.score)),
        TieBreak::ByName => hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.name().cmp(b.name()))
        }),
    }
}
