//! Fuzzy text matching over the searchable fields of a tool

use crate::tools::ToolHandle;
use serde::{Deserialize, Serialize};

/// A searchable field of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    /// Tool name
    Name,
    /// Description
    Description,
    /// Tags
    Tags,
    /// Top-level input schema keys
    SchemaKeys,
    /// Metadata keys
    MetadataKeys,
}

impl SearchField {
    /// All fields, in scoring order
    pub const ALL: [SearchField; 5] = [
        SearchField::Name,
        SearchField::Description,
        SearchField::Tags,
        SearchField::SchemaKeys,
        SearchField::MetadataKeys,
    ];

    /// Wire name of this field
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::Name => "name",
            SearchField::Description => "description",
            SearchField::Tags => "tags",
            SearchField::SchemaKeys => "schema_keys",
            SearchField::MetadataKeys => "metadata_keys",
        }
    }
}

/// Per-field weights for text matching
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextWeights {
    pub name: f64,
    pub description: f64,
    pub tags: f64,
    pub schema_keys: f64,
    pub metadata_keys: f64,
}

impl Default for TextWeights {
    fn default() -> Self {
        Self {
            name: 1.0,
            description: 0.7,
            tags: 0.6,
            schema_keys: 0.5,
            metadata_keys: 0.4,
        }
    }
}

impl TextWeights {
    /// Weight of one field
    pub fn weight(&self, field: SearchField) -> f64 {
        match field {
            SearchField::Name => self.name,
            SearchField::Description => self.description,
            SearchField::Tags => self.tags,
            SearchField::SchemaKeys => self.schema_keys,
            SearchField::MetadataKeys => self.metadata_keys,
        }
    }

    /// Only match against the name
    pub fn name_only() -> Self {
        Self {
            name: 1.0,
            description: 0.0,
            tags: 0.0,
            schema_keys: 0.0,
            metadata_keys: 0.0,
        }
    }
}

/// Similarity between a query and a candidate string
pub trait TextMatcher: Send + Sync {
    /// Score in `[0, 1]`; 1 is an exact match
    fn similarity(&self, query: &str, candidate: &str) -> f64;
}

/// Default matcher: exact, substring, word overlap, then bigram similarity
#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzyMatcher;

impl TextMatcher for FuzzyMatcher {
    fn similarity(&self, query: &str, candidate: &str) -> f64 {
        let query = query.trim().to_lowercase();
        let candidate = candidate.trim().to_lowercase();
        if query.is_empty() || candidate.is_empty() {
            return 0.0;
        }

        if query == candidate {
            return 1.0;
        }

        let mut score: f64 = 0.0;

        if candidate.contains(&query) {
            score = score.max(0.9);
        }

        if query.contains(&candidate) && candidate.chars().count() >= 3 {
            score = score.max(0.75);
        }

        let words: Vec<&str> = query.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect();
        if words.len() > 1 {
            let hits = words.iter().filter(|word| candidate.contains(*word)).count();
            score = score.max(0.8 * hits as f64 / words.len() as f64);
        }

        score.max(dice_coefficient(&query, &candidate) * 0.85)
    }
}

fn bigrams(text: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    chars.windows(2).map(|pair| (pair[0], pair[1])).collect()
}

/// Sørensen-Dice coefficient over character bigrams
fn dice_coefficient(a: &str, b: &str) -> f64 {
    let a = bigrams(a);
    let mut b = bigrams(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let total = a.len() + b.len();
    let mut shared = 0usize;
    for pair in &a {
        if let Some(index) = b.iter().position(|other| other == pair) {
            b.swap_remove(index);
            shared += 1;
        }
    }
    2.0 * shared as f64 / total as f64
}

/// The strings a tool exposes for one field
pub(crate) fn field_values(handle: &ToolHandle, field: SearchField) -> Vec<String> {
    match field {
        SearchField::Name => vec![handle.name().to_string()],
        SearchField::Description if handle.description().is_empty() => Vec::new(),
        SearchField::Description => vec![handle.description().to_string()],
        SearchField::Tags => handle.tags().to_vec(),
        SearchField::SchemaKeys => handle.input_schema().keys(),
        SearchField::MetadataKeys => handle.metadata().keys().cloned().collect(),
    }
}

/// One field that matched a text query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    /// Field that matched
    pub field: SearchField,

    /// The best-matching value in that field
    pub value: String,

    /// Raw similarity of that value
    pub similarity: f64,
}

/// Outcome of matching a query against one tool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextMatch {
    /// Best weighted similarity across fields
    pub score: f64,

    /// Every field at or above the threshold, best first
    pub fields: Vec<FieldMatch>,
}

impl TextMatch {
    /// Whether any field matched
    pub fn is_match(&self) -> bool {
        !self.fields.is_empty()
    }
}

/// Match a query against every weighted field of a tool
pub(crate) fn match_tool(
    matcher: &dyn TextMatcher,
    query: &str,
    handle: &ToolHandle,
    weights: &TextWeights,
    threshold: f64,
) -> TextMatch {
    let mut result = TextMatch::default();
    if query.trim().is_empty() {
        return result;
    }

    for field in SearchField::ALL {
        let weight = weights.weight(field);
        if weight <= 0.0 {
            continue;
        }

        let best = field_values(handle, field)
            .into_iter()
            .map(|value| (matcher.similarity(query, &value), value))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        if let Some((similarity, value)) = best {
            if similarity >= threshold && similarity > 0.0 {
                result.score = result.score.max(similarity * weight);
                result.fields.push(FieldMatch {
                    field,
                    value,
                    similarity,
                });
            }
        }
    }

    result.fields.sort_by(|a, b| {
        (b.similarity * weights.weight(b.field)).total_cmp(&(a.similarity * weights.weight(a.field)))
    });
    result
}

#[cfg(test)]
mod text_tests {
    use super::*;
    use crate::tools::ToolDefinition;
    use serde_json::json;

    #[test]
    fn test_similarity_ladder() {
        let m = FuzzyMatcher;
        assert_eq!(m.similarity("Search", "search"), 1.0);
        assert_eq!(m.similarity("file", "read_file"), 0.9);
        assert!(m.similarity("serch", "search") > 0.5);
        assert!(m.similarity("weather", "database") < 0.3);
        assert_eq!(m.similarity("", "anything"), 0.0);
    }

    #[test]
    fn test_match_tool_prefers_weighted_fields() {
        let handle = crate::tools::ToolHandle::from_fn(
            ToolDefinition::builder("fetch_url")
                .description("Download a web page")
                .input_schema(json!({"url": {"type": "string"}}))
                .tags(["web"])
                .build()
                .unwrap(),
            |params, _ctx| async move { Ok(params) },
        );

        let found = match_tool(&FuzzyMatcher, "web", &handle, &TextWeights::default(), 0.3);
        assert!(found.is_match());
        let fields: Vec<SearchField> = found.fields.iter().map(|f| f.field).collect();
        assert_eq!(fields, vec![SearchField::Description, SearchField::Tags]);

        let found = match_tool(&FuzzyMatcher, "url", &handle, &TextWeights::default(), 0.3);
        assert_eq!(found.fields[0].field, SearchField::Name);

        let found = match_tool(&FuzzyMatcher, "url", &handle, &TextWeights::name_only(), 0.3);
        assert!(found.fields.iter().all(|f| f.field == SearchField::Name));
    }
}
