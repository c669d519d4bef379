//! Filter predicates over tool handles
//!
//! [`ToolQueryCriteria`] is a boolean tree. Leaves test tags, fuzzy text,
//! schema shape, metadata, or run an arbitrary predicate. A leaf callback that
//! panics counts as non-matching.

use super::text::{TextMatcher, TextWeights, match_tool};
use crate::tools::{ToolHandle, normalize_tags};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

type ToolPredicate = Arc<dyn Fn(&ToolHandle) -> bool + Send + Sync>;
type ValuePredicate = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// Tag filter; all given conditions must hold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagFilter {
    /// At least one of these
    pub any: Vec<String>,
    /// Every one of these
    pub all: Vec<String>,
    /// None of these
    pub none: Vec<String>,
}

/// Schema predicate
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaFilter {
    /// The input schema requires every listed key
    RequiredKeys(Vec<String>),
    /// Every property of the reference schema exists with a compatible type
    Shape(Value),
}

/// Test applied to one metadata entry
#[derive(Clone)]
pub enum MetadataOp {
    /// Key is present
    Has,
    /// Value equals
    Eq(Value),
    /// String contains the substring, or array contains the element
    Contains(Value),
    /// String starts with the prefix
    StartsWith(String),
    /// Number within inclusive bounds
    Range {
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Arbitrary test; receives `None` when the key is absent
    Custom(ValuePredicate),
}

impl std::fmt::Debug for MetadataOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataOp::Has => f.write_str("Has"),
            MetadataOp::Eq(value) => f.debug_tuple("Eq").field(value).finish(),
            MetadataOp::Contains(value) => f.debug_tuple("Contains").field(value).finish(),
            MetadataOp::StartsWith(prefix) => f.debug_tuple("StartsWith").field(prefix).finish(),
            MetadataOp::Range { min, max } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .finish(),
            MetadataOp::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Free-text leaf
#[derive(Debug, Clone, PartialEq)]
pub struct TextQuery {
    /// Query text
    pub query: String,
    /// Per-field weights; a zero weight skips the field
    pub weights: TextWeights,
    /// Minimum similarity; the search config default when unset
    pub threshold: Option<f64>,
}

/// Composable filter over tools
#[derive(Clone)]
pub enum ToolQueryCriteria {
    /// Every child matches (empty matches everything)
    And(Vec<ToolQueryCriteria>),
    /// Some child matches (empty matches nothing)
    Or(Vec<ToolQueryCriteria>),
    /// Child does not match
    Not(Box<ToolQueryCriteria>),
    /// Tag conditions, case-insensitive
    Tags(TagFilter),
    /// Fuzzy text match
    Text(TextQuery),
    /// Schema conditions
    Schema(SchemaFilter),
    /// Metadata condition on one key
    Metadata { key: String, op: MetadataOp },
    /// Whole-tool predicate
    Predicate(ToolPredicate),
}

impl std::fmt::Debug for ToolQueryCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolQueryCriteria::And(children) => f.debug_tuple("And").field(children).finish(),
            ToolQueryCriteria::Or(children) => f.debug_tuple("Or").field(children).finish(),
            ToolQueryCriteria::Not(child) => f.debug_tuple("Not").field(child).finish(),
            ToolQueryCriteria::Tags(filter) => f.debug_tuple("Tags").field(filter).finish(),
            ToolQueryCriteria::Text(query) => f.debug_tuple("Text").field(query).finish(),
            ToolQueryCriteria::Schema(filter) => f.debug_tuple("Schema").field(filter).finish(),
            ToolQueryCriteria::Metadata { key, op } => f
                .debug_struct("Metadata")
                .field("key", key)
                .field("op", op)
                .finish(),
            ToolQueryCriteria::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl ToolQueryCriteria {
    /// Tools with at least one of the tags
    pub fn tags_any<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ToolQueryCriteria::Tags(TagFilter {
            any: normalize_tags(tags),
            ..TagFilter::default()
        })
    }

    /// Tools with every tag
    pub fn tags_all<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ToolQueryCriteria::Tags(TagFilter {
            all: normalize_tags(tags),
            ..TagFilter::default()
        })
    }

    /// Tools with none of the tags
    pub fn tags_none<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ToolQueryCriteria::Tags(TagFilter {
            none: normalize_tags(tags),
            ..TagFilter::default()
        })
    }

    /// Fuzzy text over every field with default weights
    pub fn text(query: impl Into<String>) -> Self {
        ToolQueryCriteria::Text(TextQuery {
            query: query.into(),
            weights: TextWeights::default(),
            threshold: None,
        })
    }

    /// Input schema requires every key
    pub fn required_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolQueryCriteria::Schema(SchemaFilter::RequiredKeys(
            keys.into_iter().map(Into::into).collect(),
        ))
    }

    /// Input schema loosely matches a reference schema
    pub fn schema_shape(reference: Value) -> Self {
        ToolQueryCriteria::Schema(SchemaFilter::Shape(reference))
    }

    /// Metadata condition
    pub fn metadata(key: impl Into<String>, op: MetadataOp) -> Self {
        ToolQueryCriteria::Metadata {
            key: key.into(),
            op,
        }
    }

    /// Metadata key is present
    pub fn has_metadata(key: impl Into<String>) -> Self {
        Self::metadata(key, MetadataOp::Has)
    }

    /// Metadata value equals
    pub fn metadata_eq(key: impl Into<String>, value: Value) -> Self {
        Self::metadata(key, MetadataOp::Eq(value))
    }

    /// Arbitrary predicate over the handle
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&ToolHandle) -> bool + Send + Sync + 'static,
    {
        ToolQueryCriteria::Predicate(Arc::new(f))
    }

    /// Both this and `other`
    pub fn and(self, other: ToolQueryCriteria) -> Self {
        match self {
            ToolQueryCriteria::And(mut children) => {
                children.push(other);
                ToolQueryCriteria::And(children)
            }
            this => ToolQueryCriteria::And(vec![this, other]),
        }
    }

    /// Either this or `other`
    pub fn or(self, other: ToolQueryCriteria) -> Self {
        match self {
            ToolQueryCriteria::Or(mut children) => {
                children.push(other);
                ToolQueryCriteria::Or(children)
            }
            this => ToolQueryCriteria::Or(vec![this, other]),
        }
    }

    /// Evaluate against one handle
    pub fn matches(&self, handle: &ToolHandle, matcher: &dyn TextMatcher, default_threshold: f64) -> bool {
        match self {
            ToolQueryCriteria::And(children) => children
                .iter()
                .all(|child| child.matches(handle, matcher, default_threshold)),
            ToolQueryCriteria::Or(children) => children
                .iter()
                .any(|child| child.matches(handle, matcher, default_threshold)),
            ToolQueryCriteria::Not(child) => !child.matches(handle, matcher, default_threshold),
            ToolQueryCriteria::Tags(filter) => matches_tags(handle, filter),
            ToolQueryCriteria::Text(query) => {
                let threshold = query.threshold.unwrap_or(default_threshold);
                guarded("text", || {
                    match_tool(matcher, &query.query, handle, &query.weights, threshold).is_match()
                })
            }
            ToolQueryCriteria::Schema(filter) => matches_schema(handle, filter),
            ToolQueryCriteria::Metadata { key, op } => {
                matches_metadata(handle.metadata().get(key.as_str()), op)
            }
            ToolQueryCriteria::Predicate(predicate) => guarded("predicate", || predicate(handle)),
        }
    }
}

impl std::ops::Not for ToolQueryCriteria {
    type Output = ToolQueryCriteria;

    fn not(self) -> Self::Output {
        ToolQueryCriteria::Not(Box::new(self))
    }
}

fn guarded<F: FnOnce() -> bool>(kind: &str, f: F) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(matched) => matched,
        Err(_) => {
            tracing::warn!(kind = kind, "Query predicate panicked; treating as non-matching");
            false
        }
    }
}

fn matches_tags(handle: &ToolHandle, filter: &TagFilter) -> bool {
    let has = |tag: &String| handle.definition().has_tag(tag);
    (filter.any.is_empty() || filter.any.iter().any(has))
        && filter.all.iter().all(has)
        && !filter.none.iter().any(has)
}

fn matches_schema(handle: &ToolHandle, filter: &SchemaFilter) -> bool {
    let schema = handle.input_schema();
    match filter {
        SchemaFilter::RequiredKeys(keys) => {
            let required = schema.required_keys();
            keys.iter().all(|key| required.contains(key))
        }
        SchemaFilter::Shape(reference) => {
            let own = schema.to_json();
            let Some(wanted) = reference.get("properties").and_then(Value::as_object) else {
                return true;
            };
            let props = own.get("properties").and_then(Value::as_object);
            wanted.iter().all(|(key, want)| {
                let Some(have) = props.and_then(|p| p.get(key)) else {
                    return false;
                };
                match (want.get("type"), have.get("type")) {
                    (Some(want), Some(have)) => want == have,
                    _ => true,
                }
            })
        }
    }
}

fn matches_metadata(value: Option<&Value>, op: &MetadataOp) -> bool {
    match op {
        MetadataOp::Has => value.is_some(),
        MetadataOp::Eq(expected) => value == Some(expected),
        MetadataOp::Contains(needle) => match value {
            Some(Value::String(text)) => needle.as_str().is_some_and(|n| text.contains(n)),
            Some(Value::Array(items)) => items.contains(needle),
            _ => false,
        },
        MetadataOp::StartsWith(prefix) => value
            .and_then(Value::as_str)
            .is_some_and(|text| text.starts_with(prefix.as_str())),
        MetadataOp::Range { min, max } => value.and_then(Value::as_f64).is_some_and(|n| {
            min.is_none_or(|min| n >= min) && max.is_none_or(|max| n <= max)
        }),
        MetadataOp::Custom(predicate) => guarded("metadata", || predicate(value)),
    }
}

#[cfg(test)]
mod criteria_tests {
    use super::*;
    use crate::search::FuzzyMatcher;
    use crate::tools::ToolDefinition;
    use serde_json::json;

    fn tool(name: &str, tags: &[&str], metadata: Value) -> ToolHandle {
        let mut builder = ToolDefinition::builder(name)
            .input_schema(json!({
                "properties": {"path": {"type": "string"}, "limit": {"type": "integer"}},
                "required": ["path"]
            }))
            .tags(tags.iter().copied());
        if let Value::Object(map) = metadata {
            for (key, value) in map {
                builder = builder.metadata(key, value);
            }
        }
        ToolHandle::from_fn(builder.build().unwrap(), |params, _ctx| async move { Ok(params) })
    }

    fn check(criteria: &ToolQueryCriteria, handle: &ToolHandle) -> bool {
        criteria.matches(handle, &FuzzyMatcher, 0.3)
    }

    #[test]
    fn test_tag_filters_are_case_insensitive() {
        let handle = tool("read", &["FS", "readonly"], json!({}));
        assert!(check(&ToolQueryCriteria::tags_any(["fs", "web"]), &handle));
        assert!(!check(&ToolQueryCriteria::tags_all(["fs", "web"]), &handle));
        assert!(!check(&ToolQueryCriteria::tags_none(["READONLY"]), &handle));
    }

    #[test]
    fn test_boolean_composition() {
        let handle = tool("read", &["fs"], json!({"owner": "ops"}));
        let criteria = ToolQueryCriteria::tags_any(["fs"])
            .and(!ToolQueryCriteria::metadata_eq("owner", json!("dev")));
        assert!(check(&criteria, &handle));

        let criteria = ToolQueryCriteria::tags_any(["web"]).or(ToolQueryCriteria::has_metadata("owner"));
        assert!(check(&criteria, &handle));
        assert!(!check(&ToolQueryCriteria::Or(vec![]), &handle));
        assert!(check(&ToolQueryCriteria::And(vec![]), &handle));
    }

    #[test]
    fn test_schema_predicates() {
        let handle = tool("read", &[], json!({}));
        assert!(check(&ToolQueryCriteria::required_keys(["path"]), &handle));
        assert!(!check(&ToolQueryCriteria::required_keys(["path", "limit"]), &handle));

        let shape = json!({"properties": {"limit": {"type": "integer"}}});
        assert!(check(&ToolQueryCriteria::schema_shape(shape), &handle));
        let shape = json!({"properties": {"limit": {"type": "string"}}});
        assert!(!check(&ToolQueryCriteria::schema_shape(shape), &handle));
    }

    #[test]
    fn test_metadata_ops() {
        let handle = tool(
            "read",
            &[],
            json!({"owner": "platform-team", "scopes": ["fs", "net"], "cost": 3}),
        );
        let op = |key: &str, op: MetadataOp| check(&ToolQueryCriteria::metadata(key, op), &handle);

        assert!(op("owner", MetadataOp::Contains(json!("team"))));
        assert!(op("scopes", MetadataOp::Contains(json!("net"))));
        assert!(!op("scopes", MetadataOp::Contains(json!("db"))));
        assert!(op("owner", MetadataOp::StartsWith("platform".into())));
        assert!(op("cost", MetadataOp::Range { min: Some(1.0), max: Some(3.0) }));
        assert!(!op("cost", MetadataOp::Range { min: Some(4.0), max: None }));
        assert!(op("missing", MetadataOp::Custom(Arc::new(|v| v.is_none()))));
    }

    #[test]
    fn test_panicking_predicate_is_non_matching() {
        let handle = tool("read", &[], json!({}));
        let criteria = ToolQueryCriteria::predicate(|_| panic!("bad predicate"));
        assert!(!check(&criteria, &handle));

        let criteria = ToolQueryCriteria::metadata(
            "owner",
            MetadataOp::Custom(Arc::new(|_| panic!("bad metadata predicate"))),
        );
        assert!(!check(&criteria, &handle));
    }

    #[test]
    fn test_text_leaf() {
        let handle = tool("read_file", &[], json!({}));
        assert!(check(&ToolQueryCriteria::text("file"), &handle));
        assert!(!check(&ToolQueryCriteria::text("weather forecast"), &handle));
    }
}
