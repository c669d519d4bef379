//! Discovery through the registry: filters, ranking, pagination and embeddings

use async_trait::async_trait;
use quiver_core::prelude::*;
use quiver_core::search::{ScoreBreakdown, SearchField};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    add(&registry, "web_search", "Search the web", &["web", "search"]);
    add(&registry, "web_fetch", "Fetch a URL", &["web", "http"]);
    add(&registry, "file_read", "Read a file from disk", &["fs"]);
    add(&registry, "calculator", "Do arithmetic", &["math"]);
    registry
}

fn add(registry: &ToolRegistry, name: &str, description: &str, tags: &[&str]) {
    let definition = ToolDefinition::builder(name)
        .description(description)
        .tags(tags.iter().copied())
        .build()
        .unwrap();
    registry.register(definition, handler_fn(|_params, _ctx| async move { Ok(json!(null)) }));
}

fn names(hits: &[SearchHit]) -> Vec<&str> {
    hits.iter().map(SearchHit::name).collect()
}

/// Three concept axes, counted by keyword
struct KeywordEmbedder {
    calls: AtomicUsize,
}

const AXES: [&[&str]; 3] = [
    &["web", "url", "http", "internet"],
    &["math", "arithmetic", "calculator"],
    &["file", "disk", "fs"],
];

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let text = text.to_lowercase();
                AXES.iter()
                    .map(|words| words.iter().filter(|word| text.contains(*word)).count() as f32)
                    .collect()
            })
            .collect())
    }
}

#[tokio::test]
async fn test_tag_search_ties_break_by_name() {
    let hits = registry()
        .search(&ToolSearchOptions::default().with_tags(["web"]))
        .await;

    assert_eq!(names(&hits), vec!["web_fetch", "web_search"]);
    assert!(hits.iter().all(|hit| hit.reasons == vec!["tag:web"]));
    assert!(hits.iter().all(|hit| hit.matches.is_none()));
}

#[tokio::test]
async fn test_tag_boost_reorders() {
    let hits = registry()
        .search(
            &ToolSearchOptions::default()
                .with_tags(["web", "search"])
                .with_tag_boost("search", 0.5),
        )
        .await;

    assert_eq!(names(&hits), vec!["web_search", "web_fetch"]);
    assert_eq!(hits[0].score, 2.5);
    assert_eq!(hits[1].score, 1.0);
}

#[tokio::test]
async fn test_text_query_with_explain() {
    let hits = registry()
        .search(&ToolSearchOptions::query("calculator").explain())
        .await;

    let top = &hits[0];
    assert_eq!(top.name(), "calculator");
    assert_eq!(top.score, 1.0);
    assert_eq!(top.reasons[0], "text:name");

    let detail = top.matches.as_ref().unwrap();
    assert_eq!(detail.fields[0], SearchField::Name);
    assert_eq!(detail.text_score, 1.0);
    assert_eq!(detail.tag_score, 0.0);
}

#[tokio::test]
async fn test_no_signal_keeps_everything_in_name_order() {
    let hits = registry().search(&ToolSearchOptions::default()).await;
    assert_eq!(
        names(&hits),
        vec!["calculator", "file_read", "web_fetch", "web_search"]
    );
}

#[tokio::test]
async fn test_tie_break_none_keeps_registration_order() {
    let hits = registry()
        .search(&ToolSearchOptions::default().with_tie_break(TieBreak::None))
        .await;
    assert_eq!(
        names(&hits),
        vec!["web_search", "web_fetch", "file_read", "calculator"]
    );
}

#[tokio::test]
async fn test_pagination() {
    let registry = registry();
    let page = registry
        .search(&ToolSearchOptions::default().page(1, 2))
        .await;
    assert_eq!(names(&page), vec!["file_read", "web_fetch"]);

    let past_end = registry
        .search(&ToolSearchOptions::default().page(10, 2))
        .await;
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn test_min_score() {
    let hits = registry()
        .search(
            &ToolSearchOptions::default()
                .with_tags(["web", "http"])
                .with_min_score(1.5),
        )
        .await;
    assert_eq!(names(&hits), vec!["web_fetch"]);
}

#[tokio::test]
async fn test_filter_runs_before_scoring() {
    let hits = registry()
        .search(&ToolSearchOptions::default().with_filter(ToolQueryCriteria::tags_none(["web"])))
        .await;
    assert_eq!(names(&hits), vec!["calculator", "file_read"]);
}

#[tokio::test]
async fn test_ranker_overrides_and_excludes() {
    let ranker = |handle: &ToolHandle, _query: Option<&str>, _score: &ScoreBreakdown| {
        match handle.name() {
            "file_read" => RankAdjustment::Exclude,
            "calculator" => RankAdjustment::Override(10.0),
            _ => RankAdjustment::Keep,
        }
    };
    let hits = registry()
        .search(&ToolSearchOptions::default().with_ranker(Arc::new(ranker)))
        .await;

    assert_eq!(names(&hits), vec!["calculator", "web_fetch", "web_search"]);
    assert_eq!(hits[0].score, 10.0);
    assert!(hits[0].reasons.contains(&"custom".to_string()));
}

#[tokio::test]
async fn test_result_shapes() {
    let registry = registry();
    let options = ToolSearchOptions::default().with_tags(["fs"]);

    let by_name = registry.search(&options.clone().select(ResultShape::Name)).await;
    assert!(matches!(by_name[0].tool, SelectedTool::Name(ref name) if name == "file_read"));
    assert!(by_name[0].tool.as_handle().is_none());

    let summaries = registry.search(&options.clone().select(ResultShape::Summary)).await;
    match summaries[0].tool {
        SelectedTool::Summary(ref summary) => {
            assert_eq!(summary.description, "Read a file from disk");
            assert_eq!(summary.tags, vec!["fs"]);
        }
        ref other => panic!("unexpected shape: {:?}", other),
    }

    let definitions = registry.search(&options.clone().select(ResultShape::Definition)).await;
    assert!(matches!(definitions[0].tool, SelectedTool::Definition(ref record) if record.name == "file_read"));

    let handles = registry.search(&options).await;
    let handle = handles[0].tool.as_handle().unwrap();
    assert!(handle.run(json!({})).await.is_success());
}

#[test]
fn test_query_combines_criteria() {
    let registry = registry();
    let criteria = ToolQueryCriteria::tags_any(["web"]).and(!ToolQueryCriteria::text("fetch"));
    let found: Vec<String> = registry
        .query(&criteria)
        .iter()
        .map(|handle| handle.name().to_string())
        .collect();
    assert_eq!(found, vec!["web_search"]);
}

#[tokio::test]
async fn test_embedding_search_and_cache() {
    let embedder = Arc::new(KeywordEmbedder {
        calls: AtomicUsize::new(0),
    });
    let registry = ToolRegistry::new().with_embedder(embedder.clone());
    add(&registry, "web_search", "Search the web", &["web", "search"]);
    add(&registry, "web_fetch", "Fetch a URL", &["web", "http"]);
    add(&registry, "file_read", "Read a file from disk", &["fs"]);
    add(&registry, "calculator", "Do arithmetic", &["math"]);

    let options = ToolSearchOptions::query("internet");
    let hits = registry.search(&options).await;
    assert_eq!(names(&hits), vec!["web_fetch", "web_search"]);
    assert!(hits.iter().all(|hit| hit.reasons[0].starts_with("embedding:")));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 5);

    registry.search(&options).await;
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 5);

    registry.reindex();
    registry.search(&options).await;
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 9);

    let without = registry.search(&options.clone().without_embeddings()).await;
    assert!(without.is_empty());
}
