//! Registry batch execution, budgets, policy and event bubbling

use quiver_core::prelude::*;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn definition(name: &str) -> ToolDefinition {
    ToolDefinition::builder(name)
        .description(format!("{} tool", name))
        .build()
        .expect("valid definition")
}

fn constant(value: Value) -> Arc<dyn ToolHandler> {
    handler_fn(move |_params, _ctx| {
        let value = value.clone();
        async move { Ok(value) }
    })
}

fn failing(message: &'static str) -> Arc<dyn ToolHandler> {
    handler_fn(move |_params, _ctx| async move { Err(anyhow::anyhow!(message)) })
}

fn slow(delay: Duration) -> Arc<dyn ToolHandler> {
    handler_fn(move |_params, _ctx| async move {
        tokio::time::sleep(delay).await;
        Ok(json!("slow done"))
    })
}

#[tokio::test]
async fn test_unknown_tool_settles_not_found() {
    let registry = ToolRegistry::new();
    let results = registry
        .execute(vec![ToolCall::new("nope", json!({})).with_id("c1")], BatchOptions::default())
        .await;

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.call_id, "c1");
    assert_eq!(result.outcome, Outcome::Error);
    assert_eq!(result.error_category, Some(ErrorCategory::NotFound));
}

#[tokio::test]
async fn test_results_follow_call_order() {
    let registry = ToolRegistry::new();
    registry.register(definition("slow"), slow(Duration::from_millis(40)));
    registry.register(definition("fast"), constant(json!("fast done")));

    let calls = vec![
        ToolCall::new("slow", json!({})),
        ToolCall::new("fast", json!({})),
        ToolCall::new("missing", json!({})),
    ];
    let results = registry.execute(calls, BatchOptions::default()).await;

    assert_eq!(results[0].value(), Some(&json!("slow done")));
    assert_eq!(results[1].value(), Some(&json!("fast done")));
    assert_eq!(results[2].error_category, Some(ErrorCategory::NotFound));
}

#[tokio::test]
async fn test_sequential_batch_runs_one_at_a_time() {
    let registry = ToolRegistry::new();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (active.clone(), peak.clone());
    registry.register(
        definition("work"),
        handler_fn(move |_params, _ctx| {
            let (active, peak) = (a.clone(), p.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }),
    );

    let calls = (0..4).map(|_| ToolCall::new("work", json!({}))).collect();
    let results = registry.execute(calls, BatchOptions::new().sequential()).await;

    assert!(results.iter().all(ToolResult::is_success));
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_batch_concurrency_limit() {
    let registry = ToolRegistry::new();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (active.clone(), peak.clone());
    registry.register(
        definition("work"),
        handler_fn(move |_params, _ctx| {
            let (active, peak) = (a.clone(), p.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }),
    );

    let calls = (0..6).map(|_| ToolCall::new("work", json!({}))).collect();
    let results = registry
        .execute(calls, BatchOptions::new().with_concurrency(2))
        .await;

    assert_eq!(results.len(), 6);
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_fail_fast_cancels_running_calls() {
    let registry = ToolRegistry::new();
    registry.register(definition("slow"), slow(Duration::from_secs(5)));
    registry.register(definition("broken"), failing("kaput"));

    let calls = vec![ToolCall::new("slow", json!({})), ToolCall::new("broken", json!({}))];
    let results = registry.execute(calls, BatchOptions::new().fail_fast()).await;

    assert_eq!(results[1].error_category, Some(ErrorCategory::Internal));
    assert!(results[0].is_cancelled());
    assert!(
        results[0]
            .get_error()
            .unwrap()
            .message
            .contains("'broken' failed")
    );
}

#[tokio::test]
async fn test_fail_fast_sequential_skips_remaining() {
    let registry = ToolRegistry::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    registry.register(definition("broken"), failing("kaput"));
    registry.register(
        definition("count"),
        handler_fn(move |_params, _ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }),
    );

    let calls = vec![
        ToolCall::new("count", json!({})),
        ToolCall::new("broken", json!({})),
        ToolCall::new("count", json!({})),
    ];
    let results = registry
        .execute(calls, BatchOptions::new().sequential().fail_fast())
        .await;

    assert!(results[0].is_success());
    assert!(results[1].is_error());
    assert!(results[2].is_cancelled());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_continue_mode_runs_everything() {
    let registry = ToolRegistry::new();
    registry.register(definition("broken"), failing("kaput"));
    registry.register(definition("ok"), constant(json!(true)));

    let calls = vec![ToolCall::new("broken", json!({})), ToolCall::new("ok", json!({}))];
    let results = registry.execute(calls, BatchOptions::new().sequential()).await;

    assert!(results[0].is_error());
    assert!(results[1].is_success());
}

#[tokio::test]
async fn test_call_budget() {
    let registry = ToolRegistry::new().with_budget(BudgetConfig {
        max_calls: Some(2),
        max_duration: None,
    });
    registry.register(definition("ok"), constant(json!(1)));

    let calls = (0..3).map(|_| ToolCall::new("ok", json!({}))).collect();
    let results = registry.execute(calls, BatchOptions::new().sequential()).await;

    assert!(results[0].is_success());
    assert!(results[1].is_success());
    assert_eq!(results[2].error_category, Some(ErrorCategory::BudgetExceeded));
    assert_eq!(registry.budget_usage().calls, 2);

    registry.reset_budget();
    let again = registry
        .execute_call(ToolCall::new("ok", json!({})), ExecuteOptions::default())
        .await;
    assert!(again.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_time_budget_blocks_handler() {
    let registry = ToolRegistry::new().with_budget(BudgetConfig {
        max_calls: None,
        max_duration: Some(Duration::from_secs(1)),
    });
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    registry.register(
        definition("count"),
        handler_fn(move |_params, _ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }),
    );

    let first = registry
        .execute_call(ToolCall::new("count", json!({})), ExecuteOptions::default())
        .await;
    assert!(first.is_success());

    tokio::time::advance(Duration::from_secs(2)).await;
    let late = registry
        .execute_call(ToolCall::new("count", json!({})), ExecuteOptions::default())
        .await;

    assert_eq!(late.error_category, Some(ErrorCategory::BudgetExceeded));
    assert!(late.get_error().unwrap().message.contains("time limit"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_caller_signal_cancels_batch() {
    let registry = ToolRegistry::new();
    registry.register(definition("slow"), slow(Duration::from_secs(5)));

    let controller = AbortController::new();
    let signal = controller.signal();
    let abort = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.abort_with("user left");
    });

    let results = registry
        .execute(
            vec![ToolCall::new("slow", json!({})), ToolCall::new("slow", json!({}))],
            BatchOptions::new().with_signal(signal),
        )
        .await;
    abort.await.unwrap();

    assert!(results.iter().all(ToolResult::is_cancelled));
    assert_eq!(results[0].get_error().unwrap().message, "user left");
}

#[tokio::test]
async fn test_read_only_registry_denies_mutation() {
    let registry = ToolRegistry::new().with_policy(PolicyConfig::read_only());
    registry.register(
        ToolDefinition::builder("delete_file")
            .mutates(true)
            .build()
            .unwrap(),
        constant(json!("deleted")),
    );
    registry.register(definition("read_file"), constant(json!("contents")));

    let results = registry
        .execute(
            vec![
                ToolCall::new("delete_file", json!({})),
                ToolCall::new("read_file", json!({})),
            ],
            BatchOptions::default(),
        )
        .await;

    assert_eq!(results[0].error_category, Some(ErrorCategory::Denied));
    assert!(results[1].is_success());
}

#[tokio::test]
async fn test_registry_hook_applies_to_every_tool() {
    let registry = ToolRegistry::new().with_policy_hook(
        PolicyHooks::new()
            .before(|ctx: &PolicyContext| ctx.tool_name != "forbidden")
            .build(),
    );
    registry.register(definition("forbidden"), constant(json!(1)));
    registry.register(definition("allowed"), constant(json!(2)));

    let denied = registry
        .execute_call(ToolCall::new("forbidden", json!({})), ExecuteOptions::default())
        .await;
    let allowed = registry
        .execute_call(ToolCall::new("allowed", json!({})), ExecuteOptions::default())
        .await;

    assert_eq!(denied.error_category, Some(ErrorCategory::Denied));
    assert!(allowed.is_success());
}

#[tokio::test]
async fn test_events_bubble_to_registry() {
    let registry = ToolRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry
        .events()
        .on_any(move |event| sink.lock().unwrap().push(event.event_type()));

    let handle = registry.register(definition("echo"), constant(json!("hi")));
    registry
        .execute(vec![ToolCall::new("echo", json!({}))], BatchOptions::default())
        .await;
    registry.unregister(handle.id());

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ToolEventType::Registering,
            ToolEventType::Registered,
            ToolEventType::ExecuteStart,
            ToolEventType::ValidateSuccess,
            ToolEventType::ExecuteSuccess,
            ToolEventType::Settled,
            ToolEventType::Unregistered,
        ]
    );
}

#[tokio::test]
async fn test_unregistered_tool_stops_bubbling() {
    let registry = ToolRegistry::new();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    registry.events().on(ToolEventType::Settled, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handle = registry.register(definition("echo"), constant(json!("hi")));
    handle.run(json!({})).await;
    registry.unregister(handle.id());
    handle.run(json!({})).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_config_drives_registry() {
    let config = ConfigBuilder::new()
        .policy(PolicyConfig::permissive())
        .batch(BatchConfig {
            mode: BatchMode::Sequential,
            error_mode: ErrorMode::FailFast,
            concurrency: None,
        })
        .build()
        .unwrap();
    let registry = ToolRegistry::from_config(&config);
    registry.register(
        ToolDefinition::builder("rm_rf").dangerous(true).build().unwrap(),
        constant(json!("gone")),
    );
    registry.register(definition("broken"), failing("kaput"));

    let results = registry
        .execute(
            vec![
                ToolCall::new("rm_rf", json!({})),
                ToolCall::new("broken", json!({})),
                ToolCall::new("rm_rf", json!({})),
            ],
            BatchOptions::default(),
        )
        .await;

    assert!(results[0].is_success());
    assert!(results[1].is_error());
    assert!(results[2].is_cancelled());
}
