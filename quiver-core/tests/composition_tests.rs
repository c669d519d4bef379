//! Combinators over real handles

use quiver_core::prelude::*;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn parse_number() -> ToolHandle {
    let definition = ToolDefinition::builder("parse_number")
        .description("Parse a string into a number")
        .input_schema(json!({
            "properties": {"str": {"type": "string"}},
            "required": ["str"]
        }))
        .tags(["math"])
        .build()
        .unwrap();
    ToolHandle::from_fn(definition, |params, _ctx| async move {
        let text = params["str"].as_str().unwrap_or_default();
        let value: f64 = text
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("'{}' is not a number", text))?;
        Ok(json!({"value": value}))
    })
}

fn double() -> ToolHandle {
    let definition = ToolDefinition::builder("double")
        .description("Double a number")
        .input_schema(json!({
            "properties": {"value": {"type": "number"}},
            "required": ["value"]
        }))
        .build()
        .unwrap();
    ToolHandle::from_fn(definition, |params, _ctx| async move {
        let value = params["value"].as_f64().unwrap_or_default();
        Ok(json!({"value": value * 2.0}))
    })
}

fn greet() -> ToolHandle {
    let definition = ToolDefinition::builder("greet")
        .input_schema(json!({
            "properties": {
                "greeting": {"type": "string"},
                "name": {"type": "string"}
            },
            "required": ["greeting", "name"]
        }))
        .build()
        .unwrap();
    ToolHandle::from_fn(definition, |params, _ctx| async move {
        Ok(json!(format!(
            "{}, {}",
            params["greeting"].as_str().unwrap_or_default(),
            params["name"].as_str().unwrap_or_default()
        )))
    })
}

/// Fails until it has been called `succeed_on` times
fn flaky(succeed_on: u32, calls: Arc<AtomicU32>) -> ToolHandle {
    let definition = ToolDefinition::builder("flaky").build().unwrap();
    ToolHandle::from_fn(definition, move |_params, _ctx| {
        let calls = calls.clone();
        async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < succeed_on {
                anyhow::bail!("attempt {} failed", attempt);
            }
            Ok(json!({"attempt": attempt}))
        }
    })
}

fn record_events(handle: &ToolHandle) -> Arc<Mutex<Vec<ToolEventKind>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    handle.on_any(move |event| sink.lock().unwrap().push(event.kind.clone()));
    events
}

#[tokio::test]
async fn test_pipe_feeds_outputs_forward() {
    let tool = pipe(vec![parse_number(), double()], CompositionOptions::named("double_str")).unwrap();
    assert_eq!(tool.name(), "double_str");
    assert_eq!(tool.input_schema().keys(), vec!["str"]);

    let result = tool.run(json!({"str": "21"})).await;
    assert_eq!(result.value(), Some(&json!({"value": 42.0})));
}

#[tokio::test]
async fn test_pipe_default_name_and_step_events() {
    let tool = pipe(vec![parse_number(), double()], CompositionOptions::default()).unwrap();
    assert_eq!(tool.name(), "pipe(parse_number, double)");

    let events = record_events(&tool);
    tool.run(json!({"str": "2"})).await;

    let steps: Vec<ToolEventKind> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|kind| {
            matches!(
                kind,
                ToolEventKind::StepStart { .. } | ToolEventKind::StepComplete { .. }
            )
        })
        .cloned()
        .collect();
    assert_eq!(
        steps,
        vec![
            ToolEventKind::StepStart { index: 0, name: "parse_number".into() },
            ToolEventKind::StepComplete { index: 0, name: "parse_number".into() },
            ToolEventKind::StepStart { index: 1, name: "double".into() },
            ToolEventKind::StepComplete { index: 1, name: "double".into() },
        ]
    );
}

#[tokio::test]
async fn test_pipe_step_failure_names_step() {
    let tool = pipe(vec![parse_number(), double()], CompositionOptions::default()).unwrap();
    let result = tool.run(json!({"str": "abc"})).await;

    let error = result.get_error().unwrap();
    assert_eq!(error.category, ErrorCategory::Internal);
    assert_eq!(error.code.as_deref(), Some("STEP_FAILED"));
    assert!(error.message.starts_with("Step 0 (parse_number) failed:"));
    assert!(error.message.contains("'abc' is not a number"));
    let details = error.details.as_ref().unwrap();
    assert_eq!(details["stepIndex"], json!(0));
    assert_eq!(details["stepName"], json!("parse_number"));
}

#[tokio::test]
async fn test_pipe_rejects_invalid_input_up_front() {
    let tool = pipe(vec![parse_number(), double()], CompositionOptions::default()).unwrap();
    let result = tool.run(json!({"str": 5})).await;
    assert_eq!(result.error_category, Some(ErrorCategory::Validation));
}

#[test]
fn test_empty_compositions_fail_at_construction() {
    assert!(pipe(vec![], CompositionOptions::default()).is_err());
    assert!(parallel(vec![], CompositionOptions::default()).is_err());
}

#[tokio::test]
async fn test_compose_runs_right_to_left() {
    let tool = compose(vec![double(), parse_number()], CompositionOptions::default()).unwrap();
    assert_eq!(tool.name(), "compose(double, parse_number)");

    let result = tool.run(json!({"str": "4"})).await;
    assert_eq!(result.value(), Some(&json!({"value": 8.0})));
}

#[tokio::test]
async fn test_bind_fixes_arguments() {
    let tool = bind(greet(), json!({"greeting": "Hello"}), CompositionOptions::default()).unwrap();
    assert_eq!(tool.input_schema().keys(), vec!["name"]);

    let output = tool
        .invoke(json!({"name": "Ada"}), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(output, json!("Hello, Ada"));

    let output = tool
        .invoke(json!({"name": "Ada", "greeting": "Bye"}), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(output, json!("Hello, Ada"));
}

#[test]
fn test_bind_unknown_keys_fail_at_construction() {
    let err = bind(
        greet(),
        json!({"zeta": 1, "alpha": 2, "name": "x"}),
        CompositionOptions::default(),
    )
    .unwrap_err();
    match err {
        QuiverError::UnknownKeys { keys } => assert_eq!(keys, vec!["alpha", "zeta"]),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_retry_until_success() {
    let calls = Arc::new(AtomicU32::new(0));
    let tool = retry(flaky(3, calls.clone()), RetryOptions::attempts(3)).unwrap();
    let events = record_events(&tool);

    let result = tool.run(json!({})).await;
    assert_eq!(result.value(), Some(&json!({"attempt": 3})));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let retries = events
        .lock()
        .unwrap()
        .iter()
        .filter(|kind| matches!(kind, ToolEventKind::Retry { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_retry_returns_last_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let tool = retry(flaky(u32::MAX, calls.clone()), RetryOptions::attempts(2)).unwrap();

    let result = tool.run(json!({})).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.get_error().unwrap().message, "attempt 2 failed");
}

#[tokio::test]
async fn test_retry_veto_and_observer() {
    let calls = Arc::new(AtomicU32::new(0));
    let observed = Arc::new(AtomicUsize::new(0));
    let seen = observed.clone();
    let options = RetryOptions::attempts(5)
        .with_should_retry(|_error, attempt| attempt < 2)
        .with_on_retry(move |_error, _attempt, _delay| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    let tool = retry(flaky(u32::MAX, calls.clone()), options).unwrap();

    let result = tool.run(json!({})).await;
    assert!(result.is_error());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_abort_during_wait() {
    let calls = Arc::new(AtomicU32::new(0));
    let tool = retry(
        flaky(u32::MAX, calls.clone()),
        RetryOptions::attempts(3).with_delay(Duration::from_secs(5)),
    )
    .unwrap();

    let controller = AbortController::new();
    let options = ExecuteOptions::new().with_signal(controller.signal());
    let abort = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.abort_with("stop");
    });

    let result = tool.execute(ToolCall::new("flaky", json!({})), options).await;
    abort.await.unwrap();

    assert!(result.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_retry_requires_an_attempt() {
    assert!(retry(double(), RetryOptions::attempts(0)).is_err());
}

#[tokio::test]
async fn test_when_routes_by_predicate() {
    let shout = ToolHandle::from_fn(
        ToolDefinition::builder("shout").build().unwrap(),
        |params, _ctx| async move {
            Ok(json!(params["text"].as_str().unwrap_or_default().to_uppercase()))
        },
    );
    let whisper = ToolHandle::from_fn(
        ToolDefinition::builder("whisper").build().unwrap(),
        |params, _ctx| async move {
            Ok(json!(params["text"].as_str().unwrap_or_default().to_lowercase()))
        },
    );
    let loud = |params: &Value| params["loud"].as_bool().unwrap_or(false);

    let tool = when(loud, shout.clone(), Some(whisper), CompositionOptions::default()).unwrap();
    assert_eq!(
        tool.invoke(json!({"text": "Hi", "loud": true}), ExecuteOptions::default())
            .await
            .unwrap(),
        json!("HI")
    );
    assert_eq!(
        tool.invoke(json!({"text": "Hi"}), ExecuteOptions::default())
            .await
            .unwrap(),
        json!("hi")
    );

    let passthrough = when(loud, shout, None, CompositionOptions::default()).unwrap();
    assert_eq!(
        passthrough
            .invoke(json!({"text": "Hi"}), ExecuteOptions::default())
            .await
            .unwrap(),
        json!({"text": "Hi"})
    );
}

#[tokio::test]
async fn test_tap_observes_output() {
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let tool = tap(
        double(),
        move |output: &Value| {
            *sink.lock().unwrap() = Some(output.clone());
            Ok(())
        },
        CompositionOptions::default(),
    )
    .unwrap();

    let output = tool
        .invoke(json!({"value": 3}), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(output, json!({"value": 6.0}));
    assert_eq!(*seen.lock().unwrap(), Some(json!({"value": 6.0})));
}

#[tokio::test]
async fn test_tap_error_fails_but_isolated_does_not() {
    let strict = tap(
        double(),
        |_output: &Value| anyhow::bail!("audit log unavailable"),
        CompositionOptions::default(),
    )
    .unwrap();
    let result = strict.run(json!({"value": 1})).await;
    assert_eq!(result.get_error().unwrap().message, "audit log unavailable");

    let lenient = tap_isolated(
        double(),
        |_output: &Value| anyhow::bail!("audit log unavailable"),
        CompositionOptions::default(),
    )
    .unwrap();
    let result = lenient.run(json!({"value": 1})).await;
    assert_eq!(result.value(), Some(&json!({"value": 2.0})));
}

#[tokio::test]
async fn test_parallel_collects_in_order() {
    let slow_double = ToolHandle::from_fn(
        ToolDefinition::builder("slow_double").build().unwrap(),
        |params, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(json!(params["n"].as_i64().unwrap_or_default() * 2))
        },
    );
    let square = ToolHandle::from_fn(
        ToolDefinition::builder("square").build().unwrap(),
        |params, _ctx| async move {
            let n = params["n"].as_i64().unwrap_or_default();
            Ok(json!(n * n))
        },
    );

    let tool = parallel(vec![slow_double, square], CompositionOptions::default()).unwrap();
    let output = tool
        .invoke(json!({"n": 5}), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(output, json!([10, 25]));
}

#[tokio::test]
async fn test_parallel_reports_first_failure() {
    let tool = parallel(vec![double(), parse_number()], CompositionOptions::default()).unwrap();
    let result = tool.run(json!({"value": 1})).await;

    let error = result.get_error().unwrap();
    assert!(error.message.starts_with("Step 1 (parse_number) failed:"));
}

#[tokio::test]
async fn test_pre_and_postprocess() {
    let from_text = preprocess(
        double(),
        |params: Value| {
            let text = params["text"].as_str().unwrap_or("0").to_string();
            Ok(json!({"value": text.parse::<f64>()?}))
        },
        CompositionOptions::named("double_text"),
    )
    .unwrap();
    assert_eq!(
        from_text
            .invoke(json!({"text": "7"}), ExecuteOptions::default())
            .await
            .unwrap(),
        json!({"value": 14.0})
    );

    let unwrapped = postprocess(
        double(),
        |output: Value| Ok(output["value"].clone()),
        CompositionOptions::default(),
    )
    .unwrap();
    assert_eq!(unwrapped.input_schema().keys(), vec!["value"]);
    assert_eq!(
        unwrapped
            .invoke(json!({"value": 4}), ExecuteOptions::default())
            .await
            .unwrap(),
        json!(8.0)
    );
}

#[tokio::test]
async fn test_wrappers_keep_output_contract() {
    let definition = ToolDefinition::builder("lookup")
        .output_schema(json!({"type": "object", "required": ["value"]}))
        .build()
        .unwrap();
    let lookup = ToolHandle::from_fn(definition, |_params, _ctx| async move {
        Ok(json!({"other": 1}))
    });

    let retried = retry(lookup.clone(), RetryOptions::attempts(2)).unwrap();
    assert!(retried.definition().output_schema().is_some());
    let result = retried.run(json!({})).await;
    assert!(result.is_success());
    assert!(!result.output_validation.unwrap().valid);

    let observed = tap(lookup.clone(), |_output: &Value| Ok(()), CompositionOptions::default()).unwrap();
    assert!(observed.definition().output_schema().is_some());

    let reshaped = postprocess(lookup, |output: Value| Ok(output), CompositionOptions::default()).unwrap();
    assert!(reshaped.definition().output_schema().is_none());
    assert!(reshaped.run(json!({})).await.output_validation.is_none());
}

#[tokio::test]
async fn test_composed_tools_compose_further() {
    let calls = Arc::new(AtomicU32::new(0));
    let steady = retry(flaky(2, calls), RetryOptions::attempts(2)).unwrap();
    let tool = pipe(
        vec![
            steady,
            postprocess(
                double(),
                |output: Value| Ok(json!({"doubled": output["value"]})),
                CompositionOptions::default(),
            )
            .unwrap(),
        ],
        CompositionOptions::default(),
    )
    .unwrap();

    // flaky answers {"attempt": 2}, which double rejects
    let result = tool.run(json!({})).await;
    let error = result.get_error().unwrap();
    assert_eq!(error.category, ErrorCategory::Validation);
    assert!(error.message.starts_with("Step 1"));
}

#[tokio::test]
async fn test_registered_composition_keeps_dangerous_flag() {
    let wipe = ToolHandle::from_fn(
        ToolDefinition::builder("wipe").dangerous(true).build().unwrap(),
        |_params, _ctx| async move { Ok(json!("wiped")) },
    );
    let composed = pipe(vec![wipe, double()], CompositionOptions::default()).unwrap();

    let registry = ToolRegistry::new();
    let handle = registry.register_handle(composed);
    let result = handle.run(json!({})).await;
    assert_eq!(result.error_category, Some(ErrorCategory::Denied));
}
