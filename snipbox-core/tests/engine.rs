//! End-to-end tests for the snippet engine against the real boundary.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use snipbox_core::{EngineConfig, Inputs, Language, OutputMode, SnippetEngine};

fn inputs(value: Value) -> Inputs {
    match value {
        Value::Object(map) => map,
        other => panic!("inputs must be an object, got {other}"),
    }
}

fn engine() -> SnippetEngine {
    SnippetEngine::isolated(EngineConfig::default())
}

const JS: Language = Language::JavaScript;

#[tokio::test]
async fn returns_value_computed_from_inputs() {
    let engine = engine();
    let products = inputs(json!({
        "products": [
            {"name": "apple", "price": 1.5},
            {"name": "pear", "price": 2.0},
            {"name": "plum", "price": 0.75}
        ]
    }));

    let result = engine
        .evaluate("return inputs.products.length", &JS, &products, None)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.return_value, Some(json!(3)));
    assert_eq!(result.output, None);
    assert_eq!(result.error, None);
}

#[tokio::test]
async fn infinite_loop_times_out_and_context_stays_usable() {
    let engine = engine();
    // Build the context first so the 100ms budgets cover only the snippets.
    engine.evaluate("return 0", &JS, &Inputs::new(), None).await;

    let hung = engine.evaluate("while(true){}", &JS, &Inputs::new(), Some(100)).await;
    assert!(!hung.success);
    assert_eq!(hung.error.as_deref(), Some("timed out after 100ms"));

    let next = engine.evaluate("return 1", &JS, &Inputs::new(), Some(100)).await;
    assert!(next.success, "{:?}", next.error);
    assert_eq!(next.return_value, Some(json!(1)));

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.timeouts, 1);
    assert_eq!(snapshot.runtime_errors, 0);
    assert_eq!(snapshot.contexts_created, 1);
}

#[tokio::test]
async fn calls_queued_behind_a_hung_snippet_still_complete() {
    let engine = Arc::new(engine());
    engine.evaluate("return 0", &JS, &Inputs::new(), None).await;

    let hung = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.evaluate("for (;;) {}", &JS, &Inputs::new(), Some(100)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let queued = engine.evaluate("return 'queued'", &JS, &Inputs::new(), Some(300)).await;

    assert_eq!(hung.await.unwrap().error.as_deref(), Some("timed out after 100ms"));
    assert_eq!(queued.return_value, Some(json!("queued")));
}

#[tokio::test]
async fn empty_code_short_circuits() {
    let engine = engine();

    for code in ["", "   ", "\n\t"] {
        let result = engine.evaluate(code, &JS, &Inputs::new(), None).await;
        assert!(result.success);
        assert_eq!(result.output, None);
        assert_eq!(result.return_value, None);
    }

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.boundary_dispatches, 0);
    assert_eq!(snapshot.contexts_created, 0);
    assert_eq!(snapshot.short_circuits, 3);
}

#[tokio::test]
async fn unsupported_language_is_not_dispatched() {
    let engine = engine();

    let result = engine
        .evaluate("print('hi')", &Language::Python, &Inputs::new(), None)
        .await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("language not supported: python"));

    let result = engine
        .evaluate("let x: number = 1", &Language::from("typescript"), &Inputs::new(), None)
        .await;
    assert_eq!(result.error.as_deref(), Some("language not supported: typescript"));

    assert_eq!(engine.metrics().snapshot().boundary_dispatches, 0);
}

#[tokio::test]
async fn html_document_is_passed_through() {
    let engine = engine();
    let document = "<!DOCTYPE html>\n<html><body><p>static</p></body></html>";

    let result = engine.evaluate(document, &Language::Html, &Inputs::new(), None).await;
    assert!(result.success);
    assert_eq!(result.output.as_deref(), Some(document));
    assert_eq!(result.markup_output.as_deref(), Some(document));
    assert_eq!(engine.metrics().snapshot().boundary_dispatches, 0);
}

#[tokio::test]
async fn html_fragment_script_is_evaluated_and_promoted() {
    let engine = engine();

    let evaluation = engine
        .evaluate_with_mode(
            "console.log('<ul>' + inputs.items.map(i => '<li>' + i + '</li>').join('') + '</ul>')",
            &Language::Html,
            &inputs(json!({"items": ["a", "b"]})),
            None,
            OutputMode::Console,
        )
        .await;

    assert!(evaluation.adopt_markup);
    assert_eq!(
        evaluation.result.markup_output.as_deref(),
        Some("<ul><li>a</li><li>b</li></ul>")
    );
}

#[tokio::test]
async fn div_output_is_promoted_to_markup() {
    let engine = engine();

    let evaluation = engine
        .evaluate_with_mode("console.log('<div>hi</div>')", &JS, &Inputs::new(), None, OutputMode::Console)
        .await;

    assert!(evaluation.result.success);
    assert!(evaluation.adopt_markup);
    assert_eq!(evaluation.result.output.as_deref(), Some("<div>hi</div>"));
    assert_eq!(evaluation.result.markup_output.as_deref(), Some("<div>hi</div>"));

    let plain = engine
        .evaluate_with_mode("console.log('a < b > c')", &JS, &Inputs::new(), None, OutputMode::Console)
        .await;
    assert!(!plain.adopt_markup);
    assert_eq!(plain.result.markup_output, None);
}

#[tokio::test]
async fn logs_keep_call_order() {
    let engine = engine();

    let result = engine
        .evaluate(
            "console.log('a'); console.warn('b', 2); console.error({k: 1}); console.info(true)",
            &JS,
            &Inputs::new(),
            None,
        )
        .await;

    assert_eq!(result.output.as_deref(), Some("a\nb 2\n{\n  \"k\": 1\n}\ntrue"));
}

#[tokio::test]
async fn thrown_errors_keep_partial_output() {
    let engine = engine();

    let result = engine
        .evaluate("console.log('before'); throw new RangeError('bad')", &JS, &Inputs::new(), None)
        .await;
    assert!(!result.success);
    assert_eq!(result.output.as_deref(), Some("before"));
    assert_eq!(result.error.as_deref(), Some("RangeError: bad"));

    let result = engine.evaluate("throw 'plain'", &JS, &Inputs::new(), None).await;
    assert_eq!(result.error.as_deref(), Some("Error: plain"));

    assert_eq!(engine.metrics().snapshot().runtime_errors, 2);
}

#[tokio::test]
async fn calls_are_stateless() {
    let engine = engine();

    let first = engine
        .evaluate("globalThis.leak = 42; return leak", &JS, &Inputs::new(), None)
        .await;
    assert_eq!(first.return_value, Some(json!(42)));

    let second = engine
        .evaluate("return typeof globalThis.leak", &JS, &Inputs::new(), None)
        .await;
    assert_eq!(second.return_value, Some(json!("undefined")));
}

#[tokio::test]
async fn snippet_cannot_mutate_host_inputs() {
    let engine = engine();
    let bundle = inputs(json!({"list": [1, 2, 3]}));

    let result = engine
        .evaluate("inputs.list.push(4); return inputs.list.length", &JS, &bundle, None)
        .await;
    assert_eq!(result.return_value, Some(json!(4)));
    assert_eq!(bundle["list"], json!([1, 2, 3]));
}

#[tokio::test]
async fn unserializable_return_value_degrades() {
    let engine = engine();

    let result = engine
        .evaluate("return function named() {}", &JS, &Inputs::new(), None)
        .await;
    assert!(result.success);
    assert!(matches!(result.return_value, Some(Value::String(_))));

    let result = engine.evaluate("return undefined", &JS, &Inputs::new(), None).await;
    assert!(result.success);
    assert_eq!(result.return_value, None);

    assert_eq!(engine.metrics().snapshot().degraded_return_values, 1);
}

#[tokio::test]
async fn concurrent_calls_share_one_context() {
    let engine = Arc::new(engine());

    let mut tasks = Vec::new();
    for n in 0..8u64 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            let bundle = inputs(json!({ "n": n }));
            engine.evaluate("return inputs.n * 10", &JS, &bundle, None).await
        }));
    }
    for (n, task) in tasks.into_iter().enumerate() {
        let result = task.await.unwrap();
        assert_eq!(result.return_value, Some(json!(n as u64 * 10)));
    }

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.contexts_created, 1);
    assert_eq!(snapshot.boundary_dispatches, 8);
}

#[tokio::test]
async fn teardown_recreates_context_on_next_call() {
    let engine = Arc::new(engine());

    let warm = engine.evaluate("return 1", &JS, &Inputs::new(), None).await;
    assert!(warm.success);

    let in_flight = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.evaluate("while(true){}", &JS, &Inputs::new(), Some(300)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.teardown().await;

    let orphaned = in_flight.await.unwrap();
    assert_eq!(orphaned.error.as_deref(), Some("timed out after 300ms"));

    let fresh = engine.evaluate("return 'again'", &JS, &Inputs::new(), None).await;
    assert_eq!(fresh.return_value, Some(json!("again")));
    assert_eq!(engine.metrics().snapshot().contexts_created, 2);
}

#[tokio::test]
async fn direct_and_isolated_results_match() {
    let isolated = engine();
    let direct = SnippetEngine::direct(EngineConfig::default());
    let bundle = inputs(json!({"xs": [3, 1, 2]}));
    let code = "console.log('sorting', inputs.xs.length); return inputs.xs.slice().sort()";

    let a = isolated.evaluate(code, &JS, &bundle, None).await;
    let b = direct.evaluate(code, &JS, &bundle, None).await;

    assert_eq!(a.success, b.success);
    assert_eq!(a.output, b.output);
    assert_eq!(a.return_value, b.return_value);
    assert_eq!(a.return_value, Some(json!([1, 2, 3])));

    let a = isolated.evaluate("undefinedName()", &JS, &Inputs::new(), None).await;
    let b = direct.evaluate("undefinedName()", &JS, &Inputs::new(), None).await;
    assert_eq!(a.error, b.error);
    assert!(a.error.unwrap().starts_with("ReferenceError: "));
}

#[tokio::test]
async fn result_serializes_for_persistence() {
    let engine = engine();
    let result = engine
        .evaluate("console.log('x'); return {ok: true}", &JS, &Inputs::new(), None)
        .await;

    let mut value = serde_json::to_value(&result).unwrap();
    assert!(value["executedAt"].is_string());
    value.as_object_mut().unwrap().remove("executedAt");
    assert_eq!(
        value,
        json!({
            "success": true,
            "output": "x",
            "returnValue": {"ok": true}
        })
    );
}
