use super::*;
use crate::context::RunOptions;
use crate::test_support::Harness;
use qy_db::QueryResult;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

const CHAIN: [(&str, &str); 4] = [
    ("models/a.sql", "select 1 as id"),
    ("models/b.sql", "select * from {{ ref('a') }}"),
    ("models/c.sql", "select * from {{ ref('b') }}"),
    ("models/d.sql", "select 2 as id"),
];

fn scheduler(harness: &Harness) -> Scheduler {
    Scheduler::new(Arc::clone(&harness.ctx), Arc::clone(&harness.pool))
}

fn status(outcome: &RunOutcome, id: &str) -> RunStatus {
    outcome.get(id).unwrap_or_else(|| panic!("no result for {}", id)).status
}

#[tokio::test]
async fn test_runs_in_dependency_order() {
    let harness = Harness::new(&CHAIN, RunOptions::default());
    let outcome = scheduler(&harness).run().await.unwrap();

    assert_eq!(outcome.results.len(), 4);
    assert!(!outcome.has_failures());
    let a = harness.adapter.position("\"main\".\"a\" as").unwrap();
    let b = harness.adapter.position("\"main\".\"b\" as").unwrap();
    let c = harness.adapter.position("\"main\".\"c\" as").unwrap();
    assert!(a < b && b < c);
    assert_eq!(harness.adapter.position("create schema if not exists"), Some(0));

    let result = outcome.get("model.shop.b").unwrap();
    assert_eq!(result.thread_id, "Thread-1");
    assert_eq!(result.timing.len(), 1);
    assert_eq!(result.relation_name.as_deref(), Some("\"memory\".\"main\".\"b\""));
    assert!(result.compiled_code.as_deref().unwrap().contains("\"memory\".\"main\".\"a\""));
    assert_eq!(result.adapter_response.get("code"), Some(&json!("OK")));
}

#[tokio::test]
async fn test_failure_skips_descendants_only() {
    let harness = Harness::new(&CHAIN, RunOptions::default());
    harness.adapter.fail_on("\"main\".\"a\" as", "Binder Error: no such column");
    let outcome = scheduler(&harness).run().await.unwrap();

    assert_eq!(status(&outcome, "model.shop.a"), RunStatus::RuntimeError);
    assert!(outcome.get("model.shop.a").unwrap().message.as_deref().unwrap().contains("Binder Error"));
    for id in ["model.shop.b", "model.shop.c"] {
        let result = outcome.get(id).unwrap();
        assert_eq!(result.status, RunStatus::Skipped);
        assert!(result.skip_reason.as_deref().unwrap().contains("model.shop.a"));
    }
    assert_eq!(status(&outcome, "model.shop.d"), RunStatus::Success);
    assert!(harness.adapter.position("\"main\".\"b\" as").is_none());
    assert!(outcome.has_failures());
}

#[tokio::test]
async fn test_compilation_errors_are_errors() {
    let harness = Harness::new(
        &[("models/a.sql", "select {{ undefined_macro() }}"), ("models/b.sql", "select * from {{ ref('a') }}")],
        RunOptions::default(),
    );
    let outcome = scheduler(&harness).run().await.unwrap();
    assert_eq!(status(&outcome, "model.shop.a"), RunStatus::Error);
    assert_eq!(status(&outcome, "model.shop.b"), RunStatus::Skipped);
}

#[tokio::test]
async fn test_fail_fast_cancels_the_rest() {
    let harness = Harness::new(
        &CHAIN,
        RunOptions {
            fail_fast: true,
            ..Default::default()
        },
    );
    harness.adapter.fail_on("\"main\".\"a\" as", "boom");
    let outcome = scheduler(&harness).run().await.unwrap();

    let d = outcome.get("model.shop.d").unwrap();
    assert_eq!(d.status, RunStatus::Skipped);
    assert_eq!(d.skip_reason.as_deref(), Some(FAIL_FAST_REASON));
    assert_eq!(outcome.results.len(), 4);
}

#[tokio::test]
async fn test_cancel_flag_drains_the_run() {
    let harness = Harness::new(&CHAIN, RunOptions::default());
    harness.ctx.cancel_flag().store(true, Ordering::SeqCst);
    let outcome = scheduler(&harness).run().await.unwrap();

    assert!(outcome
        .results
        .iter()
        .all(|r| r.status == RunStatus::Skipped && r.skip_reason.as_deref() == Some(CANCELLED_REASON)));
    assert!(harness.adapter.position("create or replace view").is_none());
}

#[tokio::test]
async fn test_thread_limit_bounds_concurrency() {
    let files: Vec<(String, String)> = (0..6)
        .map(|i| (format!("models/m{}.sql", i), format!("select {} as id", i)))
        .collect();
    let files: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
    let harness = Harness::new(
        &files,
        RunOptions {
            threads: 2,
            ..Default::default()
        },
    );
    harness.adapter.delay_on("create or replace view", Duration::from_millis(40));
    let outcome = scheduler(&harness).run().await.unwrap();

    assert_eq!(outcome.results.len(), 6);
    assert_eq!(harness.adapter.peak_concurrency(), 2);
    let threads: BTreeSet<&str> = outcome.results.iter().map(|r| r.thread_id.as_str()).collect();
    assert_eq!(threads, BTreeSet::from(["Thread-1", "Thread-2"]));
}

#[tokio::test]
async fn test_failed_start_hook_skips_everything() {
    let mut files = CHAIN.to_vec();
    files.push((
        "dbt_project.yml",
        "name: shop\non-run-start:\n  - create table audit (id int)\non-run-end:\n  - drop table audit\n",
    ));
    let harness = Harness::new(&files, RunOptions::default());
    harness.adapter.fail_on("create table audit", "denied");
    let outcome = scheduler(&harness).run().await.unwrap();

    assert_eq!(
        status(&outcome, "operation.shop.shop-on-run-start-0"),
        RunStatus::RuntimeError
    );
    for id in ["model.shop.a", "model.shop.d"] {
        assert!(outcome.get(id).unwrap().skip_reason.as_deref().unwrap().contains("on-run-start"));
    }
    assert_eq!(status(&outcome, "operation.shop.shop-on-run-end-0"), RunStatus::Success);
    assert!(harness.adapter.position("drop table audit").is_some());
}

#[tokio::test]
async fn test_build_gates_children_on_tests() {
    let files = [
        ("models/a.sql", "select null as id"),
        ("models/b.sql", "select * from {{ ref('a') }}"),
        (
            "models/schema.yml",
            "models:\n  - name: a\n    columns:\n      - name: id\n        tests:\n          - not_null\n",
        ),
    ];
    let harness = Harness::new(&files, RunOptions::default());
    harness.adapter.respond(
        "dbt_internal_test",
        QueryResult::new(
            vec!["failures".into(), "should_warn".into(), "should_error".into()],
            vec![vec![json!(1), json!(true), json!(true)]],
        ),
    );
    let outcome = scheduler(&harness)
        .with_tests_gating_children(true)
        .run()
        .await
        .unwrap();

    let test = outcome
        .results
        .iter()
        .find(|r| r.unique_id.starts_with("test.shop.not_null_a_id"))
        .unwrap();
    assert_eq!(test.status, RunStatus::Fail);
    assert_eq!(test.failures, Some(1));
    assert_eq!(status(&outcome, "model.shop.b"), RunStatus::Skipped);
    assert_eq!(status(&outcome, "model.shop.a"), RunStatus::Success);
}

#[tokio::test]
async fn test_panicking_worker_is_an_error() {
    let harness = Harness::new(&CHAIN, RunOptions::default());
    harness.adapter.panic_on("\"main\".\"a\" as");
    let outcome = scheduler(&harness).run().await.unwrap();

    let a = outcome.get("model.shop.a").unwrap();
    assert_eq!(a.status, RunStatus::Error);
    assert!(a.message.as_deref().unwrap().contains("panicked"), "{:?}", a.message);
    for id in ["model.shop.b", "model.shop.c"] {
        let result = outcome.get(id).unwrap();
        assert_eq!(result.status, RunStatus::Skipped);
        assert_eq!(
            result.skip_reason.as_deref(),
            Some("upstream model.shop.a finished with status error")
        );
    }
    assert_eq!(status(&outcome, "model.shop.d"), RunStatus::Success);
    assert_eq!(outcome.results.len(), 4);
    assert!(outcome.has_failures());
}
