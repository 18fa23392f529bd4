use super::*;
use crate::env_vars::EnvSnapshot;
use tempfile::TempDir;

fn sample() -> RunResults {
    let invocation = Invocation::new(EnvSnapshot::from_pairs([("DBT_ENV_CUSTOM_ENV_team", "data")]));
    let mut args = BTreeMap::new();
    args.insert("which".to_string(), Value::String("run".to_string()));
    let mut ok = RunResult::new("model.shop.b", RunStatus::Success);
    ok.execution_time = 0.25;
    ok.thread_id = "Thread-1".to_string();
    RunResults::new(
        &invocation,
        args,
        1.5,
        vec![
            ok,
            RunResult::new("model.shop.a", RunStatus::RuntimeError).with_message("syntax error"),
            RunResult::skipped("model.shop.c", "upstream model.shop.a failed"),
            RunResult::new("test.shop.t", RunStatus::Warn),
        ],
    )
}

#[test]
fn test_status_wire_names() {
    assert_eq!(serde_json::to_string(&RunStatus::PartialSuccess).unwrap(), "\"partial-success\"");
    assert_eq!(serde_json::to_string(&RunStatus::RuntimeError).unwrap(), "\"runtime-error\"");
    assert_eq!(RunStatus::parse("runtime_error"), Some(RunStatus::RuntimeError));
    assert_eq!(RunStatus::parse("PASS"), Some(RunStatus::Pass));
    assert_eq!(RunStatus::parse("bogus"), None);
}

#[test]
fn test_status_classification() {
    assert!(RunStatus::Skipped.blocks_children());
    assert!(!RunStatus::Warn.blocks_children());
    assert!(!RunStatus::Skipped.is_failure());
    assert!(RunStatus::PartialSuccess.is_failure());
    assert!(RunStatus::PartialSuccess.is_retryable());
    assert!(!RunStatus::Pass.is_retryable());
}

#[test]
fn test_results_sorted_with_env_metadata() {
    let results = sample();
    let ids: Vec<&str> = results.results.iter().map(|r| r.unique_id.as_str()).collect();
    assert_eq!(ids, vec!["model.shop.a", "model.shop.b", "model.shop.c", "test.shop.t"]);
    assert_eq!(results.metadata.env.get("team").map(String::as_str), Some("data"));
    assert!(results.has_failures());
}

#[test]
fn test_retry_and_summary() {
    let results = sample();
    let retry: Vec<String> = results.retry_ids().into_iter().collect();
    assert_eq!(retry, vec!["model.shop.a".to_string(), "model.shop.c".to_string()]);
    assert_eq!(results.summary().get(&RunStatus::Success), Some(&1));
    assert_eq!(
        results.get("model.shop.c").and_then(|r| r.skip_reason.as_deref()),
        Some("upstream model.shop.a failed")
    );
}

#[test]
fn test_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run_results.json");
    assert!(RunResults::load(&path).unwrap().is_none());
    let results = sample();
    results.save(&path).unwrap();
    assert_eq!(RunResults::load(&path).unwrap(), Some(results));
}
